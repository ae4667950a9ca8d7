//! Storage server's outbound heartbeat: dials NM's heartbeat port, sends an
//! identifying frame, then periodic liveness pings.
//!
//! Grounded on `examples/original_source/ss.c`'s `heartbeat_thread`
//! (SPEC_FULL.md §4.12). Distinct from [`crate::nm::heartbeat`], which is
//! the listener/monitor side running on the name server.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::message::Message;
use crate::net;

/// Matches `examples/original_source/common.h`'s heartbeat cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Sends the identification frame and then pings every [`HEARTBEAT_INTERVAL`]
/// until the connection breaks. Returns the I/O error that ended it, so the
/// caller can decide whether to terminate the process (SPEC_FULL.md §7: a
/// lost SS↔NM connection is a transport error the SS does not retry).
pub async fn run(ss_id: i32, mut stream: TcpStream) -> std::io::Result<()> {
    let mut ident = Message::new(crate::message::MessageType::Ack);
    ident.ss_id = ss_id;
    ident.data = "HB_INIT".into();
    net::send_message(&mut stream, &ident).await?;

    info!(ss_id, "heartbeat channel established");
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // first tick fires immediately; consume it before the loop's own send

    loop {
        ticker.tick().await;
        let mut ping = Message::new(crate::message::MessageType::Ack);
        ping.ss_id = ss_id;
        ping.data = "HEARTBEAT".into();
        if let Err(e) = net::send_message(&mut stream, &ping).await {
            warn!(error = %e, ss_id, "heartbeat send failed, connection to name server is gone");
            return Err(e);
        }
    }
}
