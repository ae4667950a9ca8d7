//! NM's heartbeat listener (a distinct port from the command channel) and
//! the background health monitor that marks a quiet SS inactive.
//!
//! Grounded on `examples/original_source/nm.c`'s `ss_hb_listener`/
//! `handle_ss_heartbeat`/`heartbeat_monitor` (SPEC_FULL.md §4.12).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::message::MessageType;
use crate::net;

use super::NameServer;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);
const REGISTRATION_GRACE: Duration = Duration::from_secs(60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run_listener(nm: Arc<NameServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", nm.ss_heartbeat_port)).await?;
    info!(port = nm.ss_heartbeat_port, "ss heartbeat listener bound");
    serve_listener(nm, listener).await
}

/// Accepts connections off an already-bound listener. Split out from
/// [`run_listener`] so tests can bind an ephemeral port and still drive
/// this loop.
pub async fn serve_listener(nm: Arc<NameServer>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let nm = nm.clone();
        tokio::spawn(async move {
            let first = match net::recv_message(&mut stream).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, %peer, "heartbeat connection closed before identifying");
                    return;
                }
            };
            let ss_id = first.ss_id;
            let Some(conn) = nm.ss_registry.get(ss_id) else {
                warn!(ss_id, %peer, "heartbeat from unknown ss id");
                return;
            };
            conn.mark_heartbeat();
            conn.set_hb_stream(stream).await;
            info!(ss_id, %peer, "heartbeat channel established");

            loop {
                // The stream was moved into the registry; re-borrow it for
                // each read rather than holding it across the whole loop, so
                // a registration can swap it out from under a dead connection.
                let Some(conn) = nm.ss_registry.get(ss_id) else { return };
                let mut guard = conn.lock_hb_stream_for_read().await;
                let Some(stream) = guard.as_mut() else { return };
                match net::recv_message(stream).await {
                    Ok(m) if m.msg_type == MessageType::Ack || m.msg_type == MessageType::RegSs => {
                        drop(guard);
                        conn.mark_heartbeat();
                    }
                    Ok(_) => {
                        drop(guard);
                        conn.mark_heartbeat();
                    }
                    Err(e) => {
                        warn!(error = %e, ss_id, "heartbeat connection lost");
                        return;
                    }
                }
            }
        });
    }
}

/// Runs forever, ticking every [`MONITOR_INTERVAL`] and marking any SS whose
/// last heartbeat is older than [`HEARTBEAT_TIMEOUT`] inactive — unless it
/// registered within the last [`REGISTRATION_GRACE`], in which case it gets
/// a longer runway before its first heartbeat is expected.
pub async fn run_monitor(nm: Arc<NameServer>) {
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        ticker.tick().await;
        let now = SystemTime::now();
        for conn in nm.ss_registry.all() {
            if !conn.is_active() {
                continue;
            }
            let registered_at = *conn.registered_at.lock().unwrap();
            let last_heartbeat = conn.info.lock().unwrap().last_heartbeat;
            let since_registration = now.duration_since(registered_at).unwrap_or_default();
            let since_heartbeat = now.duration_since(last_heartbeat).unwrap_or_default();

            let within_grace = since_registration < REGISTRATION_GRACE;
            if !within_grace && since_heartbeat > HEARTBEAT_TIMEOUT {
                let ss_id = conn.info.lock().unwrap().id;
                warn!(ss_id, ?since_heartbeat, "marking storage server inactive");
                conn.mark_inactive();
                conn.close_hb_stream().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_is_anchored_to_registration_not_idle_time() {
        // Documents the deliberate deviation from the literal C
        // `idle < 60 ? 60 : HEARTBEAT_TIMEOUT` read, which re-derives the
        // grace window from current idle time rather than registration
        // time; SPEC_FULL.md §4.12 states the grace is "after
        // (re)registration", which is what `run_monitor` implements.
        assert!(REGISTRATION_GRACE > HEARTBEAT_TIMEOUT);
    }
}
