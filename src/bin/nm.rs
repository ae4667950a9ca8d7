//! Name server entry point: parses CLI overrides, builds the shared
//! [`docflow::nm::NameServer`], and spawns the client listener, SS command
//! listener, and heartbeat listener/monitor as concurrent tasks.
//!
//! Grounded on `examples/original_source/nm.c`'s `main`, which starts the
//! same four concerns (as threads rather than tokio tasks) before blocking
//! forever.

use std::sync::Arc;

use clap::Parser;
use docflow::config::NmArgs;
use docflow::nm::{client_handler, heartbeat, ss_handler, NameServer};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter("info").init();

    let args = NmArgs::parse();
    let nm = Arc::new(NameServer::new(args.client_port, args.ss_command_port, args.ss_heartbeat_port));

    let client_task = tokio::spawn(client_handler::run(nm.clone()));
    let ss_task = tokio::spawn(ss_handler::run(nm.clone()));
    let hb_listener_task = tokio::spawn(heartbeat::run_listener(nm.clone()));
    let hb_monitor_task = tokio::spawn(heartbeat::run_monitor(nm.clone()));

    tokio::select! {
        res = client_task => report("client listener", res),
        res = ss_task => report("ss command listener", res),
        res = hb_listener_task => report("ss heartbeat listener", res),
        res = hb_monitor_task => {
            if let Err(e) = res {
                error!(error = %e, "ss heartbeat monitor panicked");
            }
            Ok(())
        }
    }
}

/// A listener task ending at all is a transport failure worth surfacing;
/// SPEC_FULL.md §7 treats it as fatal to the process rather than something
/// to retry.
fn report(
    name: &str,
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match res {
        Ok(Ok(())) => unreachable!("{} loop exits only on error", name),
        Ok(Err(e)) => {
            error!(error = %e, "{} failed", name);
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "{} panicked", name);
            Err(e.into())
        }
    }
}
