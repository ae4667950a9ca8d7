//! Storage server entry point: dials the name server's command and
//! heartbeat ports, registers its on-disk file set, then serves both the NM
//! command connection and incoming client connections.
//!
//! Grounded on `examples/original_source/ss.c`'s `main`/`connect_to_nm`/
//! `scan_and_register_files`/`init_storage_server`. Like the reference, the
//! heartbeat port is a fixed well-known port rather than a CLI argument.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use docflow::config::{self, SsArgs};
use docflow::message::{Message, MessageType, Status};
use docflow::net;
use docflow::ss::{self, client_handler, heartbeat, nm_handler, StorageServer};
use tokio::net::TcpStream;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter("info").init();

    let args = SsArgs::parse();
    args.validate().map_err(|e| anyhow::anyhow!(e))?;

    let storage_root = ss::storage_root_for(&PathBuf::from("."), args.ss_id);
    let ss = Arc::new(StorageServer::new(args.ss_id, storage_root, args.client_port, args.nm_port));
    let files = ss.scan_reportable_files().await?;
    info!(ss_id = ss.id, file_count = files.len(), "scanned storage root");

    let nm_stream = TcpStream::connect((args.nm_ip.as_str(), args.nm_port)).await?;
    let local_ip = nm_stream.local_addr()?.ip().to_string();
    let nm_stream = register(nm_stream, &args, &local_ip, &files).await?;

    let hb_stream = TcpStream::connect((args.nm_ip.as_str(), config::DEFAULT_SS_HEARTBEAT_PORT)).await?;

    let ss_for_nm = ss.clone();
    let nm_task = tokio::spawn(async move { nm_handler::run(&ss_for_nm, nm_stream).await });
    let hb_task = tokio::spawn(heartbeat::run(ss.id, hb_stream));
    let client_task = tokio::spawn(client_handler::run(ss.clone()));

    tokio::select! {
        res = nm_task => fatal("nm command connection", res),
        res = hb_task => fatal("heartbeat connection", res),
        res = client_task => fatal("client listener", res),
    }
}

/// Sends `REG_SS` with this SS's identity and file list, and waits for NM's
/// acknowledgement before handing the connection off to the command loop.
async fn register(
    mut stream: TcpStream,
    args: &SsArgs,
    local_ip: &str,
    files: &[String],
) -> anyhow::Result<TcpStream> {
    let mut reg = Message::new(MessageType::RegSs);
    reg.ss_id = args.ss_id;
    reg.sender = local_ip.to_string();
    reg.client_port = args.client_port as i32;
    reg.nm_port = args.nm_port as i32;
    reg.data = files.join(",");
    net::send_message(&mut stream, &reg).await?;

    let ack = net::recv_message(&mut stream).await?;
    if ack.status != Status::Success {
        anyhow::bail!("name server rejected registration: {:?}", ack.status);
    }
    info!(ss_id = args.ss_id, "registered with name server");
    Ok(stream)
}

fn fatal(name: &str, res: Result<std::io::Result<()>, tokio::task::JoinError>) -> anyhow::Result<()> {
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
