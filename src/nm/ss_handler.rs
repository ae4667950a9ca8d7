//! NM's SS command-port listener: accepts the persistent connection each SS
//! dials in with, reads its `REG_SS` registration frame, and hands the
//! socket off to the [`super::ss_registry::SsRegistry`] for later forwarding.
//!
//! Grounded on `examples/original_source/nm.c`'s `ss_listener`/
//! `handle_ss_connection`. Unlike the reference, there is no per-SS read
//! loop on the NM side after registration: every later exchange with that
//! SS is a request NM itself initiates (a forward), so the socket just sits
//! in the registry until [`super::client_handler`] needs it.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::message::{Message, MessageType, Status};
use crate::net;

use super::NameServer;

pub async fn run(nm: Arc<NameServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", nm.ss_command_port)).await?;
    info!(port = nm.ss_command_port, "ss command listener bound");
    serve(nm, listener).await
}

/// Accepts connections off an already-bound listener. Split out from
/// [`run`] so tests can bind an ephemeral port and still drive this loop.
pub async fn serve(nm: Arc<NameServer>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let nm = nm.clone();
        tokio::spawn(async move {
            match net::recv_message(&mut stream).await {
                Ok(msg) if msg.msg_type == MessageType::RegSs => {
                    let ss_id = msg.ss_id;
                    let ip = if msg.sender.is_empty() { peer.ip().to_string() } else { msg.sender.clone() };
                    let nm_port = msg.nm_port.max(0) as u16;
                    let client_port = msg.client_port.max(0) as u16;
                    let files: Vec<String> =
                        msg.data.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();

                    info!(ss_id, %ip, client_port, file_count = files.len(), "storage server registering");
                    merge_files(&nm, ss_id, &files);
                    let conn = nm.ss_registry.register(ss_id, ip, nm_port, client_port, files, stream).await;

                    let mut guard = conn.lock_stream().await;
                    let _ = net::send_message(&mut guard, &Message::reply(Status::Success)).await;
                }
                Ok(other) => {
                    warn!(msg_type = ?other.msg_type, %peer, "expected REG_SS as first message on ss command connection");
                }
                Err(e) => {
                    warn!(error = %e, %peer, "ss command connection closed before registering");
                }
            }
        });
    }
}

/// Folds a registering SS's file list into the NM's file index
/// (SPEC_FULL.md §4.12): existing entries keep their owner/ACL but get a
/// refreshed `ss_id`; unknown files are inserted owned by `"system"`.
fn merge_files(nm: &NameServer, ss_id: i32, files: &[String]) {
    for filename in files {
        match nm.file_meta(filename) {
            Some(mut meta) => {
                meta.ss_id = ss_id;
                nm.put_file_meta(meta);
            }
            None => {
                let meta = crate::domain::FileMetadata::new(filename, "/", "system", ss_id);
                nm.put_file_meta(meta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_files_preserves_owner_and_refreshes_ss_id() {
        let nm = NameServer::new(0, 0, 0);
        let mut meta = crate::domain::FileMetadata::new("notes.txt", "/", "alice", 1);
        meta.ss_id = 1;
        nm.put_file_meta(meta);

        merge_files(&nm, 2, &["notes.txt".to_string(), "fresh.txt".to_string()]);

        assert_eq!(nm.file_meta("notes.txt").unwrap().owner, "alice");
        assert_eq!(nm.file_meta("notes.txt").unwrap().ss_id, 2);
        assert_eq!(nm.file_meta("fresh.txt").unwrap().owner, "system");
    }
}
