//! Storage server's handling of requests forwarded down the persistent
//! command connection it dialed NM with.
//!
//! Grounded on `examples/original_source/ss.c`'s `handle_nm_communication`:
//! a loop with a 30s receive timeout (a plain timeout is not an error here,
//! just an empty poll) that dispatches by message type and replies on the
//! same socket, terminating the connection (and the process, per
//! SPEC_FULL.md §7) on a genuine transport failure.
//!
//! Folder paths are metadata NM alone tracks (`§4.13`'s folder index); this
//! SS keeps every file flat under its storage root, so `CREATEFOLDER`/`MOVE`
//! have nothing physical to do here beyond acknowledging.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::fileops::{self, CheckpointError};
use crate::message::{Message, MessageType, Status};
use crate::net;

use super::StorageServer;

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(ss: &StorageServer, mut stream: TcpStream) -> std::io::Result<()> {
    info!(ss_id = ss.id, "nm command handler started");
    loop {
        let req = match tokio::time::timeout(RECV_TIMEOUT, net::recv_message(&mut stream)).await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                warn!(error = %e, ss_id = ss.id, "lost connection to name server");
                return Err(e);
            }
            Err(_elapsed) => continue,
        };

        let (status, data) = dispatch(ss, &req).await;
        let mut response = Message::reply(status);
        response.ss_id = ss.id;
        response.data = data;
        net::send_message(&mut stream, &response).await?;
    }
}

async fn dispatch(ss: &StorageServer, req: &Message) -> (Status, String) {
    match req.msg_type {
        MessageType::CheckLocks => {
            let locked = ss.locks.any_locked(&req.filename);
            (if locked { Status::FileLocked } else { Status::Success }, String::new())
        }
        MessageType::Checkpoint => {
            let path = ss.path_for(&req.filename);
            (checkpoint_status(fileops::create_checkpoint(&path, &req.checkpoint_tag).await), String::new())
        }
        MessageType::ListCheckpoints => {
            let path = ss.path_for(&req.filename);
            match fileops::list_checkpoints(&path).await {
                Ok(tags) => (Status::Success, tags.join(",")),
                Err(_) => (Status::ServerError, String::new()),
            }
        }
        MessageType::ViewCheckpoint => {
            let path = ss.path_for(&req.filename);
            match fileops::view_checkpoint(&path, &req.checkpoint_tag).await {
                Ok(text) => (Status::Success, text),
                Err(e) => (checkpoint_status(Err(e)), String::new()),
            }
        }
        MessageType::Revert => {
            let path = ss.path_for(&req.filename);
            (checkpoint_status(fileops::revert_to_checkpoint(&path, &req.checkpoint_tag).await), String::new())
        }
        MessageType::CreateFolder => (Status::Success, String::new()),
        MessageType::Move => (Status::Success, String::new()),
        MessageType::Create => (handle_create(ss, &req.filename).await, String::new()),
        MessageType::Delete => (handle_delete(ss, &req.filename).await, String::new()),
        MessageType::SsInfo => handle_ss_info(ss, req).await,
        _ => {
            warn!(msg_type = ?req.msg_type, "unexpected message type from name server");
            (Status::InvalidOperation, String::new())
        }
    }
}

fn checkpoint_status<T>(result: Result<T, CheckpointError>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(CheckpointError::AlreadyExists) => Status::Exists,
        Err(CheckpointError::NotFound) => Status::NotFound,
        Err(CheckpointError::Io(_)) => Status::ServerError,
    }
}

async fn handle_create(ss: &StorageServer, filename: &str) -> Status {
    let path = ss.path_for(filename);
    if tokio::fs::metadata(&path).await.is_ok() {
        return Status::Exists;
    }
    match tokio::fs::write(&path, []).await {
        Ok(()) => Status::Success,
        Err(_) => Status::ServerError,
    }
}

async fn handle_delete(ss: &StorageServer, filename: &str) -> Status {
    let path = ss.path_for(filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(fileops::undo_path(&path)).await;
            Status::Success
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Status::NotFound,
        Err(_) => Status::ServerError,
    }
}

/// `SS_INFO`: `data == "READ_CONTENT"` asks for the raw file body, anything
/// else asks for the `size|words|chars|modified|accessed` stat line.
async fn handle_ss_info(ss: &StorageServer, req: &Message) -> (Status, String) {
    let path = ss.path_for(&req.filename);
    if req.data == "READ_CONTENT" {
        return match tokio::fs::read_to_string(&path).await {
            Ok(text) => (Status::Success, text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Status::NotFound, String::new()),
            Err(_) => (Status::ServerError, String::new()),
        };
    }

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (Status::NotFound, String::new()),
        Err(_) => return (Status::ServerError, String::new()),
    };
    let (word_count, char_count) = match fileops::file_stats(&path).await {
        Ok(stats) => stats,
        Err(_) => return (Status::ServerError, String::new()),
    };
    let modified = epoch_secs(meta.modified());
    let accessed = epoch_secs(meta.accessed());
    (Status::Success, format!("{}|{}|{}|{}|{}", meta.len(), word_count, char_count, modified, accessed))
}

fn epoch_secs(time: std::io::Result<std::time::SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("docflow-ss-nm-handler-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn create_then_create_again_conflicts() {
        let ss = StorageServer::new(1, tempdir(), 0, 0);
        assert_eq!(handle_create(&ss, "fresh.txt").await, Status::Success);
        assert_eq!(handle_create(&ss, "fresh.txt").await, Status::Exists);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let ss = StorageServer::new(1, tempdir(), 0, 0);
        assert_eq!(handle_delete(&ss, "nope.txt").await, Status::NotFound);
    }

    #[tokio::test]
    async fn check_locks_reports_file_locked_status() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), "Hi.").await.unwrap();
        let ss = StorageServer::new(1, dir, 0, 0);
        ss.locks.lock("notes.txt", 0, "alice").unwrap();

        let mut req = Message::new(MessageType::CheckLocks);
        req.filename = "notes.txt".into();
        let (status, _) = dispatch(&ss, &req).await;
        assert_eq!(status, Status::FileLocked);
    }

    #[tokio::test]
    async fn ss_info_reports_stat_line_when_not_reading_content() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), "Hi there.").await.unwrap();
        let ss = StorageServer::new(1, dir, 0, 0);

        let mut req = Message::new(MessageType::SsInfo);
        req.filename = "notes.txt".into();
        let (status, data) = dispatch(&ss, &req).await;
        assert_eq!(status, Status::Success);
        assert_eq!(data.split('|').count(), 5);
    }
}
