//! Storage server's client-facing listener: direct reads, the lock/write/
//! commit/cancel write-session protocol, token streaming, and undo.
//!
//! Grounded on `examples/original_source/ss.c`'s `handle_client_request` and
//! its per-message handlers (`stream_file_ss`, the lock/write/commit/cancel
//! handlers reached through the same dispatch), per SPEC_FULL.md §4.5-4.10.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::commitqueue::CommitQueueEntry;
use crate::fileops::{self, Token};
use crate::locks::LockError;
use crate::message::{Message, MessageType, Status};
use crate::net;

use super::StorageServer;

/// Pause between streamed tokens, matching `examples/original_source/common.h`'s `STREAM_DELAY` (100ms).
const STREAM_DELAY: Duration = Duration::from_millis(100);

pub async fn run(ss: Arc<StorageServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", ss.client_port)).await?;
    info!(port = ss.client_port, ss_id = ss.id, "client listener bound");
    serve(ss, listener).await
}

/// Accepts connections off an already-bound listener. Split out from
/// [`run`] so tests can bind an ephemeral port and still drive this loop.
pub async fn serve(ss: Arc<StorageServer>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let ss = ss.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client(ss, stream).await {
                warn!(error = %e, %peer, "client connection ended");
            }
        });
    }
}

async fn serve_client(ss: Arc<StorageServer>, mut stream: TcpStream) -> std::io::Result<()> {
    loop {
        let req = match net::recv_message(&mut stream).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        if req.msg_type == MessageType::Stream {
            handle_stream(&ss, &mut stream, &req).await?;
            continue;
        }

        let reply = dispatch(&ss, &req).await;
        net::send_message(&mut stream, &reply).await?;
    }
}

async fn dispatch(ss: &StorageServer, req: &Message) -> Message {
    match req.msg_type {
        MessageType::Read => handle_read(ss, req).await,
        MessageType::LockSentence => handle_lock(ss, req).await,
        MessageType::Write => handle_write(ss, req).await,
        MessageType::UnlockSentence | MessageType::CancelWrite => handle_cancel(ss, req).await,
        MessageType::CommitWrite => handle_commit(ss, req).await,
        MessageType::Undo => handle_undo(ss, req).await,
        _ => {
            let mut m = Message::error(Status::InvalidOperation);
            m.data = "unexpected message type on client channel".into();
            m
        }
    }
}

async fn handle_read(ss: &StorageServer, req: &Message) -> Message {
    let path = ss.path_for(&req.filename);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            let mut reply = Message::reply(Status::Success);
            reply.data = text;
            reply
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Message::error(Status::NotFound),
        Err(_) => Message::error(Status::ServerError),
    }
}

async fn handle_lock(ss: &StorageServer, req: &Message) -> Message {
    let idx = req.sentence_index.max(0) as usize;
    let path = ss.path_for(&req.filename);
    let fc = match fileops::read_and_parse(&path).await {
        Ok(fc) => fc,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => fileops::FileContent::default(),
        Err(_) => return Message::error(Status::ServerError),
    };

    if !fileops::lock_index_valid(&fc, idx) {
        return Message::error(Status::InvalidIndex);
    }

    match ss.locks.lock(&req.filename, idx, &req.sender) {
        Ok(()) => {}
        Err(LockError::AlreadyLocked) => return Message::error(Status::SentenceLocked),
        Err(LockError::NotHeld) => return Message::error(Status::ServerError),
    }

    match ss.sessions.begin(&ss.storage_root, &req.filename, &req.sender, idx, fc.sentences.len()).await {
        Ok(_) => Message::reply(Status::Success),
        Err(e) => {
            warn!(error = %e, file = %req.filename, "failed to begin write session after lock");
            let _ = ss.locks.unlock(&req.filename, idx, &req.sender);
            Message::error(Status::ServerError)
        }
    }
}

async fn handle_write(ss: &StorageServer, req: &Message) -> Message {
    let idx = req.sentence_index.max(0) as usize;
    if ss.sessions.get(&req.filename, &req.sender, idx).is_none() {
        return Message::error(Status::InvalidOperation);
    }
    let word_idx = req.word_index.max(0) as usize;
    let content = fileops::unescape(&req.data);

    match ss.sessions.write(&req.filename, &req.sender, idx, word_idx, &content).await {
        Ok(Ok(created)) => {
            if created > 0 {
                ss.locks.grow(&req.filename, idx + 1 + created);
            }
            Message::reply(Status::Success)
        }
        Ok(Err(_)) => Message::error(Status::InvalidIndex),
        Err(e) => {
            warn!(error = %e, file = %req.filename, "staged write failed");
            Message::error(Status::ServerError)
        }
    }
}

async fn handle_cancel(ss: &StorageServer, req: &Message) -> Message {
    let idx = req.sentence_index.max(0) as usize;
    if let Err(e) = ss.sessions.cancel(&req.filename, &req.sender, idx).await {
        warn!(error = %e, file = %req.filename, "failed to remove temp file on cancel");
        return Message::error(Status::ServerError);
    }
    match ss.locks.unlock(&req.filename, idx, &req.sender) {
        Ok(()) => Message::reply(Status::Success),
        Err(LockError::NotHeld) => Message::error(Status::InvalidOperation),
        Err(LockError::AlreadyLocked) => Message::error(Status::ServerError),
    }
}

/// Enqueues the session's staged content into the file's commit queue,
/// releases the lock, then drives the queue to drain (SPEC_FULL.md §4.6/§4.7).
async fn handle_commit(ss: &StorageServer, req: &Message) -> Message {
    let idx = req.sentence_index.max(0) as usize;
    let Some(session) = ss.sessions.take_for_commit(&req.filename, &req.sender, idx) else {
        return Message::error(Status::InvalidOperation);
    };

    ss.commit_queues.queue_for(&req.filename).push(CommitQueueEntry {
        username: session.username,
        sentence_idx: session.sentence_idx,
        original_sentence_count: session.original_sentence_count,
        temp_path: session.temp_path,
        lock_time: session.lock_time,
    });
    let _ = ss.locks.unlock(&req.filename, idx, &req.sender);

    let queue = ss.commit_queues.queue_for(&req.filename);
    let main_path = ss.path_for(&req.filename);
    match queue.drain_into(&main_path).await {
        Ok(_) => Message::reply(Status::Success),
        Err(e) => {
            warn!(error = %e, file = %req.filename, "commit queue drain failed");
            Message::error(Status::ServerError)
        }
    }
}

async fn handle_undo(ss: &StorageServer, req: &Message) -> Message {
    let path = ss.path_for(&req.filename);
    match fileops::restore_from_undo(&path).await {
        Ok(true) => Message::reply(Status::Success),
        Ok(false) => Message::error(Status::NotFound),
        Err(e) => {
            warn!(error = %e, file = %req.filename, "undo restore failed");
            Message::error(Status::ServerError)
        }
    }
}

/// Walks real words (words and delimiters; whitespace/newline tokens carry no
/// wire representation of their own) in order, sending each as its own DATA
/// frame with a 100ms pause between, terminated by STOP (SPEC_FULL.md §4.9).
async fn handle_stream(ss: &StorageServer, stream: &mut TcpStream, req: &Message) -> std::io::Result<()> {
    let path = ss.path_for(&req.filename);
    let fc = match fileops::read_and_parse(&path).await {
        Ok(fc) => fc,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return net::send_message(stream, &Message::error(Status::NotFound)).await;
        }
        Err(_) => {
            return net::send_message(stream, &Message::error(Status::ServerError)).await;
        }
    };

    let sentence_count = fc.sentences.len();
    for (i, sentence) in fc.sentences.iter().enumerate() {
        let real: Vec<&Token> = sentence
            .tokens
            .iter()
            .filter(|t| !matches!(t, Token::Space(_) | Token::Newline))
            .collect();

        for (j, tok) in real.iter().enumerate() {
            let text = match tok {
                Token::Word(w) => w.clone(),
                Token::Delimiter(c) => c.to_string(),
                _ => unreachable!("whitespace/newline filtered out above"),
            };
            let curr_is_delim = matches!(tok, Token::Delimiter(_));

            let needs_space = if let Some(next) = real.get(j + 1) {
                let next_is_delim = matches!(next, Token::Delimiter(_));
                !curr_is_delim && !next_is_delim
            } else {
                i + 1 < sentence_count
            };

            // `ss_id` is unused on a DATA frame; reused here to carry the
            // needs_trailing_space boolean, the same way other message types
            // repurpose the generic int fields for their own payload.
            let mut frame = Message::new(MessageType::Data);
            frame.status = Status::Success;
            frame.sentence_index = i as i32;
            frame.word_index = j as i32;
            frame.ss_id = i32::from(needs_space);
            frame.data = text;
            net::send_message(stream, &frame).await?;
            tokio::time::sleep(STREAM_DELAY).await;
        }
    }

    let mut stop = Message::new(MessageType::Stop);
    stop.status = Status::Success;
    net::send_message(stream, &stop).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("docflow-ss-client-handler-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn new_ss(root: PathBuf) -> StorageServer {
        StorageServer::new(1, root, 0, 0)
    }

    #[tokio::test]
    async fn lock_write_commit_round_trip() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), "Hello world.").await.unwrap();
        let ss = new_ss(dir.clone());

        let mut lock_req = Message::new(MessageType::LockSentence);
        lock_req.filename = "notes.txt".into();
        lock_req.sender = "alice".into();
        lock_req.sentence_index = 0;
        assert_eq!(dispatch(&ss, &lock_req).await.status, Status::Success);

        let mut write_req = Message::new(MessageType::Write);
        write_req.filename = "notes.txt".into();
        write_req.sender = "alice".into();
        write_req.sentence_index = 0;
        write_req.word_index = 2;
        write_req.data = "there".into();
        assert_eq!(dispatch(&ss, &write_req).await.status, Status::Success);

        let mut commit_req = Message::new(MessageType::CommitWrite);
        commit_req.filename = "notes.txt".into();
        commit_req.sender = "alice".into();
        commit_req.sentence_index = 0;
        assert_eq!(dispatch(&ss, &commit_req).await.status, Status::Success);

        let result = tokio::fs::read_to_string(dir.join("notes.txt")).await.unwrap();
        assert_eq!(result, "Hello there world.");
        assert!(!ss.locks.any_locked("notes.txt"));
    }

    #[tokio::test]
    async fn lock_rejects_invalid_index() {
        let dir = tempdir();
        tokio::fs::write(dir.join("incomplete.txt"), "hello").await.unwrap();
        let ss = new_ss(dir);

        let mut lock_req = Message::new(MessageType::LockSentence);
        lock_req.filename = "incomplete.txt".into();
        lock_req.sender = "alice".into();
        lock_req.sentence_index = 1;
        assert_eq!(dispatch(&ss, &lock_req).await.status, Status::InvalidIndex);
    }

    #[tokio::test]
    async fn cancel_discards_temp_without_merging() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), "Hello world.").await.unwrap();
        let ss = new_ss(dir.clone());

        let mut lock_req = Message::new(MessageType::LockSentence);
        lock_req.filename = "notes.txt".into();
        lock_req.sender = "alice".into();
        lock_req.sentence_index = 0;
        dispatch(&ss, &lock_req).await;

        let mut write_req = Message::new(MessageType::Write);
        write_req.filename = "notes.txt".into();
        write_req.sender = "alice".into();
        write_req.sentence_index = 0;
        write_req.word_index = 1;
        write_req.data = "never-committed".into();
        dispatch(&ss, &write_req).await;

        let mut cancel_req = Message::new(MessageType::CancelWrite);
        cancel_req.filename = "notes.txt".into();
        cancel_req.sender = "alice".into();
        cancel_req.sentence_index = 0;
        assert_eq!(dispatch(&ss, &cancel_req).await.status, Status::Success);

        let result = tokio::fs::read_to_string(dir.join("notes.txt")).await.unwrap();
        assert_eq!(result, "Hello world.");
        assert!(!ss.locks.any_locked("notes.txt"));
    }

    #[tokio::test]
    async fn write_without_a_session_is_rejected() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), "Hello world.").await.unwrap();
        let ss = new_ss(dir);

        let mut write_req = Message::new(MessageType::Write);
        write_req.filename = "notes.txt".into();
        write_req.sender = "alice".into();
        write_req.sentence_index = 0;
        write_req.word_index = 1;
        write_req.data = "x".into();
        assert_eq!(dispatch(&ss, &write_req).await.status, Status::InvalidOperation);
    }
}
