//! NM's client-facing listener: registration, metadata operations handled
//! locally or forwarded to the owning SS, and ACL-gated endpoint lookups for
//! the data operations a client then carries out directly against an SS.
//!
//! Grounded on `examples/original_source/nm.c`'s `client_listener`/
//! `handle_client_connection` and its per-message-type handlers
//! (`handle_create`, `handle_delete`, `handle_view`, `handle_info`,
//! `handle_list`, `handle_access` family, `handle_move`,
//! `handle_createfolder`, `handle_viewfolder`, checkpoint forwarding,
//! `handle_requestaccess` family, and the read/write/stream/undo
//! endpoint-return path), per SPEC_FULL.md §4.13/§4.14.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::message::{AccessType, Message, MessageType, Status};
use crate::net;

use super::NameServer;

pub async fn run(nm: Arc<NameServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", nm.client_port)).await?;
    info!(port = nm.client_port, "client listener bound");
    serve(nm, listener).await
}

/// Accepts connections off an already-bound listener. Split out from
/// [`run`] so tests can bind an ephemeral port and still drive this loop.
pub async fn serve(nm: Arc<NameServer>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let nm = nm.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client(nm, stream, peer.ip().to_string()).await {
                warn!(error = %e, %peer, "client connection ended");
            }
        });
    }
}

async fn serve_client(
    nm: Arc<NameServer>,
    mut stream: tokio::net::TcpStream,
    peer_ip: String,
) -> std::io::Result<()> {
    let mut session_user: Option<String> = None;

    loop {
        let req = match net::recv_message(&mut stream).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                if let Some(user) = &session_user {
                    nm.users.deregister(user);
                }
                return Err(e);
            }
        };

        if req.msg_type == MessageType::RegClient {
            session_user = handle_reg_client(&nm, &peer_ip, &req, &mut stream).await?;
            continue;
        }

        let reply = dispatch(&nm, &req).await;
        net::send_message(&mut stream, &reply).await?;
    }

    if let Some(user) = session_user {
        nm.users.deregister(&user);
    }
    Ok(())
}

async fn handle_reg_client(
    nm: &NameServer,
    peer_ip: &str,
    req: &Message,
    stream: &mut tokio::net::TcpStream,
) -> std::io::Result<Option<String>> {
    let reply = match nm.users.register(&req.sender, peer_ip) {
        Ok(()) => Message::reply(Status::Success),
        Err(super::users::DuplicateSession) => {
            let mut m = Message::error(Status::InvalidOperation);
            m.data = format!("user '{}' already has an active session", req.sender);
            m
        }
    };
    let accepted = reply.status == Status::Success;
    net::send_message(stream, &reply).await?;
    Ok(if accepted { Some(req.sender.clone()) } else { None })
}

async fn dispatch(nm: &NameServer, req: &Message) -> Message {
    match req.msg_type {
        MessageType::Create => handle_create(nm, req).await,
        MessageType::Delete => handle_delete(nm, req).await,
        MessageType::Info => handle_info(nm, req).await,
        MessageType::View => handle_view(nm, req),
        MessageType::List => handle_list(nm),
        MessageType::AddAccess => handle_add_access(nm, req),
        MessageType::RemAccess => handle_rem_access(nm, req),
        MessageType::Exec => Message::error(Status::InvalidOperation),
        MessageType::Move => handle_move(nm, req).await,
        MessageType::CreateFolder => handle_create_folder(nm, req).await,
        MessageType::ViewFolder => handle_view_folder(nm, req),
        MessageType::Checkpoint
        | MessageType::ViewCheckpoint
        | MessageType::Revert
        | MessageType::ListCheckpoints => handle_checkpoint_family(nm, req).await,
        MessageType::RequestAccess => handle_request_access(nm, req),
        MessageType::ViewRequests => handle_view_requests(nm, req),
        MessageType::ApproveRequest => handle_approve_request(nm, req),
        MessageType::DenyRequest => handle_deny_request(nm, req),
        MessageType::Read | MessageType::Write | MessageType::Stream | MessageType::Undo => {
            handle_data_op(nm, req)
        }
        _ => {
            let mut m = Message::error(Status::InvalidOperation);
            m.data = "unexpected message type on client channel".into();
            m
        }
    }
}

fn required_access(msg_type: MessageType) -> AccessType {
    match msg_type {
        MessageType::Write | MessageType::Undo => AccessType::Write,
        _ => AccessType::Read,
    }
}

/// Read/Write/Stream/Undo: ACL-check and return the owning SS's
/// `ip:client_port` rather than performing the operation here (SPEC_FULL.md
/// §4.13). The client opens a second connection to that address.
fn handle_data_op(nm: &NameServer, req: &Message) -> Message {
    let Some(mut meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if !meta.grants(&req.sender, required_access(req.msg_type)) {
        return Message::error(Status::AccessDenied);
    }
    let Some(conn) = nm.ss_registry.get(meta.ss_id) else {
        return Message::error(Status::SsUnavailable);
    };
    if !conn.is_active() {
        return Message::error(Status::SsUnavailable);
    }
    let endpoint = conn.info.lock().unwrap().client_endpoint();

    meta.accessed = std::time::SystemTime::now();
    meta.last_accessed_by = req.sender.clone();
    nm.put_file_meta(meta);

    let mut reply = Message::reply(Status::Success);
    reply.data = endpoint;
    reply.ss_id = conn.info.lock().unwrap().id;
    reply
}

async fn handle_create(nm: &NameServer, req: &Message) -> Message {
    if nm.file_meta(&req.filename).is_some() {
        return Message::error(Status::Exists);
    }
    let Some(conn) = nm.ss_registry.next_active() else {
        return Message::error(Status::SsUnavailable);
    };
    let ss_id = conn.info.lock().unwrap().id;

    let mut create_req = Message::new(MessageType::Create);
    create_req.filename = req.filename.clone();
    create_req.sender = req.sender.clone();

    let reply = {
        let mut stream = conn.lock_stream().await;
        if net::send_message(&mut stream, &create_req).await.is_err() {
            return Message::error(Status::SsUnavailable);
        }
        match net::recv_message(&mut stream).await {
            Ok(r) => r,
            Err(_) => return Message::error(Status::SsUnavailable),
        }
    };
    if reply.status != Status::Success {
        return reply;
    }

    let meta = crate::domain::FileMetadata::new(&req.filename, &req.foldername, &req.sender, ss_id);
    nm.put_file_meta(meta);
    Message::reply(Status::Success)
}

async fn handle_delete(nm: &NameServer, req: &Message) -> Message {
    let Some(meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    let Some(conn) = nm.ss_registry.get(meta.ss_id) else {
        return Message::error(Status::SsUnavailable);
    };

    // Single critical section across CHECK_LOCKS then DELETE, per
    // SPEC_FULL.md §9's "per-SS socket serialization": hold the one guard
    // for both round trips so no other forward interleaves its own request.
    let mut stream = conn.lock_stream().await;

    let mut check_req = Message::new(MessageType::CheckLocks);
    check_req.filename = req.filename.clone();
    if net::send_message(&mut stream, &check_req).await.is_err() {
        return Message::error(Status::SsUnavailable);
    }
    let check_reply = match net::recv_message(&mut stream).await {
        Ok(r) => r,
        Err(_) => return Message::error(Status::SsUnavailable),
    };
    if check_reply.status == Status::FileLocked {
        return Message::error(Status::FileLocked);
    }

    let mut del_req = Message::new(MessageType::Delete);
    del_req.filename = req.filename.clone();
    if net::send_message(&mut stream, &del_req).await.is_err() {
        return Message::error(Status::SsUnavailable);
    }
    let del_reply = match net::recv_message(&mut stream).await {
        Ok(r) => r,
        Err(_) => return Message::error(Status::SsUnavailable),
    };
    drop(stream);

    if del_reply.status == Status::Success {
        nm.remove_file_meta(&req.filename);
    }
    del_reply
}

/// SPEC_FULL.md §9 Open Question 2: `VIEW -l`/`INFO` figures are
/// best-effort — every `INFO` call forwards a live `SS_INFO` fetch to the
/// owning SS (when active) and folds the reply into the cached metadata
/// before answering; if the SS is unreachable, NM falls back to whatever
/// it already has cached rather than failing the call.
async fn handle_info(nm: &NameServer, req: &Message) -> Message {
    let Some(mut meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if !meta.grants(&req.sender, AccessType::Read) {
        return Message::error(Status::AccessDenied);
    }

    if let Some(conn) = nm.ss_registry.get(meta.ss_id) {
        if conn.is_active() {
            let mut info_req = Message::new(MessageType::SsInfo);
            info_req.filename = req.filename.clone();
            let mut stream = conn.lock_stream().await;
            if net::send_message(&mut stream, &info_req).await.is_ok() {
                if let Ok(reply) = net::recv_message(&mut stream).await {
                    drop(stream);
                    if reply.status == Status::Success {
                        apply_ss_info(&mut meta, &reply.data);
                        nm.put_file_meta(meta.clone());
                    }
                }
            }
        }
    }

    let mut reply = Message::reply(Status::Success);
    reply.data = format!(
        "owner={} folder={} ss_id={} size={} words={} chars={}",
        meta.owner, meta.folder_path, meta.ss_id, meta.size, meta.word_count, meta.char_count
    );
    reply
}

/// Parses the `size|words|chars|modified|accessed` line `SS_INFO` replies
/// with and folds it into the cached metadata.
fn apply_ss_info(meta: &mut crate::domain::FileMetadata, data: &str) {
    let mut parts = data.split('|');
    let Some(size) = parts.next().and_then(|s| s.parse::<u64>().ok()) else { return };
    let Some(words) = parts.next().and_then(|s| s.parse::<u32>().ok()) else { return };
    let Some(chars) = parts.next().and_then(|s| s.parse::<u32>().ok()) else { return };
    let modified = parts.next().and_then(|s| s.parse::<u64>().ok());
    let accessed = parts.next().and_then(|s| s.parse::<u64>().ok());

    meta.size = size;
    meta.word_count = words;
    meta.char_count = chars;
    if let Some(secs) = modified {
        meta.modified = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs);
    }
    if let Some(secs) = accessed {
        meta.accessed = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs);
    }
}

fn handle_view(nm: &NameServer, req: &Message) -> Message {
    let mut names: Vec<String> = nm
        .all_files()
        .into_iter()
        .filter(|m| m.grants(&req.sender, AccessType::Read))
        .map(|m| m.filename)
        .collect();
    names.sort();
    let mut reply = Message::reply(Status::Success);
    reply.data = names.join(",");
    reply
}

fn handle_list(nm: &NameServer) -> Message {
    let mut reply = Message::reply(Status::Success);
    reply.data = nm.users.list_usernames().join(",");
    reply
}

fn handle_add_access(nm: &NameServer, req: &Message) -> Message {
    let Some(mut meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    match meta.acl_entry_mut(&req.target_user) {
        Some(entry) => entry.access = req.access,
        None => meta.acl.push(crate::domain::AclEntry { username: req.target_user.clone(), access: req.access }),
    }
    nm.put_file_meta(meta);
    Message::reply(Status::Success)
}

fn handle_rem_access(nm: &NameServer, req: &Message) -> Message {
    let Some(mut meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    meta.acl.retain(|e| e.username != req.target_user);
    nm.put_file_meta(meta);
    Message::reply(Status::Success)
}

async fn handle_move(nm: &NameServer, req: &Message) -> Message {
    let Some(mut meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    let target = super::canonicalize_folder_path(&req.target_path);
    if target != "/" && nm.folders.search(&target).is_none() {
        return Message::error(Status::NotFound);
    }
    let Some(conn) = nm.ss_registry.get(meta.ss_id) else {
        return Message::error(Status::SsUnavailable);
    };
    let mut move_req = Message::new(MessageType::Move);
    move_req.filename = req.filename.clone();
    move_req.target_path = target.clone();
    let reply = {
        let mut stream = conn.lock_stream().await;
        if net::send_message(&mut stream, &move_req).await.is_err() {
            return Message::error(Status::SsUnavailable);
        }
        match net::recv_message(&mut stream).await {
            Ok(r) => r,
            Err(_) => return Message::error(Status::SsUnavailable),
        }
    };
    if reply.status == Status::Success {
        meta.folder_path = target;
        nm.put_file_meta(meta);
    }
    reply
}

async fn handle_create_folder(nm: &NameServer, req: &Message) -> Message {
    let path = super::canonicalize_folder_path(&req.foldername);
    let parent = parent_path(&path);
    if parent != "/" && nm.folders.search(&parent).is_none() {
        return Message::error(Status::NotFound);
    }
    if nm.folders.search(&path).is_some() {
        return Message::error(Status::Exists);
    }
    let Some(conn) = nm.ss_registry.next_active() else {
        return Message::error(Status::SsUnavailable);
    };
    let ss_id = conn.info.lock().unwrap().id;

    let mut create_req = Message::new(MessageType::CreateFolder);
    create_req.foldername = path.clone();
    let reply = {
        let mut stream = conn.lock_stream().await;
        if net::send_message(&mut stream, &create_req).await.is_err() {
            return Message::error(Status::SsUnavailable);
        }
        match net::recv_message(&mut stream).await {
            Ok(r) => r,
            Err(_) => return Message::error(Status::SsUnavailable),
        }
    };
    if reply.status == Status::Success {
        let meta = crate::domain::FolderMetadata::new(&path, &parent, &req.sender, ss_id);
        let _ = nm.folders.insert(&path, meta);
    }
    reply
}

fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

fn handle_view_folder(nm: &NameServer, req: &Message) -> Message {
    let path = super::canonicalize_folder_path(&req.foldername);
    if nm.folders.search(&path).is_none() {
        return Message::error(Status::NotFound);
    }
    let mut names: Vec<String> = nm
        .all_files()
        .into_iter()
        .filter(|m| m.folder_path == path && m.grants(&req.sender, AccessType::Read))
        .map(|m| m.filename)
        .collect();
    names.sort();
    let mut reply = Message::reply(Status::Success);
    reply.data = names.join(",");
    reply
}

/// Checkpoint family is a thin ACL-checked pass-through to the owning SS;
/// the SS's `fileops` sidecar logic does the actual work (SPEC_FULL.md §4.11).
async fn handle_checkpoint_family(nm: &NameServer, req: &Message) -> Message {
    let Some(meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    let required = if req.msg_type == MessageType::ViewCheckpoint || req.msg_type == MessageType::ListCheckpoints {
        AccessType::Read
    } else {
        AccessType::Write
    };
    if !meta.grants(&req.sender, required) {
        return Message::error(Status::AccessDenied);
    }
    let Some(conn) = nm.ss_registry.get(meta.ss_id) else {
        return Message::error(Status::SsUnavailable);
    };
    let mut stream = conn.lock_stream().await;
    if net::send_message(&mut stream, req).await.is_err() {
        return Message::error(Status::SsUnavailable);
    }
    match net::recv_message(&mut stream).await {
        Ok(r) => r,
        Err(_) => Message::error(Status::SsUnavailable),
    }
}

fn handle_request_access(nm: &NameServer, req: &Message) -> Message {
    let Some(meta) = nm.file_meta(&req.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.grants(&req.sender, req.access) {
        let mut reply = Message::reply(Status::Success);
        reply.data = "already satisfied".into();
        return reply;
    }
    match nm.access_requests.request(&req.sender, &req.filename, req.access) {
        Some(_) => Message::reply(Status::Success),
        None => {
            let mut reply = Message::reply(Status::Success);
            reply.data = "already pending".into();
            reply
        }
    }
}

fn handle_view_requests(nm: &NameServer, req: &Message) -> Message {
    let owned: Vec<String> = nm.files_owned_by(&req.sender).into_iter().map(|m| m.filename).collect();
    let pending = nm.access_requests.pending_for_files(&owned);
    let mut reply = Message::reply(Status::Success);
    reply.data = pending
        .iter()
        .map(|r| format!("{}:{}:{}:{}", r.id, r.username, r.filename, r.requested_access as i32))
        .collect::<Vec<_>>()
        .join(",");
    reply
}

fn handle_approve_request(nm: &NameServer, req: &Message) -> Message {
    let Some(entry) = nm.access_requests.find(req.sentence_index) else {
        return Message::error(Status::NotFound);
    };
    let Some(mut meta) = nm.file_meta(&entry.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    match meta.acl_entry_mut(&entry.username) {
        Some(e) => e.access = entry.requested_access,
        None => meta.acl.push(crate::domain::AclEntry { username: entry.username.clone(), access: entry.requested_access }),
    }
    nm.put_file_meta(meta);
    nm.access_requests.remove(entry.id);
    Message::reply(Status::Success)
}

fn handle_deny_request(nm: &NameServer, req: &Message) -> Message {
    let Some(entry) = nm.access_requests.find(req.sentence_index) else {
        return Message::error(Status::NotFound);
    };
    let Some(meta) = nm.file_meta(&entry.filename) else {
        return Message::error(Status::NotFound);
    };
    if meta.owner != req.sender {
        return Message::error(Status::NotOwner);
    }
    nm.access_requests.remove(entry.id);
    Message::reply(Status::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_access_is_write_only_for_write_and_undo() {
        assert_eq!(required_access(MessageType::Write), AccessType::Write);
        assert_eq!(required_access(MessageType::Undo), AccessType::Write);
        assert_eq!(required_access(MessageType::Read), AccessType::Read);
        assert_eq!(required_access(MessageType::Stream), AccessType::Read);
    }

    #[test]
    fn parent_path_of_top_level_folder_is_root() {
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/a/b"), "/a");
    }

    #[test]
    fn data_op_denies_without_acl_entry() {
        let nm = NameServer::new(0, 0, 0);
        nm.put_file_meta(crate::domain::FileMetadata::new("notes.txt", "/", "alice", 1));
        let mut req = Message::new(MessageType::Read);
        req.sender = "bob".into();
        req.filename = "notes.txt".into();
        assert_eq!(handle_data_op(&nm, &req).status, Status::AccessDenied);
    }

    #[test]
    fn data_op_not_found_for_unknown_file() {
        let nm = NameServer::new(0, 0, 0);
        let mut req = Message::new(MessageType::Read);
        req.sender = "alice".into();
        req.filename = "missing.txt".into();
        assert_eq!(handle_data_op(&nm, &req).status, Status::NotFound);
    }

    #[test]
    fn apply_ss_info_parses_the_stat_line_into_metadata() {
        let mut meta = crate::domain::FileMetadata::new("notes.txt", "/", "alice", 1);
        apply_ss_info(&mut meta, "9|2|9|1700000000|1700000100");
        assert_eq!(meta.size, 9);
        assert_eq!(meta.word_count, 2);
        assert_eq!(meta.char_count, 9);
    }

    #[test]
    fn apply_ss_info_ignores_a_malformed_line() {
        let mut meta = crate::domain::FileMetadata::new("notes.txt", "/", "alice", 1);
        meta.size = 42;
        apply_ss_info(&mut meta, "not-a-number");
        assert_eq!(meta.size, 42);
    }
}
