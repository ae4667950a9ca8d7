//! Client library: connects to the name server for metadata operations and
//! endpoint lookups, then opens a direct connection to the owning storage
//! server for reads, write sessions, streaming, and undo.
//!
//! Grounded on `examples/original_source/client.c`'s connection management
//! and retry loop (SPEC_FULL.md §4.13, §5). No interactive UI lives here —
//! that is explicitly out of scope (SPEC_FULL.md §1); this module is the
//! protocol surface a UI or test would drive.

use tokio::net::TcpStream;
use tracing::warn;

use crate::message::{AccessType, Message, MessageType, Status};
use crate::net;

/// SPEC_FULL.md §5: a client retries a broken write-session connection up
/// to this many times, re-resolving the SS endpoint and re-acquiring the
/// lock each time, before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub enum ClientError {
    /// A status the server returned in-band; not a transport failure.
    Status(Status),
    Io(std::io::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Status(s) => write!(f, "server returned {:?}", s),
            ClientError::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

fn expect_success(reply: Message) -> Result<Message, ClientError> {
    if reply.status == Status::Success {
        Ok(reply)
    } else {
        Err(ClientError::Status(reply.status))
    }
}

/// One streamed real token: its text and whether a trailing space is needed
/// before the next one (SPEC_FULL.md §4.9). Carried in the `ss_id` wire
/// field rather than `status`, since `Status` has no boolean variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken {
    pub sentence_index: i32,
    pub word_index: i32,
    pub text: String,
    pub needs_trailing_space: bool,
}

/// A connection to the name server, authenticated as one username.
pub struct NmConnection {
    stream: TcpStream,
    username: String,
}

impl NmConnection {
    /// Dials `nm_addr` and registers `username` as an active session.
    pub async fn connect(nm_ip: &str, nm_port: u16, username: &str) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect((nm_ip, nm_port)).await?;
        let mut reg = Message::new(MessageType::RegClient);
        reg.sender = username.to_string();
        net::send_message(&mut stream, &reg).await?;
        let reply = net::recv_message(&mut stream).await?;
        expect_success(reply)?;
        Ok(NmConnection { stream, username: username.to_string() })
    }

    fn request(&self, msg_type: MessageType) -> Message {
        let mut m = Message::new(msg_type);
        m.sender = self.username.clone();
        m
    }

    async fn roundtrip(&mut self, req: &Message) -> Result<Message, ClientError> {
        net::send_message(&mut self.stream, req).await?;
        Ok(net::recv_message(&mut self.stream).await?)
    }

    pub async fn create(&mut self, filename: &str, foldername: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::Create);
        req.filename = filename.to_string();
        req.foldername = foldername.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn delete(&mut self, filename: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::Delete);
        req.filename = filename.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn info(&mut self, filename: &str) -> Result<String, ClientError> {
        let mut req = self.request(MessageType::Info);
        req.filename = filename.to_string();
        Ok(expect_success(self.roundtrip(&req).await?)?.data)
    }

    /// Every file visible (readable) to this user.
    pub async fn view(&mut self) -> Result<Vec<String>, ClientError> {
        let req = self.request(MessageType::View);
        let reply = expect_success(self.roundtrip(&req).await?)?;
        Ok(reply.data.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn list_users(&mut self) -> Result<Vec<String>, ClientError> {
        let req = self.request(MessageType::List);
        let reply = expect_success(self.roundtrip(&req).await?)?;
        Ok(reply.data.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn add_access(&mut self, filename: &str, target_user: &str, access: AccessType) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::AddAccess);
        req.filename = filename.to_string();
        req.target_user = target_user.to_string();
        req.access = access;
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn rem_access(&mut self, filename: &str, target_user: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::RemAccess);
        req.filename = filename.to_string();
        req.target_user = target_user.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn move_file(&mut self, filename: &str, target_path: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::Move);
        req.filename = filename.to_string();
        req.target_path = target_path.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn create_folder(&mut self, foldername: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::CreateFolder);
        req.foldername = foldername.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn view_folder(&mut self, foldername: &str) -> Result<Vec<String>, ClientError> {
        let mut req = self.request(MessageType::ViewFolder);
        req.foldername = foldername.to_string();
        let reply = expect_success(self.roundtrip(&req).await?)?;
        Ok(reply.data.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn checkpoint(&mut self, filename: &str, tag: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::Checkpoint);
        req.filename = filename.to_string();
        req.checkpoint_tag = tag.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn list_checkpoints(&mut self, filename: &str) -> Result<Vec<String>, ClientError> {
        let mut req = self.request(MessageType::ListCheckpoints);
        req.filename = filename.to_string();
        let reply = expect_success(self.roundtrip(&req).await?)?;
        Ok(reply.data.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn view_checkpoint(&mut self, filename: &str, tag: &str) -> Result<String, ClientError> {
        let mut req = self.request(MessageType::ViewCheckpoint);
        req.filename = filename.to_string();
        req.checkpoint_tag = tag.to_string();
        Ok(expect_success(self.roundtrip(&req).await?)?.data)
    }

    pub async fn revert(&mut self, filename: &str, tag: &str) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::Revert);
        req.filename = filename.to_string();
        req.checkpoint_tag = tag.to_string();
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn request_access(&mut self, filename: &str, access: AccessType) -> Result<String, ClientError> {
        let mut req = self.request(MessageType::RequestAccess);
        req.filename = filename.to_string();
        req.access = access;
        Ok(expect_success(self.roundtrip(&req).await?)?.data)
    }

    /// `id:username:filename:access` tuples, one per pending request on
    /// files this user owns.
    pub async fn view_requests(&mut self) -> Result<Vec<String>, ClientError> {
        let req = self.request(MessageType::ViewRequests);
        let reply = expect_success(self.roundtrip(&req).await?)?;
        Ok(reply.data.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn approve_request(&mut self, request_id: i32) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::ApproveRequest);
        req.sentence_index = request_id;
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    pub async fn deny_request(&mut self, request_id: i32) -> Result<(), ClientError> {
        let mut req = self.request(MessageType::DenyRequest);
        req.sentence_index = request_id;
        expect_success(self.roundtrip(&req).await?)?;
        Ok(())
    }

    /// Resolves `filename`'s owning storage server for a data operation
    /// (read/write/stream/undo), returning its `ip:client_port`.
    async fn resolve_ss(&mut self, filename: &str, msg_type: MessageType) -> Result<String, ClientError> {
        let mut req = self.request(msg_type);
        req.filename = filename.to_string();
        Ok(expect_success(self.roundtrip(&req).await?)?.data)
    }
}

/// A write session against one sentence of one file on one storage server,
/// transparently reconnecting and re-locking on transport failure
/// (SPEC_FULL.md §5).
pub struct SsSession {
    nm: NmConnection,
    stream: TcpStream,
    filename: String,
    sentence_index: i32,
    username: String,
}

impl SsSession {
    /// Resolves the owning SS via `nm`, connects, and acquires the lock.
    pub async fn lock(mut nm: NmConnection, filename: &str, sentence_index: i32) -> Result<Self, ClientError> {
        let username = nm.username.clone();
        let endpoint = nm.resolve_ss(filename, MessageType::Write).await?;
        let mut stream = dial(&endpoint).await?;
        send_lock(&mut stream, &username, filename, sentence_index).await?;
        Ok(SsSession { nm, stream, filename: filename.to_string(), sentence_index, username })
    }

    /// Stages a word at `word_index`, retrying up to
    /// [`MAX_RECONNECT_ATTEMPTS`] times if the connection drops.
    pub async fn write(&mut self, word_index: i32, content: &str) -> Result<(), ClientError> {
        for attempt in 0..=MAX_RECONNECT_ATTEMPTS {
            let mut req = Message::new(MessageType::Write);
            req.sender = self.username.clone();
            req.filename = self.filename.clone();
            req.sentence_index = self.sentence_index;
            req.word_index = word_index;
            req.data = content.to_string();

            match send_recv(&mut self.stream, &req).await {
                Ok(reply) => return expect_success(reply).map(|_| ()),
                Err(ClientError::Io(e)) if attempt < MAX_RECONNECT_ATTEMPTS => {
                    warn!(error = %e, attempt, "write session connection lost, reconnecting");
                    self.reconnect_and_relock().await?;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop always returns before exhausting its range")
    }

    async fn reconnect_and_relock(&mut self) -> Result<(), ClientError> {
        let endpoint = self.nm.resolve_ss(&self.filename, MessageType::Write).await?;
        self.stream = dial(&endpoint).await?;
        send_lock(&mut self.stream, &self.username, &self.filename, self.sentence_index).await?;
        Ok(())
    }

    pub async fn commit(mut self) -> Result<(), ClientError> {
        let mut req = Message::new(MessageType::CommitWrite);
        req.sender = self.username.clone();
        req.filename = self.filename.clone();
        req.sentence_index = self.sentence_index;
        expect_success(send_recv(&mut self.stream, &req).await?)?;
        Ok(())
    }

    /// Discards staged edits without merging, matching the wire protocol's
    /// treatment of an unlock as an implicit cancel.
    pub async fn cancel(mut self) -> Result<(), ClientError> {
        let mut req = Message::new(MessageType::CancelWrite);
        req.sender = self.username.clone();
        req.filename = self.filename.clone();
        req.sentence_index = self.sentence_index;
        expect_success(send_recv(&mut self.stream, &req).await?)?;
        Ok(())
    }
}

async fn dial(endpoint: &str) -> Result<TcpStream, ClientError> {
    let (host, port) = endpoint.rsplit_once(':').ok_or(ClientError::Status(Status::ServerError))?;
    let port: u16 = port.parse().map_err(|_| ClientError::Status(Status::ServerError))?;
    Ok(TcpStream::connect((host, port)).await?)
}

async fn send_recv(stream: &mut TcpStream, req: &Message) -> Result<Message, ClientError> {
    net::send_message(stream, req).await?;
    Ok(net::recv_message(stream).await?)
}

async fn send_lock(stream: &mut TcpStream, username: &str, filename: &str, sentence_index: i32) -> Result<(), ClientError> {
    let mut req = Message::new(MessageType::LockSentence);
    req.sender = username.to_string();
    req.filename = filename.to_string();
    req.sentence_index = sentence_index;
    expect_success(send_recv(stream, &req).await?)?;
    Ok(())
}

/// Opens a direct connection to `filename`'s owning SS and reads its full
/// current content.
pub async fn read_file(nm: &mut NmConnection, filename: &str) -> Result<String, ClientError> {
    let endpoint = nm.resolve_ss(filename, MessageType::Read).await?;
    let mut stream = dial(&endpoint).await?;
    let mut req = Message::new(MessageType::Read);
    req.sender = nm.username.clone();
    req.filename = filename.to_string();
    Ok(expect_success(send_recv(&mut stream, &req).await?)?.data)
}

pub async fn undo(nm: &mut NmConnection, filename: &str) -> Result<(), ClientError> {
    let endpoint = nm.resolve_ss(filename, MessageType::Undo).await?;
    let mut stream = dial(&endpoint).await?;
    let mut req = Message::new(MessageType::Undo);
    req.sender = nm.username.clone();
    req.filename = filename.to_string();
    expect_success(send_recv(&mut stream, &req).await?)?;
    Ok(())
}

/// Consumes the token stream for `filename`, invoking `on_token` for each
/// real token until the server's STOP frame (SPEC_FULL.md §4.9). A 100ms
/// pause separates frames on the wire; this simply drains them as they
/// arrive rather than re-imposing its own delay.
pub async fn stream_file<F: FnMut(StreamToken)>(
    nm: &mut NmConnection,
    filename: &str,
    mut on_token: F,
) -> Result<(), ClientError> {
    let endpoint = nm.resolve_ss(filename, MessageType::Stream).await?;
    let mut stream = dial(&endpoint).await?;
    let mut req = Message::new(MessageType::Stream);
    req.sender = nm.username.clone();
    req.filename = filename.to_string();
    net::send_message(&mut stream, &req).await?;

    loop {
        let frame = net::recv_message(&mut stream).await?;
        match frame.msg_type {
            MessageType::Stop => return Ok(()),
            MessageType::Error => return Err(ClientError::Status(frame.status)),
            MessageType::Data => on_token(StreamToken {
                sentence_index: frame.sentence_index,
                word_index: frame.word_index,
                text: frame.data,
                needs_trailing_space: frame.ss_id != 0,
            }),
            _ => return Err(ClientError::Status(Status::ServerError)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_display_distinguishes_status_and_io() {
        let status_err = ClientError::Status(Status::NotFound);
        assert!(format!("{status_err}").contains("NotFound"));
        let io_err = ClientError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(format!("{io_err}").contains("boom"));
    }
}
