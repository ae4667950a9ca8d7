//! Wire message format shared by every NM/SS/Client connection.
//!
//! A [`Message`] is a fixed-schema record, serialized as `|`-delimited fields
//! with the free-form `data` field last so it may itself contain `|`. Framing
//! (length prefix, partial read/write handling) lives in [`crate::net`].

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::{FromPrimitive, ToPrimitive};

/// Maximum encoded frame size, matching the 16 KiB ceiling enforced on both ends.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Message type codes, stable within a single running deployment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum MessageType {
    RegSs = 0,
    RegClient = 1,
    Create = 2,
    Read = 3,
    Write = 4,
    Delete = 5,
    Info = 6,
    View = 7,
    List = 8,
    AddAccess = 9,
    RemAccess = 10,
    Stream = 11,
    Exec = 12,
    Undo = 13,
    LockSentence = 14,
    UnlockSentence = 15,
    Ack = 16,
    Nack = 17,
    Data = 18,
    Error = 19,
    Stop = 20,
    CheckLocks = 21,
    CreateFolder = 22,
    Move = 23,
    ViewFolder = 24,
    Checkpoint = 25,
    ViewCheckpoint = 26,
    Revert = 27,
    ListCheckpoints = 28,
    RequestAccess = 29,
    ViewRequests = 30,
    ApproveRequest = 31,
    DenyRequest = 32,
    SsInfo = 33,
    CancelWrite = 34,
    CommitWrite = 35,
}

/// Reply status codes, carried in every response's `status` field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum Status {
    Success = 200,
    InvalidIndex = 400,
    NotOwner = 401,
    AccessDenied = 403,
    NotFound = 404,
    InvalidOperation = 405,
    UserNotFound = 406,
    Exists = 409,
    SentenceLocked = 423,
    FileLocked = 424,
    ServerError = 500,
    SsUnavailable = 503,
}

impl Status {
    pub fn code(self) -> i32 {
        self.to_i32().unwrap()
    }
}

/// Access levels an ACL entry or an access request may carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive, Default)]
#[repr(i32)]
pub enum AccessType {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl AccessType {
    /// Whether this grant satisfies a request for `required` access.
    pub fn satisfies(self, required: AccessType) -> bool {
        match required {
            AccessType::Read => matches!(self, AccessType::Read | AccessType::ReadWrite),
            AccessType::Write => matches!(self, AccessType::Write | AccessType::ReadWrite),
            AccessType::ReadWrite => matches!(self, AccessType::ReadWrite),
            AccessType::None => true,
        }
    }
}

/// The fixed-schema record exchanged on every connection.
///
/// Field order here is also the wire order; `data` stays last because it is
/// the only field allowed to contain the `|` delimiter.
#[derive(Clone, Debug)]
pub struct Message {
    pub msg_type: MessageType,
    pub status: Status,
    pub sender: String,
    pub filename: String,
    pub foldername: String,
    pub target_path: String,
    pub sentence_index: i32,
    pub word_index: i32,
    pub ss_id: i32,
    pub client_port: i32,
    pub nm_port: i32,
    pub access: AccessType,
    pub target_user: String,
    pub checkpoint_tag: String,
    pub data: String,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            msg_type: MessageType::Ack,
            status: Status::Success,
            sender: String::new(),
            filename: String::new(),
            foldername: String::new(),
            target_path: String::new(),
            sentence_index: -1,
            word_index: -1,
            ss_id: -1,
            client_port: 0,
            nm_port: 0,
            access: AccessType::None,
            target_user: String::new(),
            checkpoint_tag: String::new(),
            data: String::new(),
        }
    }
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Message { msg_type, ..Default::default() }
    }

    pub fn reply(status: Status) -> Self {
        Message { msg_type: MessageType::Ack, status, ..Default::default() }
    }

    pub fn error(status: Status) -> Self {
        Message { msg_type: MessageType::Error, status, ..Default::default() }
    }

    /// Encodes the 14 fixed fields in wire order, `|`-joined, `data` last.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.msg_type.to_i32().unwrap(),
            self.status.code(),
            self.sender,
            self.filename,
            self.foldername,
            self.target_path,
            self.sentence_index,
            self.word_index,
            self.ss_id,
            self.client_port,
            self.nm_port,
            self.access.to_i32().unwrap(),
            self.target_user,
            self.checkpoint_tag,
        ) + "|"
            + &self.data
    }

    /// Parses a `|`-delimited record. Unknown/missing/malformed fields fall
    /// back to the same defaults [`Message::default`] would produce, rather
    /// than failing the whole decode; only the frame-level length check in
    /// [`crate::net`] rejects oversized input.
    pub fn decode(buf: &str) -> Message {
        let mut msg = Message::default();
        let mut parts = buf.splitn(15, '|');

        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.msg_type = MessageType::from_i32(n).unwrap_or(MessageType::Ack);
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.status = Status::from_i32(n).unwrap_or(Status::ServerError);
            }
        }
        if let Some(t) = parts.next() {
            msg.sender = t.to_string();
        }
        if let Some(t) = parts.next() {
            msg.filename = t.to_string();
        }
        if let Some(t) = parts.next() {
            msg.foldername = t.to_string();
        }
        if let Some(t) = parts.next() {
            msg.target_path = t.to_string();
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.sentence_index = n;
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.word_index = n;
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.ss_id = n;
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.client_port = n;
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.nm_port = n;
            }
        }
        if let Some(t) = parts.next().filter(|s| !s.is_empty()) {
            if let Ok(n) = t.parse::<i32>() {
                msg.access = AccessType::from_i32(n).unwrap_or(AccessType::None);
            }
        }
        if let Some(t) = parts.next() {
            msg.target_user = t.to_string();
        }
        if let Some(t) = parts.next() {
            msg.checkpoint_tag = t.to_string();
        }
        if let Some(t) = parts.next() {
            msg.data = t.to_string();
        }

        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut msg = Message::new(MessageType::Write);
        msg.sender = "alice".into();
        msg.filename = "notes.txt".into();
        msg.sentence_index = 2;
        msg.word_index = 3;
        msg.access = AccessType::ReadWrite;
        msg.data = "hello | world".into();

        let decoded = Message::decode(&msg.encode());
        assert_eq!(decoded.msg_type, MessageType::Write);
        assert_eq!(decoded.sender, "alice");
        assert_eq!(decoded.filename, "notes.txt");
        assert_eq!(decoded.sentence_index, 2);
        assert_eq!(decoded.word_index, 3);
        assert_eq!(decoded.access, AccessType::ReadWrite);
        assert_eq!(decoded.data, "hello | world");
    }

    #[test]
    fn missing_numeric_fields_fall_back_to_defaults() {
        let decoded = Message::decode("16|200||||||||||||");
        assert_eq!(decoded.sentence_index, -1);
        assert_eq!(decoded.word_index, -1);
        assert_eq!(decoded.ss_id, -1);
    }

    #[test]
    fn access_satisfaction_rules() {
        assert!(AccessType::ReadWrite.satisfies(AccessType::Read));
        assert!(AccessType::ReadWrite.satisfies(AccessType::Write));
        assert!(AccessType::Read.satisfies(AccessType::Read));
        assert!(!AccessType::Read.satisfies(AccessType::Write));
        assert!(!AccessType::Write.satisfies(AccessType::Read));
    }
}
