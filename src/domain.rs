//! Metadata records tracked by the name server: files, folders, access
//! control entries, storage servers, connected clients, registered users and
//! pending access requests.
//!
//! Grounded on `examples/original_source/common.h`'s `FileMetadata`,
//! `FolderMetadata`, `ACLEntry`, `StorageServerInfo`, `ClientInfo`,
//! `RegisteredUser` and `AccessRequest` structs. Fixed-size C arrays
//! (`MAX_ACL_ENTRIES`, `MAX_FILES` file lists, etc.) become `Vec`s; `time_t`
//! timestamps become [`SystemTime`].

use std::time::SystemTime;

use crate::message::AccessType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub username: String,
    pub access: AccessType,
}

#[derive(Clone, Debug)]
pub struct FileMetadata {
    pub filename: String,
    pub folder_path: String,
    pub owner: String,
    pub ss_id: i32,
    pub size: u64,
    pub word_count: u32,
    pub char_count: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub last_accessed_by: String,
    pub acl: Vec<AclEntry>,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, folder_path: impl Into<String>, owner: impl Into<String>, ss_id: i32) -> Self {
        let now = SystemTime::now();
        FileMetadata {
            filename: filename.into(),
            folder_path: folder_path.into(),
            owner: owner.into(),
            ss_id,
            size: 0,
            word_count: 0,
            char_count: 0,
            created: now,
            modified: now,
            accessed: now,
            last_accessed_by: String::new(),
            acl: Vec::new(),
        }
    }

    /// The owner always has implicit read-write access; otherwise an ACL
    /// entry must exist and satisfy the requested level.
    pub fn grants(&self, username: &str, required: AccessType) -> bool {
        if self.owner == username {
            return true;
        }
        self.acl
            .iter()
            .find(|e| e.username == username)
            .is_some_and(|e| e.access.satisfies(required))
    }

    pub fn acl_entry_mut(&mut self, username: &str) -> Option<&mut AclEntry> {
        self.acl.iter_mut().find(|e| e.username == username)
    }
}

#[derive(Clone, Debug)]
pub struct FolderMetadata {
    pub foldername: String,
    pub parent_path: String,
    pub owner: String,
    pub created: SystemTime,
    pub ss_id: i32,
    pub acl: Vec<AclEntry>,
}

impl FolderMetadata {
    pub fn new(foldername: impl Into<String>, parent_path: impl Into<String>, owner: impl Into<String>, ss_id: i32) -> Self {
        FolderMetadata {
            foldername: foldername.into(),
            parent_path: parent_path.into(),
            owner: owner.into(),
            created: SystemTime::now(),
            ss_id,
            acl: Vec::new(),
        }
    }

    pub fn grants(&self, username: &str, required: AccessType) -> bool {
        if self.owner == username {
            return true;
        }
        self.acl
            .iter()
            .find(|e| e.username == username)
            .is_some_and(|e| e.access.satisfies(required))
    }
}

/// A running storage server, as tracked by the name server's registry.
#[derive(Clone, Debug)]
pub struct StorageServerInfo {
    pub id: i32,
    pub ip: String,
    pub nm_port: u16,
    pub client_port: u16,
    pub active: bool,
    pub last_heartbeat: SystemTime,
    pub files: Vec<String>,
}

impl StorageServerInfo {
    pub fn client_endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.client_port)
    }
}

#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub username: String,
    pub ip: String,
    pub connected: SystemTime,
}

#[derive(Clone, Debug)]
pub struct RegisteredUser {
    pub username: String,
    pub first_registered: SystemTime,
    pub last_seen: SystemTime,
    pub active_session: bool,
}

#[derive(Clone, Debug)]
pub struct AccessRequest {
    pub id: i32,
    pub username: String,
    pub filename: String,
    pub requested_access: AccessType,
    pub request_time: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_always_satisfies_access() {
        let meta = FileMetadata::new("notes.txt", "/", "alice", 1);
        assert!(meta.grants("alice", AccessType::ReadWrite));
    }

    #[test]
    fn non_owner_needs_acl_entry() {
        let mut meta = FileMetadata::new("notes.txt", "/", "alice", 1);
        assert!(!meta.grants("bob", AccessType::Read));
        meta.acl.push(AclEntry { username: "bob".into(), access: AccessType::Read });
        assert!(meta.grants("bob", AccessType::Read));
        assert!(!meta.grants("bob", AccessType::Write));
    }
}
