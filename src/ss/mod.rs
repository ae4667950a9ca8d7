//! Storage server: owns on-disk file content under `ss_storage_<id>`, and
//! serves two kinds of peer — the name server, over a persistent command
//! connection it dials out to, and clients, who connect in directly to read
//! and write staged sentence edits.
//!
//! Grounded on `examples/original_source/ss.c`'s top-level structure: one
//! state struct shared by the NM command loop, the heartbeat loop, and every
//! client connection task.

pub mod client_handler;
pub mod heartbeat;
pub mod nm_handler;

use std::path::{Path, PathBuf};

use crate::commitqueue::CommitQueueRegistry;
use crate::locks::SentenceLockTable;
use crate::writesession::WriteSessionStore;

pub struct StorageServer {
    pub id: i32,
    pub storage_root: PathBuf,
    pub client_port: u16,
    pub nm_command_port: u16,
    pub locks: SentenceLockTable,
    pub sessions: WriteSessionStore,
    pub commit_queues: CommitQueueRegistry,
}

impl StorageServer {
    pub fn new(id: i32, storage_root: PathBuf, client_port: u16, nm_command_port: u16) -> Self {
        StorageServer {
            id,
            storage_root,
            client_port,
            nm_command_port,
            locks: SentenceLockTable::new(),
            sessions: WriteSessionStore::new(),
            commit_queues: CommitQueueRegistry::new(),
        }
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.storage_root.join(filename)
    }

    /// Lists the files the SS advertises to NM: everything in the storage
    /// root except per-writer temp files, undo backups, and checkpoint
    /// snapshots (SPEC_FULL.md §4.15).
    pub async fn scan_reportable_files(&self) -> std::io::Result<Vec<String>> {
        tokio::fs::create_dir_all(&self.storage_root).await?;
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.storage_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_reportable_file(name) {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }
}

fn is_reportable_file(name: &str) -> bool {
    !name.contains(".temp_") && !name.ends_with(".undo") && !name.contains(".checkpoint_")
}

pub fn storage_root_for(base: &Path, id: i32) -> PathBuf {
    base.join(format!("ss_storage_{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reportable_file_filter_excludes_sidecars() {
        assert!(is_reportable_file("notes.txt"));
        assert!(!is_reportable_file("notes.txt.temp_alice_0"));
        assert!(!is_reportable_file("notes.txt.undo"));
        assert!(!is_reportable_file("notes.txt.checkpoint_v1"));
    }
}
