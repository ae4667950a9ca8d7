//! Per-writer staging area: a locked sentence gets its own temp copy of the
//! file, edited in place until the writer commits or cancels.
//!
//! Grounded on `examples/original_source/common.h`'s `WriteSession` struct
//! and the temp-file handling in `nm.c`/`ss.c`'s write/commit/cancel
//! handlers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::fileops;

#[derive(Clone, Debug)]
pub struct WriteSession {
    pub filename: String,
    pub username: String,
    pub sentence_idx: usize,
    pub temp_path: PathBuf,
    pub original_sentence_count: usize,
    pub lock_time: SystemTime,
}

type SessionKey = (String, String, usize);

/// The temp file name for a session: `<file>.temp_<user>_<idx>`, matching
/// `examples/original_source`'s convention so storage-root scans can
/// recognize and exclude it (§4.15 of SPEC_FULL.md).
pub fn temp_file_name(filename: &str, username: &str, sentence_idx: usize) -> String {
    format!("{filename}.temp_{username}_{sentence_idx}")
}

#[derive(Default)]
pub struct WriteSessionStore {
    sessions: RwLock<HashMap<SessionKey, WriteSession>>,
}

impl WriteSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(filename: &str, username: &str, sentence_idx: usize) -> SessionKey {
        (filename.to_string(), username.to_string(), sentence_idx)
    }

    /// Copies the current main file into a fresh temp file and records a
    /// session for it. The caller is expected to have already acquired the
    /// sentence lock.
    pub async fn begin(
        &self,
        storage_root: &Path,
        filename: &str,
        username: &str,
        sentence_idx: usize,
        original_sentence_count: usize,
    ) -> std::io::Result<WriteSession> {
        let main_path = storage_root.join(filename);
        let temp_path = storage_root.join(temp_file_name(filename, username, sentence_idx));

        let contents = match tokio::fs::read(&main_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        tokio::fs::write(&temp_path, contents).await?;

        let session = WriteSession {
            filename: filename.to_string(),
            username: username.to_string(),
            sentence_idx,
            temp_path,
            original_sentence_count,
            lock_time: SystemTime::now(),
        };
        self.sessions
            .write()
            .unwrap()
            .insert(Self::key(filename, username, sentence_idx), session.clone());
        Ok(session)
    }

    pub fn get(&self, filename: &str, username: &str, sentence_idx: usize) -> Option<WriteSession> {
        self.sessions
            .read()
            .unwrap()
            .get(&Self::key(filename, username, sentence_idx))
            .cloned()
    }

    fn take(&self, filename: &str, username: &str, sentence_idx: usize) -> Option<WriteSession> {
        self.sessions
            .write()
            .unwrap()
            .remove(&Self::key(filename, username, sentence_idx))
    }

    /// Edits the session's temp file with `insert_tokens`, returning the
    /// number of new sentences the edit created.
    pub async fn write(
        &self,
        filename: &str,
        username: &str,
        sentence_idx: usize,
        word_index: usize,
        content: &str,
    ) -> std::io::Result<Result<usize, fileops::FileOpsError>> {
        let session = self
            .get(filename, username, sentence_idx)
            .expect("write against a session that was never begun");

        let mut fc = fileops::read_and_parse(&session.temp_path).await?;
        match fileops::insert_word_in_sentence(&mut fc, session.sentence_idx, word_index, content) {
            Ok(created) => {
                fileops::write_content(&session.temp_path, &fc).await?;
                Ok(Ok(created))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    /// Drops the session and deletes its temp file without merging it.
    pub async fn cancel(&self, filename: &str, username: &str, sentence_idx: usize) -> std::io::Result<()> {
        if let Some(session) = self.take(filename, username, sentence_idx) {
            match tokio::fs::remove_file(&session.temp_path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        }
    }

    /// Removes the session record, handing temp-file ownership to the
    /// caller (the commit queue) without deleting it.
    pub fn take_for_commit(&self, filename: &str, username: &str, sentence_idx: usize) -> Option<WriteSession> {
        self.take(filename, username, sentence_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_copies_main_file_into_temp() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), b"hello.").await.unwrap();

        let store = WriteSessionStore::new();
        let session = store.begin(&dir, "notes.txt", "alice", 0, 1).await.unwrap();

        let temp_contents = tokio::fs::read_to_string(&session.temp_path).await.unwrap();
        assert_eq!(temp_contents, "hello.");
    }

    #[tokio::test]
    async fn cancel_removes_temp_and_session() {
        let dir = tempdir();
        tokio::fs::write(dir.join("notes.txt"), b"hello.").await.unwrap();

        let store = WriteSessionStore::new();
        let session = store.begin(&dir, "notes.txt", "alice", 0, 1).await.unwrap();
        store.cancel("notes.txt", "alice", 0).await.unwrap();

        assert!(store.get("notes.txt", "alice", 0).is_none());
        assert!(tokio::fs::metadata(&session.temp_path).await.is_err());
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("docflow-writesession-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
