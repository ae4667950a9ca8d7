//! Per-file FIFO of staged writes and the rebase-merge that applies them to
//! the main file.
//!
//! Grounded on `examples/original_source/common.h`'s `CommitQueueEntry`/
//! `FileCommitQueue` and the commit-processing logic threaded through
//! `ss.c`. Two different writers may hold locks on two different sentences
//! of the same file at once (locking, §[`crate::locks`], only ever protects
//! one sentence at a time); whichever commits first shifts the sentence
//! count out from under the other, so each entry's target index is rebased
//! by the net sentence-count change before it is applied.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex as SyncMutex;
use std::time::SystemTime;

use filetime::FileTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::fileops::{self, FileContent};

#[derive(Clone, Debug)]
pub struct CommitQueueEntry {
    pub username: String,
    pub sentence_idx: usize,
    pub original_sentence_count: usize,
    pub temp_path: PathBuf,
    pub lock_time: SystemTime,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied { username: String },
    DiscardedUnparsableTemp { username: String },
    DiscardedOutOfRange { username: String },
}

/// The FIFO for one file, plus the async guard that serializes draining it.
pub struct CommitQueue {
    entries: SyncMutex<VecDeque<CommitQueueEntry>>,
    draining: AsyncMutex<()>,
}

impl Default for CommitQueue {
    fn default() -> Self {
        CommitQueue { entries: SyncMutex::new(VecDeque::new()), draining: AsyncMutex::new(()) }
    }
}

impl CommitQueue {
    pub fn push(&self, entry: CommitQueueEntry) {
        self.entries.lock().unwrap().push_back(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Drains every currently-queued entry into `main_path`, in order,
    /// taking one undo backup before the first entry rather than one per
    /// entry. Entries queued by another task while this drain is running
    /// are picked up too, since the loop re-checks the queue until empty.
    pub async fn drain_into(&self, main_path: &Path) -> std::io::Result<Vec<MergeOutcome>> {
        let _guard = self.draining.lock().await;
        let mut outcomes = Vec::new();

        if self.is_empty() {
            return Ok(outcomes);
        }
        if let Err(e) = fileops::create_undo_backup(main_path).await {
            warn!(error = %e, path = %main_path.display(), "failed to create undo backup before commit drain");
        }

        loop {
            let entry = {
                let mut entries = self.entries.lock().unwrap();
                match entries.pop_front() {
                    Some(e) => e,
                    None => break,
                }
            };
            outcomes.push(apply_entry(main_path, &entry).await?);
        }

        Ok(outcomes)
    }
}

async fn apply_entry(main_path: &Path, entry: &CommitQueueEntry) -> std::io::Result<MergeOutcome> {
    let main_fc = fileops::read_and_parse(main_path).await?;
    let current_count = main_fc.sentences.len();

    let temp_text = tokio::fs::read_to_string(&entry.temp_path).await;
    let temp_fc = match temp_text {
        Ok(text) => fileops::parse_content(&text),
        Err(e) => {
            warn!(error = %e, user = %entry.username, "discarding commit entry: temp file unreadable");
            let _ = tokio::fs::remove_file(&entry.temp_path).await;
            return Ok(MergeOutcome::DiscardedUnparsableTemp { username: entry.username.clone() });
        }
    };

    let shift = current_count as i64 - entry.original_sentence_count as i64;
    let adjusted_idx = entry.sentence_idx as i64 + shift;

    let merged = if current_count == 0 && entry.original_sentence_count == 0 && adjusted_idx == 0 {
        temp_fc
    } else {
        if adjusted_idx < 0 || adjusted_idx as usize >= current_count {
            warn!(
                user = %entry.username,
                adjusted_idx,
                current_count,
                "discarding commit entry: rebased index out of range"
            );
            let _ = tokio::fs::remove_file(&entry.temp_path).await;
            return Ok(MergeOutcome::DiscardedOutOfRange { username: entry.username.clone() });
        }
        let adjusted_idx = adjusted_idx as usize;

        let expansion = temp_fc.sentences.len() as i64 - entry.original_sentence_count as i64;
        let contribution_len = (1 + expansion.max(0)) as usize;
        let contribution_start = entry.sentence_idx.min(temp_fc.sentences.len());
        let contribution_end = (contribution_start + contribution_len).min(temp_fc.sentences.len());

        let mut sentences = Vec::with_capacity(current_count + contribution_len);
        sentences.extend_from_slice(&main_fc.sentences[..adjusted_idx]);
        sentences.extend_from_slice(&temp_fc.sentences[contribution_start..contribution_end]);
        sentences.extend_from_slice(&main_fc.sentences[adjusted_idx + 1..]);
        FileContent { sentences }
    };

    fileops::write_content(main_path, &merged).await?;
    let _ = tokio::fs::remove_file(&entry.temp_path).await;

    // §4.7 step 9: stamp modified/accessed explicitly rather than relying on
    // whatever the filesystem happened to touch during the write.
    let now = FileTime::now();
    if let Err(e) = filetime::set_file_times(main_path, now, now) {
        warn!(error = %e, path = %main_path.display(), "failed to update file timestamps after merge");
    }

    debug!(user = %entry.username, path = %main_path.display(), "applied staged write");
    Ok(MergeOutcome::Applied { username: entry.username.clone() })
}

/// Per-filename registry of commit queues, so each file drains
/// independently of the others.
#[derive(Default)]
pub struct CommitQueueRegistry {
    queues: SyncMutex<HashMap<String, std::sync::Arc<CommitQueue>>>,
}

impl CommitQueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_for(&self, filename: &str) -> std::sync::Arc<CommitQueue> {
        self.queues
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_insert_with(|| std::sync::Arc::new(CommitQueue::default()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("docflow-commitqueue-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn single_entry_merges_into_main() {
        let dir = tempdir();
        let main_path = dir.join("notes.txt");
        tokio::fs::write(&main_path, "Hello world.").await.unwrap();

        let temp_path = dir.join("notes.txt.temp_alice_0");
        tokio::fs::write(&temp_path, "Hello there world.").await.unwrap();

        let queue = CommitQueue::default();
        queue.push(CommitQueueEntry {
            username: "alice".into(),
            sentence_idx: 0,
            original_sentence_count: 1,
            temp_path: temp_path.clone(),
            lock_time: SystemTime::now(),
        });

        let outcomes = queue.drain_into(&main_path).await.unwrap();
        assert_eq!(outcomes, vec![MergeOutcome::Applied { username: "alice".into() }]);

        let result = tokio::fs::read_to_string(&main_path).await.unwrap();
        assert_eq!(result, "Hello there world.");
        assert!(tokio::fs::metadata(&temp_path).await.is_err());
        assert!(tokio::fs::metadata(main_path.as_os_str().to_str().unwrap().to_owned() + ".undo").await.is_ok());
    }

    #[tokio::test]
    async fn rebases_index_after_a_prior_commit_grew_the_file() {
        let dir = tempdir();
        let main_path = dir.join("doc.txt");
        // main already grew from 2 to 3 sentences since this writer locked sentence 1.
        tokio::fs::write(&main_path, "One. Extra. Two.").await.unwrap();

        // bob's temp file is a full copy of the main file as it stood at lock
        // time ("One. Two."), with only sentence 1 edited.
        let temp_path = dir.join("doc.txt.temp_bob_1");
        tokio::fs::write(&temp_path, "One. Two revised.").await.unwrap();

        let queue = CommitQueue::default();
        queue.push(CommitQueueEntry {
            username: "bob".into(),
            sentence_idx: 1,
            original_sentence_count: 2,
            temp_path,
            lock_time: SystemTime::now(),
        });

        queue.drain_into(&main_path).await.unwrap();
        let result = tokio::fs::read_to_string(&main_path).await.unwrap();
        assert_eq!(result, "One. Extra. Two revised.");
    }

    #[tokio::test]
    async fn scenario_concurrent_writers_index_shift() {
        // SPEC_FULL.md §8 scenario 2: U1 locks sentence 0 of "A. B.", inserts
        // " one. two" (splitting into a new sentence); U2 locks sentence 1
        // ("B.") before U1 commits, inserts " Z". U1 commits first, shifting
        // U2's target index by the one sentence U1's edit added.
        let dir = tempdir();
        let main_path = dir.join("shift.txt");
        tokio::fs::write(&main_path, "A. B.").await.unwrap();

        let u1_temp = dir.join("shift.txt.temp_u1_0");
        tokio::fs::write(&u1_temp, "A one. two. B.").await.unwrap();
        let u2_temp = dir.join("shift.txt.temp_u2_1");
        // u2's temp is a full copy of "A. B." at lock time with sentence 1 edited.
        tokio::fs::write(&u2_temp, "A. B Z.").await.unwrap();

        let u1_queue = CommitQueue::default();
        u1_queue.push(CommitQueueEntry {
            username: "u1".into(),
            sentence_idx: 0,
            original_sentence_count: 2,
            temp_path: u1_temp,
            lock_time: SystemTime::now(),
        });
        u1_queue.drain_into(&main_path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&main_path).await.unwrap(), "A one. two. B.");

        let u2_queue = CommitQueue::default();
        u2_queue.push(CommitQueueEntry {
            username: "u2".into(),
            sentence_idx: 1,
            original_sentence_count: 2,
            temp_path: u2_temp,
            lock_time: SystemTime::now(),
        });
        u2_queue.drain_into(&main_path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&main_path).await.unwrap(), "A one. two. B Z.");
    }

    #[tokio::test]
    async fn unparsable_temp_is_discarded() {
        let dir = tempdir();
        let main_path = dir.join("gone.txt");
        tokio::fs::write(&main_path, "Still here.").await.unwrap();

        let missing_temp = dir.join("gone.txt.temp_carol_0");
        // temp_path deliberately never created

        let queue = CommitQueue::default();
        queue.push(CommitQueueEntry {
            username: "carol".into(),
            sentence_idx: 0,
            original_sentence_count: 1,
            temp_path: missing_temp,
            lock_time: SystemTime::now(),
        });

        let outcomes = queue.drain_into(&main_path).await.unwrap();
        assert_eq!(outcomes, vec![MergeOutcome::DiscardedUnparsableTemp { username: "carol".into() }]);
        assert_eq!(tokio::fs::read_to_string(&main_path).await.unwrap(), "Still here.");
    }
}
