//! Per-sentence write locks held by a storage server, keyed by filename.
//!
//! Grounded on `examples/original_source/common.h`'s `SentenceLock` array
//! and the lock/unlock/check-locks handling scattered through
//! `nm.c`/`ss.c`. A lock slot's state is just the username holding it (or
//! none); the vector for a file grows on demand rather than being
//! preallocated to a fixed `MAX_SENTENCES`.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The sentence is held by a different user.
    AlreadyLocked,
    /// Asked to unlock a slot this user does not hold.
    NotHeld,
}

#[derive(Default)]
pub struct SentenceLockTable {
    files: RwLock<HashMap<String, Vec<Option<String>>>>,
}

impl SentenceLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows the lock vector for `file` to at least `len` slots, leaving any
    /// existing slots untouched. Called after an insert creates new
    /// sentences so later `lock()` calls see a properly sized vector.
    pub fn grow(&self, file: &str, len: usize) {
        let mut files = self.files.write().unwrap();
        let vec = files.entry(file.to_string()).or_default();
        if vec.len() < len {
            vec.resize(len, None);
        }
    }

    /// Locks sentence `idx` of `file` for `user`. Succeeds if the slot is
    /// unowned or already owned by `user`.
    pub fn lock(&self, file: &str, idx: usize, user: &str) -> Result<(), LockError> {
        let mut files = self.files.write().unwrap();
        let vec = files.entry(file.to_string()).or_default();
        if vec.len() <= idx {
            vec.resize(idx + 1, None);
        }
        match &vec[idx] {
            None => {
                vec[idx] = Some(user.to_string());
                Ok(())
            }
            Some(owner) if owner == user => Ok(()),
            Some(_) => Err(LockError::AlreadyLocked),
        }
    }

    /// Releases sentence `idx` of `file`, only if held by `user`.
    pub fn unlock(&self, file: &str, idx: usize, user: &str) -> Result<(), LockError> {
        let mut files = self.files.write().unwrap();
        let vec = files.get_mut(file).ok_or(LockError::NotHeld)?;
        match vec.get(idx) {
            Some(Some(owner)) if owner == user => {
                vec[idx] = None;
                Ok(())
            }
            _ => Err(LockError::NotHeld),
        }
    }

    /// Whether any sentence of `file` is currently held by anyone.
    pub fn any_locked(&self, file: &str) -> bool {
        self.files
            .read()
            .unwrap()
            .get(file)
            .is_some_and(|v| v.iter().any(|slot| slot.is_some()))
    }

    pub fn owner_of(&self, file: &str, idx: usize) -> Option<String> {
        self.files.read().unwrap().get(file)?.get(idx)?.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_relock_by_owner_succeeds() {
        let table = SentenceLockTable::new();
        table.lock("notes.txt", 0, "alice").unwrap();
        assert!(table.lock("notes.txt", 0, "alice").is_ok());
    }

    #[test]
    fn lock_by_other_user_fails() {
        let table = SentenceLockTable::new();
        table.lock("notes.txt", 0, "alice").unwrap();
        assert_eq!(table.lock("notes.txt", 0, "bob"), Err(LockError::AlreadyLocked));
    }

    #[test]
    fn unlock_by_non_owner_fails() {
        let table = SentenceLockTable::new();
        table.lock("notes.txt", 0, "alice").unwrap();
        assert_eq!(table.unlock("notes.txt", 0, "bob"), Err(LockError::NotHeld));
        table.unlock("notes.txt", 0, "alice").unwrap();
        assert!(!table.any_locked("notes.txt"));
    }

    #[test]
    fn grow_extends_without_disturbing_existing_locks() {
        let table = SentenceLockTable::new();
        table.lock("notes.txt", 0, "alice").unwrap();
        table.grow("notes.txt", 5);
        assert!(table.any_locked("notes.txt"));
        assert!(table.lock("notes.txt", 4, "bob").is_ok());
    }
}
