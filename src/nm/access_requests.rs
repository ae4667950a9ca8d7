//! Pending access-grant workflow: `request_access` / `view_requests` /
//! `approve_request` / `deny_request`.
//!
//! Grounded on `examples/original_source/common.h`'s `AccessRequest` and
//! `nm.c`'s `handle_requestaccess`/`handle_viewrequests`/
//! `handle_approverequest`/`handle_denyrequest`. Approving/denying an
//! entry's ownership check and ACL mutation live in
//! [`crate::nm::client_handler`], which has access to the file index; this
//! module only owns the request queue itself.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::domain::AccessRequest;
use crate::message::AccessType;

#[derive(Default)]
pub struct AccessRequests {
    next_id: AtomicI32,
    entries: Mutex<Vec<AccessRequest>>,
}

impl AccessRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending request unless one already exists for the same
    /// `(username, filename, access)` triple. Returns `None` if no new entry
    /// was needed (a duplicate was already pending).
    pub fn request(&self, username: &str, filename: &str, access: AccessType) -> Option<AccessRequest> {
        let mut entries = self.entries.lock().unwrap();
        let duplicate = entries
            .iter()
            .any(|r| r.username == username && r.filename == filename && r.requested_access == access);
        if duplicate {
            return None;
        }
        let entry = AccessRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            username: username.to_string(),
            filename: filename.to_string(),
            requested_access: access,
            request_time: SystemTime::now(),
        };
        entries.push(entry.clone());
        Some(entry)
    }

    /// Requests pending against any file in `owned_files`.
    pub fn pending_for_files(&self, owned_files: &[String]) -> Vec<AccessRequest> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|r| owned_files.iter().any(|f| f == &r.filename))
            .cloned()
            .collect()
    }

    pub fn find(&self, id: i32) -> Option<AccessRequest> {
        self.entries.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn remove(&self, id: i32) -> Option<AccessRequest> {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries.iter().position(|r| r.id == id)?;
        Some(entries.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_request_for_same_triple_is_not_recreated() {
        let requests = AccessRequests::new();
        let first = requests.request("bob", "notes.txt", AccessType::Read).unwrap();
        assert!(requests.request("bob", "notes.txt", AccessType::Read).is_none());
        assert_eq!(requests.pending_for_files(&["notes.txt".into()]).len(), 1);
        assert_eq!(requests.find(first.id).unwrap().username, "bob");
    }

    #[test]
    fn different_access_kind_is_a_distinct_request() {
        let requests = AccessRequests::new();
        requests.request("bob", "notes.txt", AccessType::Read).unwrap();
        assert!(requests.request("bob", "notes.txt", AccessType::Write).is_some());
        assert_eq!(requests.pending_for_files(&["notes.txt".into()]).len(), 2);
    }

    #[test]
    fn remove_drops_the_entry() {
        let requests = AccessRequests::new();
        let entry = requests.request("bob", "notes.txt", AccessType::Read).unwrap();
        assert!(requests.remove(entry.id).is_some());
        assert!(requests.find(entry.id).is_none());
    }
}
