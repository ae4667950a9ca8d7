//! Registered-user bookkeeping: persists across reconnects, enforces
//! at-most-one active session per username.
//!
//! Grounded on `examples/original_source/common.h`'s `RegisteredUser` and
//! `nm.c`'s `register_user_persistent`/`deregister_active_session`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::domain::{ClientInfo, RegisteredUser};

#[derive(Default)]
pub struct Users {
    entries: Mutex<HashMap<String, RegisteredUser>>,
    clients: Mutex<HashMap<String, ClientInfo>>,
}

/// Returned when a registration attempt collides with an already-active
/// session for the same username (SPEC_FULL.md §8 scenario 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateSession;

impl Users {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username` from `ip`, or reuses its persistent record.
    /// Fails if the username already has an active session elsewhere.
    pub fn register(&self, username: &str, ip: &str) -> Result<(), DuplicateSession> {
        let mut entries = self.entries.lock().unwrap();
        let now = SystemTime::now();
        match entries.get_mut(username) {
            Some(user) if user.active_session => return Err(DuplicateSession),
            Some(user) => {
                user.active_session = true;
                user.last_seen = now;
            }
            None => {
                entries.insert(
                    username.to_string(),
                    RegisteredUser {
                        username: username.to_string(),
                        first_registered: now,
                        last_seen: now,
                        active_session: true,
                    },
                );
            }
        }
        drop(entries);
        self.clients.lock().unwrap().insert(
            username.to_string(),
            ClientInfo { username: username.to_string(), ip: ip.to_string(), connected: now },
        );
        Ok(())
    }

    /// Ends `username`'s active session, freeing it up to register again.
    pub fn deregister(&self, username: &str) {
        if let Some(user) = self.entries.lock().unwrap().get_mut(username) {
            user.active_session = false;
        }
        self.clients.lock().unwrap().remove(username);
    }

    pub fn is_registered(&self, username: &str) -> bool {
        self.entries.lock().unwrap().contains_key(username)
    }

    pub fn client_ip(&self, username: &str) -> Option<String> {
        self.clients.lock().unwrap().get(username).map(|c| c.ip.clone())
    }

    pub fn list_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_while_active_is_rejected() {
        let users = Users::new();
        users.register("alice", "127.0.0.1").unwrap();
        assert_eq!(users.register("alice", "127.0.0.1"), Err(DuplicateSession));
    }

    #[test]
    fn registration_succeeds_again_after_deregister() {
        let users = Users::new();
        users.register("alice", "127.0.0.1").unwrap();
        users.deregister("alice");
        assert!(users.register("alice", "127.0.0.1").is_ok());
    }

    #[test]
    fn distinct_usernames_register_independently() {
        let users = Users::new();
        users.register("alice", "127.0.0.1").unwrap();
        assert!(users.register("bob", "127.0.0.1").is_ok());
    }
}
