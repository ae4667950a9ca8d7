//! Storage-server membership: one [`SsConn`] per registered SS, holding both
//! its metadata and the persistent command socket NM forwards requests over.
//!
//! Grounded on `examples/original_source/nm.c`'s `StorageServerInfo` array
//! and `handle_ss_connection`/`find_ss_for_file`/`get_next_ss_round_robin`.
//! The per-SS command-socket mutex (SPEC_FULL.md §5, §9 "per-SS socket
//! serialization") is `tokio::sync::Mutex<TcpStream>` rather than a raw fd
//! guarded by a `pthread_mutex_t`; holding the guard across the two round
//! trips of a delete (`CHECK_LOCKS` then `DELETE`) is how this crate
//! reproduces the single critical section the reference's one mutex gives it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as SyncMutex;
use std::time::SystemTime;

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::StorageServerInfo;

/// One registered storage server: its advertised metadata plus the command
/// connection it dialed in on.
pub struct SsConn {
    pub info: SyncMutex<StorageServerInfo>,
    pub registered_at: SyncMutex<SystemTime>,
    stream: AsyncMutex<TcpStream>,
    hb_stream: AsyncMutex<Option<TcpStream>>,
}

impl SsConn {
    /// Locks the command stream for the duration of one or more round trips.
    /// Callers performing a multi-message sequence (e.g. check-locks then
    /// delete) must hold the single guard across all of them rather than
    /// re-acquiring between messages, or another forward could interleave.
    pub async fn lock_stream(&self) -> tokio::sync::MutexGuard<'_, TcpStream> {
        self.stream.lock().await
    }

    pub async fn set_hb_stream(&self, stream: TcpStream) {
        *self.hb_stream.lock().await = Some(stream);
    }

    pub async fn close_hb_stream(&self) {
        self.hb_stream.lock().await.take();
    }

    /// Locks the heartbeat stream slot for one read. Returns a guard over
    /// `Option<TcpStream>` so the caller can detect a stream that was
    /// replaced or cleared out from under it.
    pub async fn lock_hb_stream_for_read(&self) -> tokio::sync::MutexGuard<'_, Option<TcpStream>> {
        self.hb_stream.lock().await
    }

    pub fn is_active(&self) -> bool {
        self.info.lock().unwrap().active
    }

    pub fn mark_heartbeat(&self) {
        self.info.lock().unwrap().last_heartbeat = SystemTime::now();
    }

    pub fn mark_inactive(&self) {
        self.info.lock().unwrap().active = false;
    }
}

/// Registry of every SS the NM has ever seen, keyed by `ss_id`.
#[derive(Default)]
pub struct SsRegistry {
    conns: SyncMutex<HashMap<i32, std::sync::Arc<SsConn>>>,
    round_robin: AtomicUsize,
}

impl SsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh SS, or reuses the record if `id` is already known
    /// ("reconnect" — SPEC_FULL.md §4.12). Replaces the command stream and
    /// drops any stale heartbeat stream either way.
    pub async fn register(
        &self,
        id: i32,
        ip: String,
        nm_port: u16,
        client_port: u16,
        files: Vec<String>,
        stream: TcpStream,
    ) -> std::sync::Arc<SsConn> {
        let existing = self.conns.lock().unwrap().get(&id).cloned();
        if let Some(conn) = existing {
            conn.close_hb_stream().await;
            {
                let mut info = conn.info.lock().unwrap();
                info.ip = ip;
                info.nm_port = nm_port;
                info.client_port = client_port;
                info.active = true;
                info.last_heartbeat = SystemTime::now();
                info.files = files;
            }
            *conn.registered_at.lock().unwrap() = SystemTime::now();
            *conn.stream.lock().await = stream;
            return conn;
        }

        let info = StorageServerInfo {
            id,
            ip,
            nm_port,
            client_port,
            active: true,
            last_heartbeat: SystemTime::now(),
            files,
        };
        let conn = std::sync::Arc::new(SsConn {
            info: SyncMutex::new(info),
            registered_at: SyncMutex::new(SystemTime::now()),
            stream: AsyncMutex::new(stream),
            hb_stream: AsyncMutex::new(None),
        });
        self.conns.lock().unwrap().insert(id, conn.clone());
        conn
    }

    pub fn get(&self, id: i32) -> Option<std::sync::Arc<SsConn>> {
        self.conns.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<std::sync::Arc<SsConn>> {
        self.conns.lock().unwrap().values().cloned().collect()
    }

    /// Picks the next active SS in round-robin order, for placing a freshly
    /// created file. Returns `None` if no SS is active.
    pub fn next_active(&self) -> Option<std::sync::Arc<SsConn>> {
        let conns = self.conns.lock().unwrap();
        let mut ids: Vec<i32> = conns.keys().copied().collect();
        ids.sort_unstable();
        let active_ids: Vec<i32> = ids.into_iter().filter(|id| conns[id].is_active()).collect();
        if active_ids.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % active_ids.len();
        conns.get(&active_ids[idx]).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn register_then_reconnect_reuses_the_record() {
        let registry = SsRegistry::new();
        let (s1, _c1) = loopback_pair().await;
        let conn = registry.register(1, "127.0.0.1".into(), 9000, 9001, vec!["a.txt".into()], s1).await;
        assert!(conn.is_active());

        let (s2, _c2) = loopback_pair().await;
        let conn2 = registry.register(1, "127.0.0.1".into(), 9100, 9101, vec!["b.txt".into()], s2).await;
        assert_eq!(registry.all().len(), 1);
        assert_eq!(conn2.info.lock().unwrap().client_port, 9101);
    }

    #[tokio::test]
    async fn round_robin_cycles_through_active_servers() {
        let registry = SsRegistry::new();
        for id in [1, 2, 3] {
            let (s, _c) = loopback_pair().await;
            registry.register(id, "127.0.0.1".into(), 9000, 9000 + id as u16, vec![], s).await;
        }
        let picks: Vec<i32> = (0..6).map(|_| registry.next_active().unwrap().info.lock().unwrap().id).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn inactive_servers_are_skipped_by_round_robin() {
        let registry = SsRegistry::new();
        let (s1, _c1) = loopback_pair().await;
        let conn1 = registry.register(1, "127.0.0.1".into(), 9000, 9001, vec![], s1).await;
        let (s2, _c2) = loopback_pair().await;
        registry.register(2, "127.0.0.1".into(), 9000, 9002, vec![], s2).await;

        conn1.mark_inactive();
        let picks: Vec<i32> = (0..3).map(|_| registry.next_active().unwrap().info.lock().unwrap().id).collect();
        assert_eq!(picks, vec![2, 2, 2]);
    }
}
