//! Name server: the metadata authority and request router. Owns the file and
//! folder indices, the SS membership registry, the user registry, and the
//! access-request queue, and dispatches client/SS connections against them.
//!
//! Grounded on `examples/original_source/nm.c`'s top-level `main` (three
//! listeners plus a heartbeat monitor, all sharing one set of global
//! tables) — here the tables live on one `NameServer` struct, shared via
//! `Arc` rather than as process globals (SPEC_FULL.md §9).

pub mod access_requests;
pub mod client_handler;
pub mod heartbeat;
pub mod ss_handler;
pub mod ss_registry;
pub mod users;

use std::sync::Mutex as SyncMutex;

use crate::cache::LruCache;
use crate::domain::FileMetadata;
use crate::trie::PrefixTrie;

use access_requests::AccessRequests;
use ss_registry::SsRegistry;
use users::Users;

/// Matches `examples/original_source/common.h`'s `CACHE_SIZE`.
pub const FILE_CACHE_CAPACITY: usize = 100;

/// Matches `examples/original_source/common.h`'s `MAX_FILES`; used as the
/// enumeration cap when walking the whole file index.
pub const MAX_FILES: usize = 10_000;

pub struct NameServer {
    pub files: PrefixTrie<FileMetadata>,
    pub folders: PrefixTrie<crate::domain::FolderMetadata>,
    cache: SyncMutex<LruCache<FileMetadata>>,
    pub ss_registry: SsRegistry,
    pub users: Users,
    pub access_requests: AccessRequests,
    pub client_port: u16,
    pub ss_command_port: u16,
    pub ss_heartbeat_port: u16,
}

impl NameServer {
    pub fn new(client_port: u16, ss_command_port: u16, ss_heartbeat_port: u16) -> Self {
        NameServer {
            files: PrefixTrie::new(),
            folders: PrefixTrie::new(),
            cache: SyncMutex::new(LruCache::new(FILE_CACHE_CAPACITY)),
            ss_registry: SsRegistry::new(),
            users: Users::new(),
            access_requests: AccessRequests::new(),
            client_port,
            ss_command_port,
            ss_heartbeat_port,
        }
    }

    /// Cache-aside lookup of a file's metadata: a cache hit returns directly,
    /// a miss falls through to the index and backfills the cache.
    pub fn file_meta(&self, filename: &str) -> Option<FileMetadata> {
        if let Some(meta) = self.cache.lock().unwrap().get(filename) {
            return Some(meta);
        }
        let meta = self.files.search(filename)?;
        self.cache.lock().unwrap().put(filename, meta.clone());
        Some(meta)
    }

    /// Writes `meta` through to both the index and the cache.
    pub fn put_file_meta(&self, meta: FileMetadata) {
        let _ = self.files.insert(&meta.filename, meta.clone());
        self.cache.lock().unwrap().put(&meta.filename, meta);
    }

    /// Removes a file from both the index and the cache.
    pub fn remove_file_meta(&self, filename: &str) {
        self.files.delete(filename);
        self.cache.lock().unwrap().remove(filename);
    }

    /// Every file this crate's trie currently holds, owned by `owner`.
    pub fn files_owned_by(&self, owner: &str) -> Vec<FileMetadata> {
        self.files
            .enumerate(MAX_FILES)
            .into_iter()
            .filter(|m| m.owner == owner)
            .collect()
    }

    pub fn all_files(&self) -> Vec<FileMetadata> {
        self.files.enumerate(MAX_FILES)
    }
}

/// Canonicalizes a folder path to `/a/b/c`: collapses repeated separators,
/// strips a trailing separator, and ensures a single leading separator.
pub fn canonicalize_folder_path(path: &str) -> String {
    let mut out = String::from("/");
    let mut first = true;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !first {
            out.push('/');
        }
        out.push_str(part);
        first = false;
    }
    out
}
