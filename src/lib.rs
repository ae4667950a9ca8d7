//! docflow - a distributed, sentence-addressable text file service.
//!
//! A name server tracks files, folders, access control and storage-server
//! membership; storage servers hold file content and serialize concurrent
//! edits to individual sentences through a lock/write-session/commit-queue
//! pipeline; clients talk to both over a small `|`-delimited wire protocol.
//!
//! ## Main components
//!
//! - `message`/`net`: the wire record and its length-prefixed framing.
//! - `trie`: the prefix index the name server keeps for files and folders.
//! - `cache`: the LRU cache fronting that index.
//! - `fileops`: tokenizing, serializing and editing sentence-structured text,
//!   plus the undo/checkpoint sidecar files.
//! - `domain`: the metadata records the name server tracks.
//! - `locks`/`writesession`/`commitqueue`: per-sentence locking, per-writer
//!   temp-file staging, and the rebase-merge that applies staged writes.

pub mod cache;
pub mod client;
pub mod commitqueue;
pub mod config;
pub mod domain;
pub mod fileops;
pub mod locks;
pub mod message;
pub mod net;
pub mod nm;
pub mod ss;
pub mod trie;
pub mod writesession;
