//! Real-socket integration tests: a name server and a storage server bound
//! to ephemeral ports, driven only through `docflow::client`'s public API.
//!
//! Grounded on `examples/lunixbochs-nfs-mamont-mirror/tests/`'s style of
//! exercising a server's handler loop directly rather than through its
//! binary, adapted here to drive two cooperating servers over real TCP
//! (SPEC_FULL.md §8 scenarios).

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use docflow::client::{self, NmConnection, SsSession};
use docflow::message::{Message, MessageType};
use docflow::net;
use docflow::nm::{self, NameServer};
use docflow::ss::{self, StorageServer};

/// A running NM plus one registered SS, each listener bound to an ephemeral
/// port and served on a background task.
struct Harness {
    nm_client_port: u16,
    storage_root: std::path::PathBuf,
}

impl Harness {
    async fn start() -> Self {
        let nm = Arc::new(NameServer::new(0, 0, 0));

        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let nm_client_port = client_listener.local_addr().unwrap().port();
        let ss_cmd_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ss_cmd_port = ss_cmd_listener.local_addr().unwrap().port();

        tokio::spawn(nm::client_handler::serve(nm.clone(), client_listener));
        tokio::spawn(nm::ss_handler::serve(nm.clone(), ss_cmd_listener));

        let mut storage_root = std::env::temp_dir();
        storage_root.push(format!("docflow-e2e-{:?}-{}", std::thread::current().id(), std::process::id()));
        let _ = std::fs::remove_dir_all(&storage_root);
        let ss = Arc::new(StorageServer::new(1, storage_root.clone(), 0, 0));

        let ss_client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ss_client_port = ss_client_listener.local_addr().unwrap().port();
        tokio::spawn(ss::client_handler::serve(ss.clone(), ss_client_listener));

        let files = ss.scan_reportable_files().await.unwrap();
        let mut nm_stream = TcpStream::connect(("127.0.0.1", ss_cmd_port)).await.unwrap();
        register_ss(&mut nm_stream, 1, ss_client_port, &files).await;

        // the same connection keeps carrying NM-initiated forwards for the
        // rest of the test via `nm_handler::run`.
        let ss_for_nm = ss.clone();
        tokio::spawn(async move {
            let _ = ss::nm_handler::run(&ss_for_nm, nm_stream).await;
        });

        Harness { nm_client_port, storage_root }
    }

    async fn connect(&self, username: &str) -> NmConnection {
        NmConnection::connect("127.0.0.1", self.nm_client_port, username).await.unwrap()
    }
}

/// Performs the `REG_SS` handshake NM's `ss_handler` expects as the first
/// message on a freshly dialed command connection; blocks for the ack.
async fn register_ss(stream: &mut TcpStream, ss_id: i32, client_port: u16, files: &[String]) {
    let mut reg = Message::new(MessageType::RegSs);
    reg.ss_id = ss_id;
    reg.sender = "127.0.0.1".to_string();
    reg.client_port = client_port as i32;
    reg.nm_port = 0;
    reg.data = files.join(",");
    net::send_message(stream, &reg).await.unwrap();
    let reply = net::recv_message(stream).await.unwrap();
    assert_eq!(reply.status, docflow::message::Status::Success);
}

#[tokio::test]
async fn scenario_one_serial_writers_edit_adjacent_sentences() {
    let harness = Harness::start().await;
    let mut nm = harness.connect("alice").await;
    nm.create("notes.txt", "/").await.unwrap();
    // seed "A. B. C." directly, as if this content predates the two writers
    // below; repeated end-of-file appends can't build it through the wire
    // protocol one sentence at a time, since the commit-merge only accepts
    // a rebased index strictly inside the current sentence range (§4.7)
    // except for the single all-empty special case.
    tokio::fs::write(harness.storage_root.join("notes.txt"), "A. B. C.").await.unwrap();

    let content = client::read_file(&mut nm, "notes.txt").await.unwrap();
    assert_eq!(content, "A. B. C.");
    nm.add_access("notes.txt", "u1", docflow::message::AccessType::Write).await.unwrap();
    nm.add_access("notes.txt", "u2", docflow::message::AccessType::Write).await.unwrap();

    // SPEC_FULL.md §8 scenario 1: U1 locks sentence 0, inserts " X" at word
    // index 2 (between "A" and its delimiter).
    let u1 = harness.connect("u1").await;
    let mut session = SsSession::lock(u1, "notes.txt", 0).await.unwrap();
    session.write(2, " X").await.unwrap();
    session.commit().await.unwrap();

    // U2 locks sentence 2, inserts " Y" the same way.
    let u2 = harness.connect("u2").await;
    let mut session = SsSession::lock(u2, "notes.txt", 2).await.unwrap();
    session.write(2, " Y").await.unwrap();
    session.commit().await.unwrap();

    let content = client::read_file(&mut nm, "notes.txt").await.unwrap();
    assert_eq!(content, "A X. B. C Y.");
}

#[tokio::test]
async fn duplicate_login_is_rejected_until_the_first_session_disconnects() {
    let harness = Harness::start().await;
    let first = harness.connect("alice").await;

    let err = NmConnection::connect("127.0.0.1", harness.nm_client_port, "alice").await;
    assert!(err.is_err(), "a second concurrent session for the same user must be rejected");

    drop(first);
    // give the server's read loop a moment to observe the dropped socket
    // and deregister the session.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let second = NmConnection::connect("127.0.0.1", harness.nm_client_port, "alice").await;
    assert!(second.is_ok(), "login should succeed again once the prior session is gone");
}

#[tokio::test]
async fn delete_is_blocked_while_a_sentence_is_locked() {
    let harness = Harness::start().await;
    let mut owner = harness.connect("alice").await;
    owner.create("report.txt", "/").await.unwrap();
    owner.add_access("report.txt", "bob", docflow::message::AccessType::Write).await.unwrap();

    let mut session = SsSession::lock(harness.connect("bob").await, "report.txt", 0).await.unwrap();
    session.write(1, "Draft").await.unwrap();
    // deliberately never committed: the lock (and its session) stay live.
    let err = owner.delete("report.txt").await;
    assert!(err.is_err(), "delete must be refused while any sentence is locked");
    // release the lock without committing, then delete should go through.
    session.cancel().await.unwrap();

    owner.delete("report.txt").await.unwrap();
    let missing = client::read_file(&mut owner, "report.txt").await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn info_refreshes_stats_from_a_live_ss_info_fetch() {
    let harness = Harness::start().await;
    let mut owner = harness.connect("alice").await;
    owner.create("stats.txt", "/").await.unwrap();
    // written directly to disk, bypassing the write-session protocol, so
    // the cached metadata's size/word/char counts start at their zero
    // defaults until INFO pulls a fresh SS_INFO reading.
    tokio::fs::write(harness.storage_root.join("stats.txt"), "Hi there.").await.unwrap();

    let info = owner.info("stats.txt").await.unwrap();
    assert!(info.contains("words=2"), "info was: {info}");
    assert!(info.contains("chars=9"), "info was: {info}");
}
