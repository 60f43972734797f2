//! Session-level tests driven through an in-memory transport.
//!
//! Request frames are built by hand, byte for byte, the way the kernel
//! would send them; replies are decoded from the raw frames the
//! dispatcher writes back. No kernel or mount privileges are needed.

mod common;

use std::future::pending;
use std::io::{self, IoSlice};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use common::MemFs;
use fusebridge::{
    Fd, FileInfo, Flags, FsResult, Handlers, HandleRegistry, Ino, NoopFs, RequestContext, Session,
    SessionHandle, SessionOptions, Transport,
};

const FUSE_LOOKUP: u32 = 1;
const FUSE_FORGET: u32 = 2;
const FUSE_GETATTR: u32 = 3;
const FUSE_UNLINK: u32 = 10;
const FUSE_OPEN: u32 = 14;
const FUSE_READ: u32 = 15;
const FUSE_WRITE: u32 = 16;
const FUSE_STATFS: u32 = 17;
const FUSE_RELEASE: u32 = 18;
const FUSE_INIT: u32 = 26;
const FUSE_CREATE: u32 = 35;
const FUSE_INTERRUPT: u32 = 36;

/// In-memory [`Transport`]: requests in over one channel, reply frames
/// out over another.
struct Loopback {
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    replies: mpsc::UnboundedSender<Vec<u8>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for Loopback {
    async fn read_request(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        match self.incoming.lock().await.recv().await {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(Some(frame.len()))
            }
            None => Ok(None),
        }
    }

    fn write_reply(&self, iov: &[IoSlice<'_>]) -> io::Result<()> {
        let frame: Vec<u8> = iov.iter().flat_map(|s| s.iter().copied()).collect();
        // The receiver may be gone during teardown; that mirrors a
        // closed device.
        let _ = self.replies.send(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// One decoded reply frame.
#[derive(Debug)]
struct Reply {
    unique: u64,
    error: i32,
    body: Vec<u8>,
}

struct Harness {
    requests: mpsc::UnboundedSender<Vec<u8>>,
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
    handle: SessionHandle,
    registry: Arc<HandleRegistry>,
    task: JoinHandle<io::Result<()>>,
}

impl Harness {
    fn start<FS: Handlers>(fs: FS) -> Harness {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Loopback {
            incoming: Mutex::new(request_rx),
            replies: reply_tx,
            closed: AtomicBool::new(false),
        });
        let session = Session::with_transport(fs, transport, SessionOptions::default());
        let handle = session.handle();
        let registry = session.registry();
        let task = tokio::spawn(session.run());
        Harness {
            requests: request_tx,
            replies: reply_rx,
            handle,
            registry,
            task,
        }
    }

    fn send(&self, frame: Vec<u8>) {
        self.requests.send(frame).expect("session gone");
    }

    async fn recv(&mut self) -> Reply {
        let frame = timeout(Duration::from_secs(2), self.replies.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("reply channel closed");
        assert!(frame.len() >= 16, "short reply frame");
        let len = u32::from_ne_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len(), "reply length field mismatch");
        Reply {
            unique: u64::from_ne_bytes(frame[8..16].try_into().unwrap()),
            error: i32::from_ne_bytes(frame[4..8].try_into().unwrap()),
            body: frame[16..].to_vec(),
        }
    }

    /// Performs the INIT handshake and asserts it negotiated.
    async fn init(&mut self) {
        self.send(frame(FUSE_INIT, 1, 0, &init_in(7, 31, 65536, 0)));
        let reply = self.recv().await;
        assert_eq!(reply.unique, 1);
        assert_eq!(reply.error, 0, "INIT failed: {}", reply.error);
        assert_eq!(u32::from_ne_bytes(reply.body[0..4].try_into().unwrap()), 7);
        assert_eq!(u32::from_ne_bytes(reply.body[4..8].try_into().unwrap()), 31);
    }

    async fn shutdown(self) {
        self.handle.close();
        let _ = timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not shut down in time");
    }
}

fn frame(opcode: u32, unique: u64, nodeid: u64, payload: &[u8]) -> Vec<u8> {
    let len = 40 + payload.len();
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&(len as u32).to_ne_bytes());
    frame.extend_from_slice(&opcode.to_ne_bytes());
    frame.extend_from_slice(&unique.to_ne_bytes());
    frame.extend_from_slice(&nodeid.to_ne_bytes());
    frame.extend_from_slice(&501u32.to_ne_bytes()); // uid
    frame.extend_from_slice(&20u32.to_ne_bytes()); // gid
    frame.extend_from_slice(&1234u32.to_ne_bytes()); // pid
    frame.extend_from_slice(&0u32.to_ne_bytes()); // padding
    frame.extend_from_slice(payload);
    frame
}

fn init_in(major: u32, minor: u32, max_readahead: u32, flags: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&major.to_ne_bytes());
    p.extend_from_slice(&minor.to_ne_bytes());
    p.extend_from_slice(&max_readahead.to_ne_bytes());
    p.extend_from_slice(&flags.to_ne_bytes());
    p
}

fn name_payload(name: &str) -> Vec<u8> {
    let mut p = name.as_bytes().to_vec();
    p.push(0);
    p
}

fn open_in(flags: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&flags.to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes());
    p
}

fn create_in(flags: u32, mode: u32, name: &str) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&flags.to_ne_bytes());
    p.extend_from_slice(&mode.to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes()); // umask
    p.extend_from_slice(&0u32.to_ne_bytes()); // open_flags
    p.extend_from_slice(name.as_bytes());
    p.push(0);
    p
}

fn read_in(fh: u64, offset: u64, size: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&fh.to_ne_bytes());
    p.extend_from_slice(&offset.to_ne_bytes());
    p.extend_from_slice(&size.to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes()); // read_flags
    p.extend_from_slice(&0u64.to_ne_bytes()); // lock_owner
    p.extend_from_slice(&0u32.to_ne_bytes()); // flags
    p.extend_from_slice(&0u32.to_ne_bytes()); // padding
    p
}

fn write_in(fh: u64, offset: u64, data: &[u8]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&fh.to_ne_bytes());
    p.extend_from_slice(&offset.to_ne_bytes());
    p.extend_from_slice(&(data.len() as u32).to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes()); // write_flags
    p.extend_from_slice(&0u64.to_ne_bytes()); // lock_owner
    p.extend_from_slice(&0u32.to_ne_bytes()); // flags
    p.extend_from_slice(&0u32.to_ne_bytes()); // padding
    p.extend_from_slice(data);
    p
}

fn release_in(fh: u64) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&fh.to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes()); // flags
    p.extend_from_slice(&0u32.to_ne_bytes()); // release_flags
    p.extend_from_slice(&0u64.to_ne_bytes()); // lock_owner
    p
}

fn getattr_in() -> Vec<u8> {
    vec![0; 16]
}

fn setattr_mode_in(mode: u32) -> Vec<u8> {
    const FATTR_MODE: u32 = 1 << 0;
    let mut p = Vec::new();
    p.extend_from_slice(&FATTR_MODE.to_ne_bytes());
    p.extend_from_slice(&0u32.to_ne_bytes()); // padding
    p.extend_from_slice(&[0u8; 40]); // fh, size, lock_owner, atime, mtime
    p.extend_from_slice(&0i64.to_ne_bytes()); // ctime
    p.extend_from_slice(&[0u8; 12]); // nsec fields
    p.extend_from_slice(&mode.to_ne_bytes());
    p.extend_from_slice(&[0u8; 16]); // unused4, uid, gid, unused5
    p
}

fn forget_in(nlookup: u64) -> Vec<u8> {
    nlookup.to_ne_bytes().to_vec()
}

fn interrupt_in(unique: u64) -> Vec<u8> {
    unique.to_ne_bytes().to_vec()
}

fn open_out_fh(reply: &Reply) -> u64 {
    u64::from_ne_bytes(reply.body[0..8].try_into().unwrap())
}

/// Filesystem whose reads stall, for interrupt and ordering tests.
struct SlowReadFs {
    delay: Option<Duration>,
}

#[async_trait]
impl Handlers for SlowReadFs {
    async fn open(&self, _ctx: &RequestContext, _ino: Ino, flags: Flags) -> FsResult<FileInfo> {
        Ok(FileInfo::new(Fd(7), flags))
    }

    async fn read(
        &self,
        _ctx: &RequestContext,
        _ino: Ino,
        _fh: Fd,
        _offset: u64,
        _size: u32,
    ) -> FsResult<Vec<u8>> {
        match self.delay {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                Ok(b"slow".to_vec())
            }
            None => pending().await,
        }
    }
}

#[tokio::test]
async fn init_negotiates_and_gates_the_session() {
    let mut harness = Harness::start(NoopFs);

    // Anything before INIT is refused with EIO.
    harness.send(frame(FUSE_STATFS, 9, 1, &[]));
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 9);
    assert_eq!(reply.error, -libc::EIO);

    harness.init().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn getattr_fallback_serves_the_root() {
    let mut harness = Harness::start(NoopFs);
    harness.init().await;

    harness.send(frame(FUSE_GETATTR, 2, 1, &getattr_in()));
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 2);
    assert_eq!(reply.error, 0);
    // attr_out: attr_valid is the default one-second ttl.
    let ttl_secs = u64::from_ne_bytes(reply.body[0..8].try_into().unwrap());
    assert_eq!(ttl_secs, 1);
    // fuse_attr.ino follows the 16-byte validity header.
    let ino = u64::from_ne_bytes(reply.body[16..24].try_into().unwrap());
    assert_eq!(ino, 1);

    // Non-root inodes have no fallback.
    harness.send(frame(FUSE_GETATTR, 3, 2, &getattr_in()));
    let reply = harness.recv().await;
    assert_eq!(reply.error, -libc::ENOSYS);

    harness.shutdown().await;
}

#[tokio::test]
async fn missing_handler_replies_enosys() {
    let mut harness = Harness::start(NoopFs);
    harness.init().await;

    harness.send(frame(FUSE_UNLINK, 4, 42, &name_payload("x.txt")));
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 4);
    assert_eq!(reply.error, -libc::ENOSYS);

    harness.shutdown().await;
}

#[tokio::test]
async fn invalid_name_replies_einval() {
    let mut harness = Harness::start(NoopFs);
    harness.init().await;

    harness.send(frame(FUSE_UNLINK, 5, 42, &name_payload(&"a".repeat(300))));
    let reply = harness.recv().await;
    assert_eq!(reply.error, -libc::EINVAL);

    harness.shutdown().await;
}

#[tokio::test]
async fn unknown_opcode_replies_enosys() {
    let mut harness = Harness::start(NoopFs);
    harness.init().await;

    harness.send(frame(999, 6, 1, &[]));
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 6);
    assert_eq!(reply.error, -libc::ENOSYS);

    harness.shutdown().await;
}

#[tokio::test]
async fn interrupt_cancels_a_pending_request() {
    let mut harness = Harness::start(SlowReadFs { delay: None });
    harness.init().await;

    harness.send(frame(FUSE_OPEN, 2, 2, &open_in(0)));
    let opened = harness.recv().await;
    assert_eq!(opened.error, 0);
    let fh = open_out_fh(&opened);

    harness.send(frame(FUSE_READ, 3, 2, &read_in(fh, 0, 4096)));
    // Give the read a moment to reach its handler.
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.send(frame(FUSE_INTERRUPT, 4, 0, &interrupt_in(3)));
    let reply = timeout(Duration::from_millis(50), harness.recv())
        .await
        .expect("interrupt was not honored within 50ms");
    assert_eq!(reply.unique, 3);
    assert_eq!(reply.error, -libc::EINTR);

    harness.shutdown().await;
}

#[tokio::test]
async fn interrupt_for_unknown_unique_is_dropped() {
    let mut harness = Harness::start(NoopFs);
    harness.init().await;

    harness.send(frame(FUSE_INTERRUPT, 7, 0, &interrupt_in(9999)));
    // No reply to the interrupt; the session keeps working.
    harness.send(frame(FUSE_STATFS, 8, 1, &[]));
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 8);
    assert_eq!(reply.error, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn replies_complete_out_of_order() {
    let mut harness = Harness::start(SlowReadFs {
        delay: Some(Duration::from_millis(100)),
    });
    harness.init().await;

    harness.send(frame(FUSE_OPEN, 2, 2, &open_in(0)));
    let fh = open_out_fh(&harness.recv().await);

    harness.send(frame(FUSE_READ, 3, 2, &read_in(fh, 0, 4096)));
    harness.send(frame(FUSE_STATFS, 4, 1, &[]));

    // The statfs overtakes the stalled read.
    let first = harness.recv().await;
    assert_eq!(first.unique, 4);
    let second = harness.recv().await;
    assert_eq!(second.unique, 3);
    assert_eq!(second.body, b"slow");

    harness.shutdown().await;
}

#[tokio::test]
async fn handle_lifecycle_is_enforced() {
    let mut harness = Harness::start(MemFs::with_file("source.txt", b"hello world"));
    harness.init().await;

    harness.send(frame(FUSE_LOOKUP, 2, 1, &name_payload("source.txt")));
    let entry = harness.recv().await;
    assert_eq!(entry.error, 0);
    let ino = u64::from_ne_bytes(entry.body[0..8].try_into().unwrap());

    // Reads before any open are EBADF; the core never consults the
    // handler.
    harness.send(frame(FUSE_READ, 3, ino, &read_in(77, 0, 16)));
    assert_eq!(harness.recv().await.error, -libc::EBADF);

    harness.send(frame(FUSE_OPEN, 4, ino, &open_in(0)));
    let fh = open_out_fh(&harness.recv().await);
    assert_eq!(harness.registry.open_handles(), 1);

    harness.send(frame(FUSE_READ, 5, ino, &read_in(fh, 0, 64)));
    let reply = harness.recv().await;
    assert_eq!(reply.error, 0);
    assert_eq!(reply.body, b"hello world");

    harness.send(frame(FUSE_RELEASE, 6, ino, &release_in(fh)));
    assert_eq!(harness.recv().await.error, 0);
    assert_eq!(harness.registry.open_handles(), 0);

    // Exactly one release; everything after is EBADF.
    harness.send(frame(FUSE_READ, 7, ino, &read_in(fh, 0, 64)));
    assert_eq!(harness.recv().await.error, -libc::EBADF);
    harness.send(frame(FUSE_RELEASE, 8, ino, &release_in(fh)));
    assert_eq!(harness.recv().await.error, -libc::EBADF);

    harness.shutdown().await;
}

#[tokio::test]
async fn lookup_counter_balances_with_forget() {
    let mut harness = Harness::start(MemFs::with_file("source.txt", b"hello world"));
    harness.init().await;

    harness.send(frame(FUSE_LOOKUP, 2, 1, &name_payload("source.txt")));
    let entry = harness.recv().await;
    let ino = u64::from_ne_bytes(entry.body[0..8].try_into().unwrap());
    harness.send(frame(FUSE_LOOKUP, 3, 1, &name_payload("source.txt")));
    harness.recv().await;
    assert_eq!(harness.registry.lookup_count(Ino(ino)), 2);

    // Forget never replies; observe through a fenced statfs.
    harness.send(frame(FUSE_FORGET, 4, ino, &forget_in(2)));
    harness.send(frame(FUSE_STATFS, 5, 1, &[]));
    harness.recv().await;
    assert_eq!(harness.registry.lookup_count(Ino(ino)), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let mut harness = Harness::start(MemFs::new());
    harness.init().await;

    harness.send(frame(FUSE_CREATE, 2, 1, &create_in(0, 0o644, "dest.txt")));
    let created = harness.recv().await;
    assert_eq!(created.error, 0);
    let ino = u64::from_ne_bytes(created.body[0..8].try_into().unwrap());
    // fuse_open_out follows the 128-byte entry body.
    let fh = u64::from_ne_bytes(created.body[128..136].try_into().unwrap());

    harness.send(frame(FUSE_WRITE, 3, ino, &write_in(fh, 0, b"hello world")));
    let written = harness.recv().await;
    assert_eq!(written.error, 0);
    let count = u32::from_ne_bytes(written.body[0..4].try_into().unwrap());
    assert_eq!(count, 11);

    harness.send(frame(FUSE_READ, 4, ino, &read_in(fh, 0, 64)));
    let reply = harness.recv().await;
    assert_eq!(reply.body, b"hello world");

    // create followed by lookup returns the same inode.
    harness.send(frame(FUSE_LOOKUP, 5, 1, &name_payload("dest.txt")));
    let entry = harness.recv().await;
    assert_eq!(
        u64::from_ne_bytes(entry.body[0..8].try_into().unwrap()),
        ino
    );

    // unlink followed by lookup is ENOENT.
    harness.send(frame(FUSE_UNLINK, 6, 1, &name_payload("dest.txt")));
    assert_eq!(harness.recv().await.error, 0);
    harness.send(frame(FUSE_LOOKUP, 7, 1, &name_payload("dest.txt")));
    assert_eq!(harness.recv().await.error, -libc::ENOENT);

    harness.shutdown().await;
}

#[tokio::test]
async fn chmod_round_trips_through_getattr() {
    const FUSE_SETATTR: u32 = 4;
    let mut harness = Harness::start(MemFs::with_file("source.txt", b"hello world"));
    harness.init().await;

    harness.send(frame(FUSE_LOOKUP, 2, 1, &name_payload("source.txt")));
    let entry = harness.recv().await;
    let ino = u64::from_ne_bytes(entry.body[0..8].try_into().unwrap());

    harness.send(frame(FUSE_SETATTR, 3, ino, &setattr_mode_in(0o600)));
    let changed = harness.recv().await;
    assert_eq!(changed.error, 0);

    harness.send(frame(FUSE_GETATTR, 4, ino, &getattr_in()));
    let reply = harness.recv().await;
    assert_eq!(reply.error, 0);
    // fuse_attr.mode sits 60 bytes into the attr, after the 16-byte
    // validity header.
    let mode = u32::from_ne_bytes(reply.body[76..80].try_into().unwrap());
    assert_eq!(mode & 0o7777, 0o600);

    harness.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_in_flight_requests() {
    let mut harness = Harness::start(SlowReadFs { delay: None });
    harness.init().await;

    harness.send(frame(FUSE_OPEN, 2, 2, &open_in(0)));
    let fh = open_out_fh(&harness.recv().await);
    harness.send(frame(FUSE_READ, 3, 2, &read_in(fh, 0, 4096)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.handle.close();
    // The cancelled read gets a best-effort EINTR reply.
    let reply = harness.recv().await;
    assert_eq!(reply.unique, 3);
    assert_eq!(reply.error, -libc::EINTR);

    let result = timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("session did not shut down in time")
        .expect("session task panicked");
    assert!(result.is_ok());
}
