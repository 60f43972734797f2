//! Dispatcher / session core.
//!
//! The dispatcher owns the receive loop (sole reader of the transport),
//! the in-flight request registry, and the reply path. Each decoded
//! request is handed to its operation wrapper in a spawned task;
//! replies go out in completion order and the kernel correlates them by
//! unique id. Forget, interrupt and destroy are handled inline in the
//! receive loop, which pins the ordering the protocol needs: a forget
//! can never be observed after a later operation on the same inode.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::KernelConfig;
use crate::abort::{AbortHandle, AbortOptions, AbortReason, AbortSignal};
use crate::channel::Transport;
use crate::error::{Errno, FsError};
use crate::handlers::{FileInfo, FileLock, Handlers, RequestContext, SetAttrChanges, TimeOrNow, XattrOut};
use crate::ll::fuse_abi as abi;
use crate::ll::reply::{DirentBuf, Response};
use crate::ll::request::{Operation, Request, RequestError};
use crate::ops;
use crate::registry::HandleRegistry;
use crate::types::{Fd, Gid, Mode, Timestamp, Uid};

/// The max size of write requests from the kernel. The absolute
/// minimum is 4k, FUSE recommends at least 128k, max 16M.
pub const MAX_WRITE_SIZE: usize = 16 * 1024 * 1024;

/// Size of the request read buffer: a full write payload plus headers.
pub(crate) const BUFFER_SIZE: usize = MAX_WRITE_SIZE + 4096;

/// How long shutdown waits for in-flight tasks after cancelling them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Tuning knobs for a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Log every request at debug level (also enabled by a truthy
    /// `FUSE_DEBUG` environment variable).
    pub debug: bool,
    /// Deadline applied to every handler invocation; `None` means no
    /// deadline.
    pub default_timeout: Option<Duration>,
    /// Ceiling on concurrently executing wrapper tasks; `None` means
    /// unbounded.
    pub concurrency_limit: Option<usize>,
}

/// A request that has been dispatched but not yet replied to.
#[derive(Debug)]
struct PendingRequest {
    op: &'static str,
    ino: u64,
    arrival: Instant,
    handle: AbortHandle,
}

pub(crate) struct Dispatcher<FS: Handlers> {
    fs: Arc<FS>,
    transport: Arc<dyn Transport>,
    registry: Arc<HandleRegistry>,
    inflight: DashMap<u64, PendingRequest>,
    session: Arc<AbortHandle>,
    session_signal: AbortSignal,
    default_options: AbortOptions,
    limiter: Option<Arc<Semaphore>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    debug: bool,
}

impl<FS: Handlers> Dispatcher<FS> {
    pub(crate) fn new(
        fs: Arc<FS>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Arc<Dispatcher<FS>> {
        let (session, session_signal) = AbortHandle::new();
        Arc::new(Dispatcher {
            fs,
            transport,
            registry: Arc::new(HandleRegistry::new()),
            inflight: DashMap::new(),
            session: Arc::new(session),
            session_signal,
            default_options: AbortOptions {
                signal: None,
                timeout: options.default_timeout,
            },
            limiter: options.concurrency_limit.map(|n| Arc::new(Semaphore::new(n))),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            debug: options.debug,
        })
    }

    pub(crate) fn registry(&self) -> Arc<HandleRegistry> {
        Arc::clone(&self.registry)
    }

    /// Requests session shutdown; the receive loop notices on its next
    /// iteration.
    pub(crate) fn close(&self) {
        self.session.abort(AbortReason::Shutdown);
    }

    pub(crate) fn closed_signal(&self) -> AbortSignal {
        self.session_signal.clone()
    }

    pub(crate) fn session_handle(&self) -> Arc<AbortHandle> {
        Arc::clone(&self.session)
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Runs the session to completion: INIT handshake, receive loop,
    /// then shutdown with a bounded drain of in-flight tasks.
    pub(crate) async fn run(self: Arc<Self>) -> io::Result<()> {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut tasks: JoinSet<()> = JoinSet::new();
        let result = self.receive_loop(&mut buffer, &mut tasks).await;
        self.shutdown(&mut tasks).await;
        result
    }

    async fn receive_loop(
        self: &Arc<Self>,
        buffer: &mut [u8],
        tasks: &mut JoinSet<()>,
    ) -> io::Result<()> {
        loop {
            // Reap whatever finished since the last request; keeps the
            // set from growing without ever blocking the reader.
            while tasks.try_join_next().is_some() {}

            let read = tokio::select! {
                biased;
                _ = self.session_signal.fired() => return Ok(()),
                read = self.transport.read_request(buffer) => read,
            };
            let size = match read {
                Ok(Some(size)) => size,
                Ok(None) => {
                    info!("transport closed, ending session");
                    return Ok(());
                }
                Err(err) => match err.raw_os_error() {
                    // Interrupted or retryable reads per the device
                    // contract.
                    Some(libc::ENOENT) | Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    // Unmounted.
                    Some(libc::ENODEV) => {
                        info!("filesystem was unmounted, ending session");
                        return Ok(());
                    }
                    _ => {
                        error!("fatal transport error: {err}");
                        return Err(err);
                    }
                },
            };
            self.handle_frame(&buffer[..size], tasks).await?;
        }
    }

    async fn handle_frame(self: &Arc<Self>, bytes: &[u8], tasks: &mut JoinSet<()>) -> io::Result<()> {
        let request = match Request::try_from(bytes) {
            Ok(request) => request,
            Err(RequestError::UnknownOperation(opcode)) => {
                // Keep the session alive; the kernel probes for
                // operations we do not implement.
                if let Some(unique) = peek_unique(bytes) {
                    debug!("unknown opcode {opcode}, replying ENOSYS");
                    self.send(unique, &Response::new_error(Errno::ENOSYS));
                }
                return Ok(());
            }
            Err(err) => {
                warn!("dropping malformed request: {err}");
                return Ok(());
            }
        };
        if self.debug {
            debug!("{request}");
        }

        if !self.is_initialized() {
            return match request.operation() {
                Operation::Init { arg } => self.handle_init(&request, arg).await,
                _ => {
                    warn!("refusing operation before init: {request}");
                    self.send(request.unique(), &Response::new_error(Errno::EIO));
                    Ok(())
                }
            };
        }

        match request.operation() {
            Operation::Init { .. } => {
                warn!("duplicate INIT, refusing");
                self.send(request.unique(), &Response::new_error(Errno::EIO));
            }
            Operation::Destroy => {
                self.destroy_filesystem().await;
                self.send(request.unique(), &Response::new_ok());
                self.close();
            }
            Operation::Interrupt { arg } => {
                // No reply to the interrupt itself. An unmatched unique
                // means the reply already went out; drop silently.
                if let Some(pending) = self.inflight.get(&arg.unique) {
                    debug!("interrupting request {}", arg.unique);
                    pending.handle.abort(AbortReason::Interrupted);
                }
            }
            // Forgets are drained inline so they are never reordered
            // past later operations on the same inode.
            Operation::Forget { arg } => {
                let ctx = self.context(&request, &AbortSignal::never());
                ops::forget(&*self.fs, &self.registry, &ctx, request.nodeid(), arg.nlookup).await;
            }
            Operation::BatchForget { nodes } => {
                let ctx = self.context(&request, &AbortSignal::never());
                let nodes: Vec<_> = nodes
                    .iter()
                    .filter(|node| node.nodeid != 0)
                    .map(|node| (crate::types::Ino(node.nodeid), node.nlookup))
                    .collect();
                ops::batch_forget(&*self.fs, &self.registry, &ctx, &nodes).await;
            }
            _ => self.spawn_request(&request, bytes, tasks),
        }
        Ok(())
    }

    /// Registers the request as in-flight and runs its wrapper in its
    /// own task. The receive loop never awaits the handler.
    fn spawn_request(self: &Arc<Self>, request: &Request<'_>, bytes: &[u8], tasks: &mut JoinSet<()>) {
        let unique = request.unique();
        let (handle, signal) = AbortHandle::new();
        self.inflight.insert(
            unique,
            PendingRequest {
                op: request.operation().name(),
                ino: request.nodeid(),
                arrival: Instant::now(),
                handle,
            },
        );
        let owned = bytes.to_vec();
        let this = Arc::clone(self);
        let limiter = self.limiter.clone();
        tasks.spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            this.execute(unique, owned, signal).await;
        });
    }

    async fn execute(self: Arc<Self>, unique: u64, bytes: Vec<u8>, signal: AbortSignal) {
        let request = match Request::try_from(bytes.as_slice()) {
            Ok(request) => request,
            Err(err) => {
                error!("request no longer parses in task: {err}");
                self.finish(unique, &Response::new_error(Errno::EIO));
                return;
            }
        };
        let ctx = self.context(&request, &signal);
        let response = self.run_operation(&request, ctx).await;
        self.finish(unique, &response);
    }

    fn context(&self, request: &Request<'_>, signal: &AbortSignal) -> RequestContext {
        RequestContext {
            uid: request.uid(),
            gid: request.gid(),
            pid: request.pid(),
            umask: 0,
            abort: signal.clone(),
        }
    }

    /// Removes the request from the in-flight set and enqueues its
    /// reply. Replies go out in completion order, not arrival order.
    fn finish(&self, unique: u64, response: &Response) {
        if let Some((_, pending)) = self.inflight.remove(&unique) {
            if self.debug {
                debug!(
                    "request {unique} ({} ino {:#x}) done in {:?}",
                    pending.op,
                    pending.ino,
                    pending.arrival.elapsed()
                );
            }
        }
        self.send(unique, response);
    }

    fn send(&self, unique: u64, response: &Response) {
        let result = response.with_iovec(unique, |iov| self.transport.write_reply(iov));
        if let Err(err) = result {
            // Best effort once shutdown or unmount has begun.
            warn!("failed to send reply for request {unique}: {err}");
        }
    }

    async fn handle_init(&self, request: &Request<'_>, arg: &abi::fuse_init_in) -> io::Result<()> {
        if arg.major != abi::FUSE_KERNEL_VERSION || arg.minor < abi::FUSE_MIN_KERNEL_MINOR_VERSION {
            error!("unsupported FUSE ABI {}.{}", arg.major, arg.minor);
            self.send(request.unique(), &Response::new_error(Errno::EPROTO));
            return Err(io::Error::other("unsupported FUSE ABI version"));
        }

        let capabilities = abi::InitFlags::from_bits_truncate(arg.flags);
        let mut config = KernelConfig::new(capabilities, arg.max_readahead);
        let ctx = self.context(request, &AbortSignal::never());
        if let Err(err) = self.fs.init(&ctx, &mut config).await {
            error!("filesystem init failed: {err}");
            self.send(request.unique(), &Response::new_error(err.errno()));
            return Err(io::Error::other("filesystem init failed"));
        }

        let out = config.init_out(capabilities);
        debug!(
            "INIT response: ABI {}.{}, flags {:#x}, max readahead {}, max write {}",
            out.major, out.minor, out.flags, out.max_readahead, out.max_write
        );
        self.initialized.store(true, Ordering::Release);
        self.send(request.unique(), &Response::new_init(&out));
        Ok(())
    }

    async fn destroy_filesystem(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.fs.destroy().await;
        }
    }

    /// Stops accepting work, cancels everything in flight, drains the
    /// task set under the grace period, then closes the transport.
    async fn shutdown(&self, tasks: &mut JoinSet<()>) {
        self.close();
        for pending in self.inflight.iter() {
            pending.handle.abort(AbortReason::Shutdown);
        }
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("{} request tasks still running after grace period", tasks.len());
            tasks.abort_all();
        }
        self.destroy_filesystem().await;
        self.transport.close();
    }

    /// Executes one operation via its wrapper and encodes the reply.
    async fn run_operation(&self, request: &Request<'_>, mut ctx: RequestContext) -> Response {
        let fs = &*self.fs;
        let reg = &*self.registry;
        let opts = &self.default_options;
        let ino = request.nodeid();

        let result: Result<Response, FsError> = match request.operation() {
            Operation::Lookup { name } => ops::lookup(fs, reg, &ctx, opts, ino, name)
                .await
                .map(|out| entry_response(&out)),
            Operation::GetAttr { arg } => {
                let fh = (arg.getattr_flags & abi::FUSE_GETATTR_FH != 0).then_some(arg.fh);
                ops::getattr(fs, reg, &ctx, opts, ino, fh)
                    .await
                    .map(|out| Response::new_attr(&out.attr, out.ttl))
            }
            Operation::SetAttr { arg } => match setattr_changes(arg) {
                Ok(changes) => ops::setattr(fs, reg, &ctx, opts, ino, changes)
                    .await
                    .map(|out| Response::new_attr(&out.attr, out.ttl)),
                Err(err) => Err(err),
            },
            Operation::ReadLink => ops::readlink(fs, &ctx, opts, ino)
                .await
                .map(|target| Response::new_data(os_bytes(&target))),
            Operation::SymLink { name, target } => {
                ops::symlink(fs, reg, &ctx, opts, ino, name, target)
                    .await
                    .map(|out| entry_response(&out))
            }
            Operation::MkNod { arg, name } => {
                ctx.umask = arg.umask;
                ops::mknod(fs, reg, &ctx, opts, ino, name, arg.mode, arg.rdev)
                    .await
                    .map(|out| entry_response(&out))
            }
            Operation::MkDir { arg, name } => {
                ctx.umask = arg.umask;
                ops::mkdir(fs, reg, &ctx, opts, ino, name, arg.mode)
                    .await
                    .map(|out| entry_response(&out))
            }
            Operation::Unlink { name } => ops::unlink(fs, &ctx, opts, ino, name)
                .await
                .map(|()| Response::new_ok()),
            Operation::RmDir { name } => ops::rmdir(fs, &ctx, opts, ino, name)
                .await
                .map(|()| Response::new_ok()),
            Operation::Rename { arg, name, newname } => {
                ops::rename(fs, &ctx, opts, ino, name, arg.newdir, newname, 0)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::Rename2 { arg, name, newname } => {
                ops::rename(fs, &ctx, opts, ino, name, arg.newdir, newname, arg.flags)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::Link { arg, name } => {
                ops::link(fs, reg, &ctx, opts, arg.oldnodeid, ino, name)
                    .await
                    .map(|out| entry_response(&out))
            }
            Operation::Open { arg } => ops::open(fs, reg, &ctx, opts, ino, arg.flags)
                .await
                .map(|(fd, fi)| Response::new_open(fd, fopen_bits(&fi, false))),
            Operation::Read { arg } => {
                match ops::validate_io_window(arg.offset as i64, i64::from(arg.size)) {
                    Ok((offset, size)) => {
                        ops::read(fs, reg, &ctx, opts, ino, arg.fh, offset, size)
                            .await
                            .map(Response::new_data)
                    }
                    Err(err) => Err(err),
                }
            }
            Operation::Write { arg, data } => {
                match ops::validate_io_window(arg.offset as i64, i64::from(arg.size)) {
                    Ok((offset, _)) => ops::write(fs, reg, &ctx, opts, ino, arg.fh, offset, data)
                        .await
                        .map(Response::new_write),
                    Err(err) => Err(err),
                }
            }
            Operation::Flush { arg } => {
                ops::flush(fs, reg, &ctx, opts, ino, arg.fh, arg.lock_owner)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::Release { arg } => ops::release(fs, reg, &ctx, opts, ino, arg.fh)
                .await
                .map(|()| Response::new_ok()),
            Operation::FSync { arg } => {
                let datasync = arg.fsync_flags & abi::FUSE_FSYNC_FDATASYNC != 0;
                ops::fsync(fs, reg, &ctx, opts, ino, arg.fh, datasync)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::OpenDir { arg } => ops::opendir(fs, reg, &ctx, opts, ino, arg.flags)
                .await
                .map(|(fd, fi)| Response::new_open(fd, fopen_bits(&fi, true))),
            Operation::ReadDir { arg } => {
                ops::readdir(fs, reg, &ctx, opts, ino, arg.fh, arg.offset, arg.size)
                    .await
                    .map(|entries| {
                        let mut buf = DirentBuf::new(arg.size as usize);
                        for entry in &entries {
                            if !buf.push(entry.ino.0, entry.offset, entry.kind, &entry.name) {
                                break;
                            }
                        }
                        Response::new_directory(buf)
                    })
            }
            Operation::ReleaseDir { arg } => ops::releasedir(fs, reg, &ctx, opts, ino, arg.fh)
                .await
                .map(|()| Response::new_ok()),
            Operation::FSyncDir { arg } => {
                let datasync = arg.fsync_flags & abi::FUSE_FSYNC_FDATASYNC != 0;
                ops::fsyncdir(fs, reg, &ctx, opts, ino, arg.fh, datasync)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::StatFs => ops::statfs(fs, &ctx, opts, ino)
                .await
                .map(|st| Response::new_statfs(&st)),
            Operation::SetXAttr { arg, name, value } => {
                ops::setxattr(fs, &ctx, opts, ino, name, value, arg.flags)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::GetXAttr { arg, name } => {
                ops::getxattr(fs, &ctx, opts, ino, name, arg.size)
                    .await
                    .map(xattr_response)
            }
            Operation::ListXAttr { arg } => ops::listxattr(fs, &ctx, opts, ino, arg.size)
                .await
                .map(xattr_response),
            Operation::RemoveXAttr { name } => ops::removexattr(fs, &ctx, opts, ino, name)
                .await
                .map(|()| Response::new_ok()),
            Operation::Access { arg } => ops::access(fs, &ctx, opts, ino, arg.mask)
                .await
                .map(|()| Response::new_ok()),
            Operation::Create { arg, name } => {
                ctx.umask = arg.umask;
                ops::create(fs, reg, &ctx, opts, ino, name, arg.mode, arg.flags)
                    .await
                    .map(|(fd, out)| {
                        Response::new_create(
                            &out.entry.attr,
                            out.entry.generation,
                            out.entry.entry_ttl,
                            out.entry.attr_ttl,
                            fd,
                            fopen_bits(&out.fi, false),
                        )
                    })
            }
            Operation::GetLk { arg } => {
                let lock = file_lock(&arg.lk);
                ops::getlk(fs, reg, &ctx, opts, ino, arg.fh, arg.owner, lock)
                    .await
                    .map(|lk| Response::new_lock(lk.start, lk.end, lk.typ, lk.pid))
            }
            Operation::SetLk { arg, sleep } => {
                let lock = file_lock(&arg.lk);
                let flock = arg.lk_flags & abi::FUSE_LK_FLOCK != 0;
                ops::setlk(fs, reg, &ctx, opts, ino, arg.fh, arg.owner, lock, flock, *sleep)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::FAllocate { arg } => {
                ops::fallocate(fs, reg, &ctx, opts, ino, arg.fh, arg.mode, arg.offset, arg.length)
                    .await
                    .map(|()| Response::new_ok())
            }
            Operation::Lseek { arg } => {
                ops::lseek(fs, reg, &ctx, opts, ino, arg.fh, arg.offset, arg.whence)
                    .await
                    .map(Response::new_lseek)
            }
            Operation::CopyFileRange { arg } => {
                ops::copy_file_range(
                    fs, reg, &ctx, opts, ino, arg.fh_in, arg.off_in, arg.nodeid_out, arg.fh_out,
                    arg.off_out, arg.len, arg.flags,
                )
                .await
                .and_then(|copied| {
                    u32::try_from(copied)
                        .map(Response::new_write)
                        .map_err(|_| FsError::with_message(Errno::EIO, "copy count overflow"))
                })
            }
            Operation::IoCtl { arg, data } => {
                if arg.flags & abi::FUSE_IOCTL_UNRESTRICTED != 0 {
                    Err(Errno::ENOSYS.into())
                } else {
                    ops::ioctl(fs, reg, &ctx, opts, ino, arg.fh, arg.cmd, data, arg.out_size)
                        .await
                        .map(|out| Response::new_ioctl(out.result, &out.data))
                }
            }
            Operation::Poll { arg } => ops::poll(fs, reg, &ctx, opts, ino, arg.fh, arg.events)
                .await
                .map(Response::new_poll),
            Operation::Unsupported { opcode } => {
                debug!("unsupported operation {opcode:?}, replying ENOSYS");
                Err(Errno::ENOSYS.into())
            }
            // Handled inline by the receive loop; arriving here means a
            // protocol violation.
            Operation::Init { .. }
            | Operation::Destroy
            | Operation::Interrupt { .. }
            | Operation::Forget { .. }
            | Operation::BatchForget { .. } => Err(Errno::EIO.into()),
        };

        match result {
            Ok(response) => response,
            Err(err) => {
                if let Some(message) = err.message() {
                    debug!("{} failed: {}: {}", request.operation().name(), err.errno(), message);
                }
                Response::new_error(reply_errno(&err))
            }
        }
    }
}

/// ECANCELED is internal vocabulary; an interrupted or shut-down
/// request reports `EINTR` to the kernel, the POSIX result of an
/// interrupted call. Timeouts keep `ETIMEDOUT`.
fn reply_errno(err: &FsError) -> Errno {
    if err.errno() == Errno::ECANCELED {
        Errno::EINTR
    } else {
        err.errno()
    }
}

fn entry_response(out: &crate::handlers::EntryOut) -> Response {
    Response::new_entry(&out.attr, out.generation, out.entry_ttl, out.attr_ttl)
}

fn xattr_response(out: XattrOut) -> Response {
    match out {
        XattrOut::Size(size) => Response::new_xattr_size(size),
        XattrOut::Data(data) => Response::new_data(data),
    }
}

fn file_lock(lk: &abi::fuse_file_lock) -> FileLock {
    FileLock {
        start: lk.start,
        end: lk.end,
        typ: lk.typ,
        pid: lk.pid,
    }
}

fn os_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

/// Open-flags bits for the reply from the handler's hints.
fn fopen_bits(fi: &FileInfo, dir: bool) -> u32 {
    let mut bits = 0;
    if fi.direct_io {
        bits |= abi::FOPEN_DIRECT_IO;
    }
    if fi.keep_cache {
        bits |= abi::FOPEN_KEEP_CACHE;
    }
    if fi.nonseekable {
        bits |= abi::FOPEN_NONSEEKABLE;
    }
    if fi.noflush {
        bits |= abi::FOPEN_NOFLUSH;
    }
    if dir && fi.cache_dir {
        bits |= abi::FOPEN_CACHE_DIR;
    }
    bits
}

/// Decodes the valid-bit mask of a setattr request into typed changes.
/// Only the supplied fields are set.
fn setattr_changes(arg: &abi::fuse_setattr_in) -> Result<SetAttrChanges, FsError> {
    let mut changes = SetAttrChanges::default();
    if arg.valid & abi::FATTR_MODE != 0 {
        changes.mode = Some(Mode(arg.mode));
    }
    if arg.valid & abi::FATTR_UID != 0 {
        changes.uid = Some(Uid(arg.uid));
    }
    if arg.valid & abi::FATTR_GID != 0 {
        changes.gid = Some(Gid(arg.gid));
    }
    if arg.valid & abi::FATTR_SIZE != 0 {
        changes.size = Some(arg.size);
    }
    if arg.valid & abi::FATTR_ATIME != 0 {
        changes.atime = Some(if arg.valid & abi::FATTR_ATIME_NOW != 0 {
            TimeOrNow::Now
        } else {
            TimeOrNow::SpecificTime(Timestamp::new(arg.atime, arg.atimensec)?.to_system_time())
        });
    }
    if arg.valid & abi::FATTR_MTIME != 0 {
        changes.mtime = Some(if arg.valid & abi::FATTR_MTIME_NOW != 0 {
            TimeOrNow::Now
        } else {
            TimeOrNow::SpecificTime(Timestamp::new(arg.mtime, arg.mtimensec)?.to_system_time())
        });
    }
    if arg.valid & abi::FATTR_CTIME != 0 {
        changes.ctime = Some(Timestamp::new(arg.ctime, arg.ctimensec)?.to_system_time());
    }
    if arg.valid & abi::FATTR_FH != 0 {
        changes.fh = Some(Fd(arg.fh));
    }
    Ok(changes)
}

/// Pulls the unique id out of a frame whose header parsed but whose
/// opcode is unknown.
fn peek_unique(bytes: &[u8]) -> Option<u64> {
    use zerocopy::FromBytes;
    abi::fuse_in_header::read_from_prefix(bytes)
        .ok()
        .map(|(header, _)| header.unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setattr_decoding_selects_supplied_fields() {
        let mut arg = zeroed_setattr();
        arg.valid = abi::FATTR_MODE;
        arg.mode = 0o640;
        let changes = setattr_changes(&arg).unwrap();
        assert!(changes.is_chmod_only());
        assert_eq!(changes.mode, Some(Mode(0o640)));
        assert!(changes.size.is_none());

        let mut arg = zeroed_setattr();
        arg.valid = abi::FATTR_SIZE | abi::FATTR_FH;
        arg.size = 100;
        arg.fh = 3;
        let changes = setattr_changes(&arg).unwrap();
        assert!(changes.is_truncate_only());
        assert_eq!(changes.fh, Some(Fd(3)));
    }

    #[test]
    fn setattr_decoding_rejects_bad_nanos() {
        let mut arg = zeroed_setattr();
        arg.valid = abi::FATTR_ATIME;
        arg.atimensec = 2_000_000_000;
        assert_eq!(
            setattr_changes(&arg).unwrap_err().errno(),
            Errno::EINVAL
        );
    }

    #[test]
    fn fopen_bits_reflect_hints() {
        let fi = FileInfo {
            direct_io: true,
            noflush: true,
            ..FileInfo::default()
        };
        assert_eq!(
            fopen_bits(&fi, false),
            abi::FOPEN_DIRECT_IO | abi::FOPEN_NOFLUSH
        );
        let dir = FileInfo {
            cache_dir: true,
            ..FileInfo::default()
        };
        assert_eq!(fopen_bits(&dir, false), 0);
        assert_eq!(fopen_bits(&dir, true), abi::FOPEN_CACHE_DIR);
    }

    fn zeroed_setattr() -> abi::fuse_setattr_in {
        abi::fuse_setattr_in {
            valid: 0,
            padding: 0,
            fh: 0,
            size: 0,
            lock_owner: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            atimensec: 0,
            mtimensec: 0,
            ctimensec: 0,
            mode: 0,
            unused4: 0,
            uid: 0,
            gid: 0,
            unused5: 0,
        }
    }
}
