//! The handler table.
//!
//! A user filesystem implements [`Handlers`]; every method is one
//! operation slot the kernel may invoke. Slots that are not overridden
//! behave as if the handler were absent and fail with `ENOSYS`, with
//! four exceptions that have defined fallbacks: `getattr` (synthetic
//! root attributes), `forget` (no-op), `statfs` (zeroed statistics) and
//! `access` (grant).
//!
//! Handlers return typed results; the operation wrappers in
//! [`crate::ops`] validate the shapes before anything is encoded for
//! the kernel.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::warn;

use crate::abort::AbortSignal;
use crate::error::{Errno, FsResult};
use crate::types::{Dev, Fd, Flags, Gid, Ino, Mode, RenameFlags, Uid, Whence};
use crate::{FileAttr, FileType, KernelConfig};

/// Identity of the process a request originates from. Immutable for
/// the lifetime of the request; handlers borrow it and must not retain
/// it. The effective cancellation signal rides along so cooperative
/// handlers can observe interrupts, timeouts and shutdown.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// User id of the calling process.
    pub uid: u32,
    /// Group id of the calling process.
    pub gid: u32,
    /// Process id of the calling process.
    pub pid: u32,
    /// Umask of the calling process; zero for operations that do not
    /// carry one.
    pub umask: u32,
    /// The effective signal this invocation runs under.
    pub abort: AbortSignal,
}

impl RequestContext {
    /// A context for driving handlers outside a session, e.g. in tests.
    pub fn detached() -> RequestContext {
        RequestContext {
            uid: 0,
            gid: 0,
            pid: 0,
            umask: 0,
            abort: AbortSignal::never(),
        }
    }
}

/// Either a concrete time or "now", for setattr time updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrNow {
    /// Set to this exact time.
    SpecificTime(SystemTime),
    /// Set to the current time.
    Now,
}

/// The fields a setattr request asks to change. Only the supplied
/// fields are mutated.
#[derive(Debug, Clone, Default)]
pub struct SetAttrChanges {
    /// New permission bits and file type.
    pub mode: Option<Mode>,
    /// New owner.
    pub uid: Option<Uid>,
    /// New group.
    pub gid: Option<Gid>,
    /// New size (truncate/extend).
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<TimeOrNow>,
    /// New modification time.
    pub mtime: Option<TimeOrNow>,
    /// New change time.
    pub ctime: Option<SystemTime>,
    /// File handle, when the request went through an open file.
    pub fh: Option<Fd>,
}

impl SetAttrChanges {
    fn count_non_time(&self) -> usize {
        usize::from(self.mode.is_some())
            + usize::from(self.uid.is_some() || self.gid.is_some())
            + usize::from(self.size.is_some())
    }

    /// A chmod in disguise: only the mode changes.
    pub(crate) fn is_chmod_only(&self) -> bool {
        self.mode.is_some()
            && self.count_non_time() == 1
            && self.atime.is_none()
            && self.mtime.is_none()
    }

    /// A chown in disguise: only owner and/or group change.
    pub(crate) fn is_chown_only(&self) -> bool {
        (self.uid.is_some() || self.gid.is_some())
            && self.count_non_time() == 1
            && self.atime.is_none()
            && self.mtime.is_none()
    }

    /// A truncate in disguise: only the size changes.
    pub(crate) fn is_truncate_only(&self) -> bool {
        self.size.is_some()
            && self.count_non_time() == 1
            && self.atime.is_none()
            && self.mtime.is_none()
    }

    /// A utimens in disguise: only times change.
    pub(crate) fn is_utimens_only(&self) -> bool {
        (self.atime.is_some() || self.mtime.is_some()) && self.count_non_time() == 0
    }
}

/// Result of `lookup` and the entry half of `create`: attributes of the
/// found child plus cache validity periods for the kernel.
#[derive(Debug, Clone)]
pub struct EntryOut {
    /// Attributes of the child; `attr.ino` is the child inode.
    pub attr: FileAttr,
    /// Generation number for inode reuse; leave zero if inodes are
    /// never reused.
    pub generation: u64,
    /// How long the kernel may cache the name-to-inode binding.
    pub entry_ttl: Duration,
    /// How long the kernel may cache the attributes.
    pub attr_ttl: Duration,
}

impl EntryOut {
    /// An entry with the default one-second validity periods.
    pub fn new(attr: FileAttr) -> EntryOut {
        EntryOut {
            attr,
            generation: 0,
            entry_ttl: Duration::from_secs(1),
            attr_ttl: Duration::from_secs(1),
        }
    }
}

/// Result of the getattr/setattr family.
#[derive(Debug, Clone)]
pub struct AttrOut {
    /// Current attributes.
    pub attr: FileAttr,
    /// How long the kernel may cache them.
    pub ttl: Duration,
}

impl AttrOut {
    /// Attributes with the default one-second validity.
    pub fn new(attr: FileAttr) -> AttrOut {
        AttrOut {
            attr,
            ttl: Duration::from_secs(1),
        }
    }
}

/// Open-file state a handler hands back from open/create/opendir.
///
/// `fh` is the handler's private slot value; the core replaces it with
/// a core-allocated [`Fd`] on the wire and keeps the private value in
/// the handle registry. [`Fd::NONE`] disclaims handle state.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Handler-private handle value.
    pub fh: Fd,
    /// Open flags, echoed back to the kernel.
    pub flags: Flags,
    /// Bypass the page cache for this file.
    pub direct_io: bool,
    /// Keep cached data across opens.
    pub keep_cache: bool,
    /// The file is not seekable.
    pub nonseekable: bool,
    /// Skip the flush on close.
    pub noflush: bool,
    /// Allow the kernel to cache this directory (opendir only).
    pub cache_dir: bool,
}

impl FileInfo {
    /// State for an open with the given private handle and flags.
    pub fn new(fh: Fd, flags: Flags) -> FileInfo {
        FileInfo {
            fh,
            flags,
            ..FileInfo::default()
        }
    }
}

/// Result of `create`: the new entry plus its open state.
#[derive(Debug, Clone)]
pub struct CreateOut {
    /// The created entry, as for lookup.
    pub entry: EntryOut,
    /// Open state, as for open.
    pub fi: FileInfo,
}

/// One directory entry produced by `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Inode of the entry.
    pub ino: Ino,
    /// Name within the directory.
    pub name: OsString,
    /// File type.
    pub kind: FileType,
    /// Cursor value at which enumeration resumes *after* this entry.
    /// Must be strictly increasing within a batch.
    pub offset: u64,
}

/// Filesystem statistics for `statfs`.
#[derive(Debug, Clone, Copy)]
pub struct StatVfs {
    /// Total data blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Free blocks available to unprivileged users.
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

impl Default for StatVfs {
    fn default() -> StatVfs {
        StatVfs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 512,
            namelen: 255,
            frsize: 0,
        }
    }
}

/// Result of getxattr/listxattr: either the size probe answer or the
/// actual bytes.
#[derive(Debug, Clone)]
pub enum XattrOut {
    /// The value is this many bytes (reply to a size-0 probe).
    Size(u32),
    /// The value itself.
    Data(Vec<u8>),
}

/// A POSIX byte-range lock.
#[derive(Debug, Clone, Copy)]
pub struct FileLock {
    /// First byte of the range.
    pub start: u64,
    /// Last byte of the range.
    pub end: u64,
    /// `F_RDLCK`, `F_WRLCK` or `F_UNLCK`.
    pub typ: i32,
    /// Owning process.
    pub pid: u32,
}

/// Result of a restricted ioctl.
#[derive(Debug, Clone)]
pub struct IoctlOut {
    /// Value returned to the calling process.
    pub result: i32,
    /// Output buffer contents.
    pub data: Vec<u8>,
}

/// The operation slots a user filesystem may populate.
///
/// Every method receives the request context first; arguments follow in
/// wire order. Defaults fail with `ENOSYS` unless documented otherwise.
#[allow(unused_variables)]
#[async_trait]
pub trait Handlers: Send + Sync + 'static {
    /// Called once before any other handler, with the negotiated kernel
    /// configuration still open for adjustment.
    async fn init(&self, ctx: &RequestContext, config: &mut KernelConfig) -> FsResult<()> {
        Ok(())
    }

    /// Called once when the session ends.
    async fn destroy(&self) {}

    /// Look up a directory entry by name.
    async fn lookup(&self, ctx: &RequestContext, parent: Ino, name: &OsStr) -> FsResult<EntryOut> {
        warn!("[Not Implemented] lookup(parent: {parent:?}, name: {name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// The kernel dropped `nlookup` references to this inode. The core
    /// maintains the lookup counter either way; this slot is for
    /// filesystems that tie state lifetimes to it.
    async fn forget(&self, ctx: &RequestContext, ino: Ino, nlookup: u64) {}

    /// Batched forget. Falls back to [`Handlers::forget`] per node.
    async fn batch_forget(&self, ctx: &RequestContext, nodes: &[(Ino, u64)]) {
        for (ino, nlookup) in nodes {
            self.forget(ctx, *ino, *nlookup).await;
        }
    }

    /// Get attributes. Fallback: the root inode reports a synthetic
    /// 0755 directory owned by the requester; everything else ENOSYS.
    async fn getattr(&self, ctx: &RequestContext, ino: Ino, fh: Option<Fd>) -> FsResult<AttrOut> {
        if ino.is_root() {
            return Ok(AttrOut::new(FileAttr::synthetic_root(ctx.uid, ctx.gid)));
        }
        warn!("[Not Implemented] getattr(ino: {ino:?}, fh: {fh:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Set any combination of attributes. Single-concern requests are
    /// routed to [`Handlers::chmod`], [`Handlers::chown`],
    /// [`Handlers::truncate`] or [`Handlers::utimens`] instead.
    async fn setattr(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        changes: &SetAttrChanges,
    ) -> FsResult<AttrOut> {
        warn!("[Not Implemented] setattr(ino: {ino:?}, changes: {changes:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Change permission bits. Updates ctime. Falls back to setattr.
    async fn chmod(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        mode: Mode,
        fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let changes = SetAttrChanges {
            mode: Some(mode),
            fh,
            ..SetAttrChanges::default()
        };
        self.setattr(ctx, ino, &changes).await
    }

    /// Change owner and/or group; absent fields stay unchanged. Falls
    /// back to setattr.
    async fn chown(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        uid: Option<Uid>,
        gid: Option<Gid>,
        fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let changes = SetAttrChanges {
            uid,
            gid,
            fh,
            ..SetAttrChanges::default()
        };
        self.setattr(ctx, ino, &changes).await
    }

    /// Change the file size. Falls back to setattr.
    async fn truncate(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        size: u64,
        fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let changes = SetAttrChanges {
            size: Some(size),
            fh,
            ..SetAttrChanges::default()
        };
        self.setattr(ctx, ino, &changes).await
    }

    /// Change timestamps. Falls back to setattr.
    async fn utimens(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let changes = SetAttrChanges {
            atime,
            mtime,
            fh,
            ..SetAttrChanges::default()
        };
        self.setattr(ctx, ino, &changes).await
    }

    /// Read the target of a symbolic link.
    async fn readlink(&self, ctx: &RequestContext, ino: Ino) -> FsResult<OsString> {
        warn!("[Not Implemented] readlink(ino: {ino:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Create a file node (regular, device, fifo or socket).
    async fn mknod(
        &self,
        ctx: &RequestContext,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
        rdev: Dev,
    ) -> FsResult<EntryOut> {
        warn!("[Not Implemented] mknod(parent: {parent:?}, name: {name:?}, mode: {mode})");
        Err(Errno::ENOSYS.into())
    }

    /// Create a directory.
    async fn mkdir(
        &self,
        ctx: &RequestContext,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
    ) -> FsResult<EntryOut> {
        warn!("[Not Implemented] mkdir(parent: {parent:?}, name: {name:?}, mode: {mode})");
        Err(Errno::ENOSYS.into())
    }

    /// Remove a file.
    async fn unlink(&self, ctx: &RequestContext, parent: Ino, name: &OsStr) -> FsResult<()> {
        warn!("[Not Implemented] unlink(parent: {parent:?}, name: {name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Remove a directory.
    async fn rmdir(&self, ctx: &RequestContext, parent: Ino, name: &OsStr) -> FsResult<()> {
        warn!("[Not Implemented] rmdir(parent: {parent:?}, name: {name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Create a symbolic link.
    async fn symlink(
        &self,
        ctx: &RequestContext,
        parent: Ino,
        link_name: &OsStr,
        target: &Path,
    ) -> FsResult<EntryOut> {
        warn!("[Not Implemented] symlink(parent: {parent:?}, link_name: {link_name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Rename an entry, honoring [`RenameFlags`].
    async fn rename(
        &self,
        ctx: &RequestContext,
        parent: Ino,
        name: &OsStr,
        newparent: Ino,
        newname: &OsStr,
        flags: RenameFlags,
    ) -> FsResult<()> {
        warn!(
            "[Not Implemented] rename(parent: {parent:?}, name: {name:?}, \
            newparent: {newparent:?}, newname: {newname:?}, flags: {flags:?})"
        );
        Err(Errno::ENOSYS.into())
    }

    /// Create a hard link.
    async fn link(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        newparent: Ino,
        newname: &OsStr,
    ) -> FsResult<EntryOut> {
        warn!("[Not Implemented] link(ino: {ino:?}, newparent: {newparent:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Open a file. The returned [`FileInfo::fh`] is the handler's
    /// private slot; the core allocates the wire handle.
    async fn open(&self, ctx: &RequestContext, ino: Ino, flags: Flags) -> FsResult<FileInfo> {
        warn!("[Not Implemented] open(ino: {ino:?}, flags: {flags})");
        Err(Errno::ENOSYS.into())
    }

    /// Read data. At most `size` bytes; an empty buffer signals EOF.
    async fn read(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        offset: u64,
        size: u32,
    ) -> FsResult<Vec<u8>> {
        warn!("[Not Implemented] read(ino: {ino:?}, fh: {fh}, offset: {offset}, size: {size})");
        Err(Errno::ENOSYS.into())
    }

    /// Write data; returns the number of bytes accepted.
    async fn write(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        offset: u64,
        data: &[u8],
    ) -> FsResult<u32> {
        warn!(
            "[Not Implemented] write(ino: {ino:?}, fh: {fh}, offset: {offset}, len: {})",
            data.len()
        );
        Err(Errno::ENOSYS.into())
    }

    /// Called on each close of a file descriptor referring to this
    /// open file.
    async fn flush(&self, ctx: &RequestContext, ino: Ino, fh: Fd, lock_owner: u64) -> FsResult<()> {
        warn!("[Not Implemented] flush(ino: {ino:?}, fh: {fh})");
        Err(Errno::ENOSYS.into())
    }

    /// Called exactly once when the last reference to an open file is
    /// gone. The core deregisters the handle even if this fails.
    async fn release(&self, ctx: &RequestContext, ino: Ino, fi: &FileInfo) -> FsResult<()> {
        warn!("[Not Implemented] release(ino: {ino:?}, fh: {})", fi.fh);
        Err(Errno::ENOSYS.into())
    }

    /// Flush dirty data; metadata too unless `datasync`.
    async fn fsync(&self, ctx: &RequestContext, ino: Ino, fh: Fd, datasync: bool) -> FsResult<()> {
        warn!("[Not Implemented] fsync(ino: {ino:?}, fh: {fh}, datasync: {datasync})");
        Err(Errno::ENOSYS.into())
    }

    /// Open a directory for enumeration.
    async fn opendir(&self, ctx: &RequestContext, ino: Ino, flags: Flags) -> FsResult<FileInfo> {
        warn!("[Not Implemented] opendir(ino: {ino:?}, flags: {flags})");
        Err(Errno::ENOSYS.into())
    }

    /// Enumerate directory entries starting after `offset`. An empty
    /// batch terminates the enumeration. Entry offsets must be strictly
    /// increasing; the kernel echoes them back to resume.
    async fn readdir(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        offset: u64,
        size: u32,
    ) -> FsResult<Vec<DirEntry>> {
        warn!("[Not Implemented] readdir(ino: {ino:?}, fh: {fh}, offset: {offset})");
        Err(Errno::ENOSYS.into())
    }

    /// Counterpart of opendir; called exactly once per directory handle.
    async fn releasedir(&self, ctx: &RequestContext, ino: Ino, fi: &FileInfo) -> FsResult<()> {
        warn!("[Not Implemented] releasedir(ino: {ino:?}, fh: {})", fi.fh);
        Err(Errno::ENOSYS.into())
    }

    /// Flush directory contents.
    async fn fsyncdir(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        datasync: bool,
    ) -> FsResult<()> {
        warn!("[Not Implemented] fsyncdir(ino: {ino:?}, fh: {fh}, datasync: {datasync})");
        Err(Errno::ENOSYS.into())
    }

    /// Filesystem statistics. Fallback: zeroed statistics with a 512
    /// byte block size and 255 byte name limit.
    async fn statfs(&self, ctx: &RequestContext, ino: Ino) -> FsResult<StatVfs> {
        Ok(StatVfs::default())
    }

    /// Set an extended attribute.
    async fn setxattr(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        name: &OsStr,
        value: &[u8],
        flags: u32,
    ) -> FsResult<()> {
        warn!("[Not Implemented] setxattr(ino: {ino:?}, name: {name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Get an extended attribute. `size` zero is a size probe and must
    /// be answered with [`XattrOut::Size`]; a too-small buffer fails
    /// with `ERANGE`.
    async fn getxattr(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        name: &OsStr,
        size: u32,
    ) -> FsResult<XattrOut> {
        warn!("[Not Implemented] getxattr(ino: {ino:?}, name: {name:?}, size: {size})");
        Err(Errno::ENOSYS.into())
    }

    /// List extended attribute names, NUL-separated; same size-probe
    /// protocol as getxattr.
    async fn listxattr(&self, ctx: &RequestContext, ino: Ino, size: u32) -> FsResult<XattrOut> {
        warn!("[Not Implemented] listxattr(ino: {ino:?}, size: {size})");
        Err(Errno::ENOSYS.into())
    }

    /// Remove an extended attribute.
    async fn removexattr(&self, ctx: &RequestContext, ino: Ino, name: &OsStr) -> FsResult<()> {
        warn!("[Not Implemented] removexattr(ino: {ino:?}, name: {name:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Check access permissions. Fallback: grant.
    async fn access(&self, ctx: &RequestContext, ino: Ino, mask: u32) -> FsResult<()> {
        Ok(())
    }

    /// Atomically create and open a file.
    async fn create(
        &self,
        ctx: &RequestContext,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
        flags: Flags,
    ) -> FsResult<CreateOut> {
        warn!("[Not Implemented] create(parent: {parent:?}, name: {name:?}, mode: {mode})");
        Err(Errno::ENOSYS.into())
    }

    /// Test for a POSIX byte-range lock.
    async fn getlk(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        owner: u64,
        lock: FileLock,
    ) -> FsResult<FileLock> {
        warn!("[Not Implemented] getlk(ino: {ino:?}, fh: {fh})");
        Err(Errno::ENOSYS.into())
    }

    /// Acquire, modify or release a POSIX byte-range lock.
    async fn setlk(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        owner: u64,
        lock: FileLock,
        sleep: bool,
    ) -> FsResult<()> {
        warn!("[Not Implemented] setlk(ino: {ino:?}, fh: {fh}, sleep: {sleep})");
        Err(Errno::ENOSYS.into())
    }

    /// BSD-style whole-file lock (`flock(2)`); `typ` is the lock type
    /// from the request's lock argument.
    async fn flock(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        owner: u64,
        typ: i32,
        sleep: bool,
    ) -> FsResult<()> {
        warn!("[Not Implemented] flock(ino: {ino:?}, fh: {fh}, typ: {typ})");
        Err(Errno::ENOSYS.into())
    }

    /// Restricted ioctl on an open file.
    async fn ioctl(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        cmd: u32,
        in_data: &[u8],
        out_size: u32,
    ) -> FsResult<IoctlOut> {
        warn!("[Not Implemented] ioctl(ino: {ino:?}, fh: {fh}, cmd: {cmd})");
        Err(Errno::ENOSYS.into())
    }

    /// Poll for readiness; returns the ready event mask.
    async fn poll(&self, ctx: &RequestContext, ino: Ino, fh: Fd, events: u32) -> FsResult<u32> {
        warn!("[Not Implemented] poll(ino: {ino:?}, fh: {fh}, events: {events:#x})");
        Err(Errno::ENOSYS.into())
    }

    /// Preallocate or deallocate space.
    async fn fallocate(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        mode: i32,
        offset: u64,
        length: u64,
    ) -> FsResult<()> {
        warn!("[Not Implemented] fallocate(ino: {ino:?}, fh: {fh}, mode: {mode})");
        Err(Errno::ENOSYS.into())
    }

    /// Reposition the file offset; returns the new offset.
    async fn lseek(
        &self,
        ctx: &RequestContext,
        ino: Ino,
        fh: Fd,
        offset: u64,
        whence: Whence,
    ) -> FsResult<u64> {
        warn!("[Not Implemented] lseek(ino: {ino:?}, fh: {fh}, whence: {whence:?})");
        Err(Errno::ENOSYS.into())
    }

    /// Copy a byte range between two open files; returns the number of
    /// bytes copied. Zero requests kernel fallback to read/write.
    #[allow(clippy::too_many_arguments)]
    async fn copy_file_range(
        &self,
        ctx: &RequestContext,
        ino_in: Ino,
        fh_in: Fd,
        off_in: u64,
        ino_out: Ino,
        fh_out: Fd,
        off_out: u64,
        len: u64,
        flags: u64,
    ) -> FsResult<u64> {
        warn!("[Not Implemented] copy_file_range(ino_in: {ino_in:?}, ino_out: {ino_out:?})");
        Err(Errno::ENOSYS.into())
    }
}

/// The empty handler table: nothing overridden, everything behaves as
/// absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFs;

#[async_trait]
impl Handlers for NoopFs {}
