//! Operation wrappers.
//!
//! One wrapper per FUSE operation, all with the same shape: validate
//! the inputs (`EINVAL`, `EBADF`), compose the effective cancellation
//! signal from the caller's [`AbortOptions`], invoke the handler under
//! it, validate the result shape, and surface failures as canonical
//! errnos. A malformed result maps to `EIO` and is logged; `ENOSYS` is
//! reserved for handlers that are genuinely absent.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use log::warn;

use crate::abort::{AbortOptions, race_with_abort};
use crate::error::{Errno, FsError, FsResult};
use crate::handlers::{
    AttrOut, CreateOut, DirEntry, EntryOut, FileInfo, FileLock, Handlers, IoctlOut,
    RequestContext, SetAttrChanges, StatVfs, XattrOut,
};
use crate::registry::{HandleEntry, HandleRegistry};
use crate::FileAttr;
use crate::types::{
    Dev, Fd, Flags, Ino, Mode, RenameFlags, Whence, validate_name, validate_xattr_name,
};

/// Validates a read/write window: non-negative 64-bit offset and
/// non-negative 32-bit size. Public entry point for callers holding raw
/// integers; the wire paths arrive already unsigned.
pub fn validate_io_window(offset: i64, size: i64) -> FsResult<(u64, u32)> {
    let offset = u64::try_from(offset).map_err(|_| FsError::new(Errno::EINVAL))?;
    let size = u32::try_from(size).map_err(|_| FsError::new(Errno::EINVAL))?;
    Ok((offset, size))
}

fn shape_error(op: &'static str, why: &str) -> FsError {
    warn!("{op}: malformed handler result: {why}");
    FsError::with_message(Errno::EIO, format!("{op}: {why}"))
}

fn validate_attr(op: &'static str, attr: &FileAttr) -> FsResult<()> {
    if attr.ino.0 == 0 {
        return Err(shape_error(op, "attribute inode is zero"));
    }
    if attr.perm > 0o7777 {
        return Err(shape_error(op, "permission bits out of range"));
    }
    Ok(())
}

fn validate_entry(op: &'static str, entry: &EntryOut) -> FsResult<()> {
    validate_attr(op, &entry.attr)
}

/// Builds the context a handler sees: same identity, effective signal.
fn handler_ctx(ctx: &RequestContext, opts: &AbortOptions) -> RequestContext {
    let effective = opts.effective_signal(ctx.abort.clone());
    RequestContext {
        abort: effective,
        ..ctx.clone()
    }
}

/// Resolves the wire handle to its registry entry, kind-checked.
fn resolve_handle(reg: &HandleRegistry, fh: u64, dir: bool) -> FsResult<HandleEntry> {
    reg.get(Fd(fh), dir)
}

pub(crate) async fn lookup<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
) -> FsResult<EntryOut> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.lookup(&ctx, parent, name), &ctx.abort).await?;
    validate_entry("lookup", &out)?;
    reg.note_lookup(out.attr.ino);
    Ok(out)
}

pub(crate) async fn getattr<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: Option<u64>,
) -> FsResult<AttrOut> {
    let ino = Ino::check(ino)?;
    let fh = match fh {
        Some(raw) => Some(resolve_handle(reg, raw, false)?.fi.fh),
        None => None,
    };
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.getattr(&ctx, ino, fh), &ctx.abort).await?;
    validate_attr("getattr", &out.attr)?;
    Ok(out)
}

pub(crate) async fn setattr<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    mut changes: SetAttrChanges,
) -> FsResult<AttrOut> {
    let ino = Ino::check(ino)?;
    if let Some(fh) = changes.fh {
        changes.fh = Some(resolve_handle(reg, fh.0, false)?.fi.fh);
    }
    let ctx = handler_ctx(ctx, opts);
    // Single-concern requests go to the dedicated slot; its default
    // forwards back into the generic setattr.
    let task = async {
        if changes.is_chmod_only() {
            let mode = changes.mode.expect("classified as chmod");
            fs.chmod(&ctx, ino, mode, changes.fh).await
        } else if changes.is_chown_only() {
            fs.chown(&ctx, ino, changes.uid, changes.gid, changes.fh)
                .await
        } else if changes.is_truncate_only() {
            let size = changes.size.expect("classified as truncate");
            fs.truncate(&ctx, ino, size, changes.fh).await
        } else if changes.is_utimens_only() {
            fs.utimens(&ctx, ino, changes.atime, changes.mtime, changes.fh)
                .await
        } else {
            fs.setattr(&ctx, ino, &changes).await
        }
    };
    let out = race_with_abort(task, &ctx.abort).await?;
    validate_attr("setattr", &out.attr)?;
    Ok(out)
}

pub(crate) async fn readlink<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
) -> FsResult<OsString> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    let target = race_with_abort(fs.readlink(&ctx, ino), &ctx.abort).await?;
    if target.is_empty() {
        return Err(shape_error("readlink", "empty target"));
    }
    if target.len() > libc::PATH_MAX as usize {
        return Err(shape_error("readlink", "target longer than PATH_MAX"));
    }
    Ok(target)
}

pub(crate) async fn mknod<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
    mode: u32,
    rdev: u32,
) -> FsResult<EntryOut> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(
        fs.mknod(&ctx, parent, name, Mode(mode), Dev(rdev)),
        &ctx.abort,
    )
    .await?;
    validate_entry("mknod", &out)?;
    reg.note_lookup(out.attr.ino);
    Ok(out)
}

pub(crate) async fn mkdir<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
    mode: u32,
) -> FsResult<EntryOut> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.mkdir(&ctx, parent, name, Mode(mode)), &ctx.abort).await?;
    validate_entry("mkdir", &out)?;
    reg.note_lookup(out.attr.ino);
    Ok(out)
}

pub(crate) async fn unlink<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
) -> FsResult<()> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.unlink(&ctx, parent, name), &ctx.abort).await
}

pub(crate) async fn rmdir<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
) -> FsResult<()> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.rmdir(&ctx, parent, name), &ctx.abort).await
}

pub(crate) async fn symlink<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    link_name: &OsStr,
    target: &OsStr,
) -> FsResult<EntryOut> {
    let parent = Ino::check(parent)?;
    validate_name(link_name)?;
    if target.is_empty() {
        return Err(FsError::with_message(Errno::EINVAL, "empty symlink target"));
    }
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(
        fs.symlink(&ctx, parent, link_name, Path::new(target)),
        &ctx.abort,
    )
    .await?;
    validate_entry("symlink", &out)?;
    reg.note_lookup(out.attr.ino);
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn rename<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
    newparent: u64,
    newname: &OsStr,
    flags: u32,
) -> FsResult<()> {
    let parent = Ino::check(parent)?;
    let newparent = Ino::check(newparent)?;
    validate_name(name)?;
    validate_name(newname)?;
    let flags = RenameFlags::check(flags)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(
        fs.rename(&ctx, parent, name, newparent, newname, flags),
        &ctx.abort,
    )
    .await
}

pub(crate) async fn link<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    newparent: u64,
    newname: &OsStr,
) -> FsResult<EntryOut> {
    let ino = Ino::check(ino)?;
    let newparent = Ino::check(newparent)?;
    validate_name(newname)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.link(&ctx, ino, newparent, newname), &ctx.abort).await?;
    validate_entry("link", &out)?;
    reg.note_lookup(out.attr.ino);
    Ok(out)
}

/// On success the returned `Fd` is the core-allocated wire handle; the
/// handler's own state is kept in the registry.
pub(crate) async fn open<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    flags: u32,
) -> FsResult<(Fd, FileInfo)> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    let fi = race_with_abort(fs.open(&ctx, ino, Flags(flags)), &ctx.abort).await?;
    let fd = reg.register(ino, fi.clone(), false);
    Ok((fd, fi))
}

pub(crate) async fn read<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    offset: u64,
    size: u32,
) -> FsResult<Vec<u8>> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    let data = race_with_abort(
        fs.read(&ctx, ino, entry.fi.fh, offset, size),
        &ctx.abort,
    )
    .await?;
    if data.len() > size as usize {
        return Err(shape_error("read", "more data than requested"));
    }
    Ok(data)
}

pub(crate) async fn write<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    offset: u64,
    data: &[u8],
) -> FsResult<u32> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    let written = race_with_abort(
        fs.write(&ctx, ino, entry.fi.fh, offset, data),
        &ctx.abort,
    )
    .await?;
    if written as usize > data.len() {
        return Err(shape_error("write", "wrote more than was supplied"));
    }
    Ok(written)
}

pub(crate) async fn flush<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    lock_owner: u64,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.flush(&ctx, ino, entry.fi.fh, lock_owner), &ctx.abort).await
}

/// The handle is deregistered before the handler runs, so exactly one
/// release observes it and later operations fail with `EBADF` even if
/// the handler errors here.
pub(crate) async fn release<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = reg.deregister(Fd(fh), false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.release(&ctx, ino, &entry.fi), &ctx.abort).await
}

pub(crate) async fn fsync<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    datasync: bool,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.fsync(&ctx, ino, entry.fi.fh, datasync), &ctx.abort).await
}

pub(crate) async fn opendir<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    flags: u32,
) -> FsResult<(Fd, FileInfo)> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    let fi = race_with_abort(fs.opendir(&ctx, ino, Flags(flags)), &ctx.abort).await?;
    let fd = reg.register(ino, fi.clone(), true);
    Ok((fd, fi))
}

pub(crate) async fn readdir<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    offset: u64,
    size: u32,
) -> FsResult<Vec<DirEntry>> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, true)?;
    let ctx = handler_ctx(ctx, opts);
    let entries = race_with_abort(
        fs.readdir(&ctx, ino, entry.fi.fh, offset, size),
        &ctx.abort,
    )
    .await?;
    // Offsets are the only cursor values the kernel may echo back;
    // enforce that they advance strictly.
    let mut last = offset;
    for entry in &entries {
        if entry.ino.0 == 0 {
            return Err(shape_error("readdir", "entry inode is zero"));
        }
        validate_name(&entry.name)
            .map_err(|_| shape_error("readdir", "invalid entry name"))?;
        if entry.offset <= last {
            return Err(shape_error("readdir", "offsets not strictly increasing"));
        }
        last = entry.offset;
    }
    Ok(entries)
}

pub(crate) async fn releasedir<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = reg.deregister(Fd(fh), true)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.releasedir(&ctx, ino, &entry.fi), &ctx.abort).await
}

pub(crate) async fn fsyncdir<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    datasync: bool,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, true)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.fsyncdir(&ctx, ino, entry.fi.fh, datasync), &ctx.abort).await
}

pub(crate) async fn statfs<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
) -> FsResult<StatVfs> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.statfs(&ctx, ino), &ctx.abort).await
}

pub(crate) async fn setxattr<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    name: &OsStr,
    value: &[u8],
    flags: u32,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    validate_xattr_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.setxattr(&ctx, ino, name, value, flags), &ctx.abort).await
}

pub(crate) async fn getxattr<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    name: &OsStr,
    size: u32,
) -> FsResult<XattrOut> {
    let ino = Ino::check(ino)?;
    validate_xattr_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.getxattr(&ctx, ino, name, size), &ctx.abort).await?;
    validate_xattr_out("getxattr", size, out)
}

pub(crate) async fn listxattr<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    size: u32,
) -> FsResult<XattrOut> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(fs.listxattr(&ctx, ino, size), &ctx.abort).await?;
    validate_xattr_out("listxattr", size, out)
}

/// The size-probe protocol: a zero-size request asks for the value
/// length; a sized request gets the bytes, `ERANGE` when they do not
/// fit.
fn validate_xattr_out(op: &'static str, size: u32, out: XattrOut) -> FsResult<XattrOut> {
    match (size, out) {
        (0, XattrOut::Size(n)) => Ok(XattrOut::Size(n)),
        (0, XattrOut::Data(data)) => Ok(XattrOut::Size(data.len() as u32)),
        (_, XattrOut::Data(data)) => {
            if data.len() > size as usize {
                Err(FsError::new(Errno::ERANGE))
            } else {
                Ok(XattrOut::Data(data))
            }
        }
        (_, XattrOut::Size(_)) => Err(shape_error(op, "size answer to a data request")),
    }
}

pub(crate) async fn removexattr<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    name: &OsStr,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    validate_xattr_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.removexattr(&ctx, ino, name), &ctx.abort).await
}

pub(crate) async fn access<FS: Handlers + ?Sized>(
    fs: &FS,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    mask: u32,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.access(&ctx, ino, mask), &ctx.abort).await
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn create<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    parent: u64,
    name: &OsStr,
    mode: u32,
    flags: u32,
) -> FsResult<(Fd, CreateOut)> {
    let parent = Ino::check(parent)?;
    validate_name(name)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(
        fs.create(&ctx, parent, name, Mode(mode), Flags(flags)),
        &ctx.abort,
    )
    .await?;
    validate_entry("create", &out.entry)?;
    let fd = reg.register(out.entry.attr.ino, out.fi.clone(), false);
    reg.note_lookup(out.entry.attr.ino);
    Ok((fd, out))
}

pub(crate) async fn getlk<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    owner: u64,
    lock: FileLock,
) -> FsResult<FileLock> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.getlk(&ctx, ino, entry.fi.fh, owner, lock), &ctx.abort).await
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn setlk<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    owner: u64,
    lock: FileLock,
    flock: bool,
    sleep: bool,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    if flock {
        race_with_abort(
            fs.flock(&ctx, ino, entry.fi.fh, owner, lock.typ, sleep),
            &ctx.abort,
        )
        .await
    } else {
        race_with_abort(
            fs.setlk(&ctx, ino, entry.fi.fh, owner, lock, sleep),
            &ctx.abort,
        )
        .await
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn ioctl<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    cmd: u32,
    in_data: &[u8],
    out_size: u32,
) -> FsResult<IoctlOut> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    let out = race_with_abort(
        fs.ioctl(&ctx, ino, entry.fi.fh, cmd, in_data, out_size),
        &ctx.abort,
    )
    .await?;
    if out.data.len() > out_size as usize {
        return Err(shape_error("ioctl", "more output than requested"));
    }
    Ok(out)
}

pub(crate) async fn poll<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    events: u32,
) -> FsResult<u32> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(fs.poll(&ctx, ino, entry.fi.fh, events), &ctx.abort).await
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn fallocate<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    mode: u32,
    offset: u64,
    length: u64,
) -> FsResult<()> {
    let ino = Ino::check(ino)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(
        fs.fallocate(&ctx, ino, entry.fi.fh, mode as i32, offset, length),
        &ctx.abort,
    )
    .await
}

pub(crate) async fn lseek<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino: u64,
    fh: u64,
    offset: u64,
    whence: u32,
) -> FsResult<u64> {
    let ino = Ino::check(ino)?;
    let whence = Whence::check(whence)?;
    let entry = resolve_handle(reg, fh, false)?;
    let ctx = handler_ctx(ctx, opts);
    race_with_abort(
        fs.lseek(&ctx, ino, entry.fi.fh, offset, whence),
        &ctx.abort,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn copy_file_range<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    opts: &AbortOptions,
    ino_in: u64,
    fh_in: u64,
    off_in: u64,
    ino_out: u64,
    fh_out: u64,
    off_out: u64,
    len: u64,
    flags: u64,
) -> FsResult<u64> {
    let ino_in = Ino::check(ino_in)?;
    let ino_out = Ino::check(ino_out)?;
    let src = resolve_handle(reg, fh_in, false)?;
    let dst = resolve_handle(reg, fh_out, false)?;
    let ctx = handler_ctx(ctx, opts);
    let copied = race_with_abort(
        fs.copy_file_range(
            &ctx, ino_in, src.fi.fh, off_in, ino_out, dst.fi.fh, off_out, len, flags,
        ),
        &ctx.abort,
    )
    .await?;
    if copied > len {
        return Err(shape_error("copy_file_range", "copied more than requested"));
    }
    Ok(copied)
}

/// Forget is not a wrapper in the usual sense: it never replies and
/// never consults the effective signal. The registry decrement happens
/// before the handler runs.
pub(crate) async fn forget<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    ino: u64,
    nlookup: u64,
) {
    let Ok(ino) = Ino::check(ino) else { return };
    reg.forget(ino, nlookup);
    fs.forget(ctx, ino, nlookup).await;
}

pub(crate) async fn batch_forget<FS: Handlers + ?Sized>(
    fs: &FS,
    reg: &HandleRegistry,
    ctx: &RequestContext,
    nodes: &[(Ino, u64)],
) {
    for (ino, nlookup) in nodes {
        reg.forget(*ino, *nlookup);
    }
    fs.batch_forget(ctx, nodes).await;
}
