//! Parsing of kernel requests.
//!
//! Every request starts with a `fuse_in_header`; the opcode selects the
//! layout of the remaining payload. Parsing yields a typed
//! [`Operation`] holding the argument structures by value and any
//! trailing names or data as borrows into the request buffer.

use std::ffi::OsStr;
use std::fmt;
use std::mem;

use super::argument::ArgumentIterator;
use super::fuse_abi::*;

/// Error while parsing a request frame.
#[derive(Debug)]
pub(crate) enum RequestError {
    /// Not enough data for the header.
    ShortReadHeader(usize),
    /// Opcode this build does not know.
    UnknownOperation(u32),
    /// Frame shorter than the header claims.
    ShortRead(usize, usize),
    /// Arguments truncated or malformed.
    InsufficientData,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ShortReadHeader(len) => write!(
                f,
                "short read of request header ({} < {})",
                len,
                mem::size_of::<fuse_in_header>()
            ),
            RequestError::UnknownOperation(opcode) => write!(f, "unknown opcode ({opcode})"),
            RequestError::ShortRead(len, total) => {
                write!(f, "short read of request ({len} < {total})")
            }
            RequestError::InsufficientData => write!(f, "insufficient argument data"),
        }
    }
}

impl std::error::Error for RequestError {}

/// A decoded filesystem operation with its arguments.
#[derive(Debug)]
pub(crate) enum Operation<'a> {
    Lookup { name: &'a OsStr },
    Forget { arg: fuse_forget_in },
    GetAttr { arg: fuse_getattr_in },
    SetAttr { arg: fuse_setattr_in },
    ReadLink,
    SymLink { name: &'a OsStr, target: &'a OsStr },
    MkNod { arg: fuse_mknod_in, name: &'a OsStr },
    MkDir { arg: fuse_mkdir_in, name: &'a OsStr },
    Unlink { name: &'a OsStr },
    RmDir { name: &'a OsStr },
    Rename { arg: fuse_rename_in, name: &'a OsStr, newname: &'a OsStr },
    Rename2 { arg: fuse_rename2_in, name: &'a OsStr, newname: &'a OsStr },
    Link { arg: fuse_link_in, name: &'a OsStr },
    Open { arg: fuse_open_in },
    Read { arg: fuse_read_in },
    Write { arg: fuse_write_in, data: &'a [u8] },
    StatFs,
    Release { arg: fuse_release_in },
    FSync { arg: fuse_fsync_in },
    SetXAttr { arg: fuse_setxattr_in, name: &'a OsStr, value: &'a [u8] },
    GetXAttr { arg: fuse_getxattr_in, name: &'a OsStr },
    ListXAttr { arg: fuse_getxattr_in },
    RemoveXAttr { name: &'a OsStr },
    Flush { arg: fuse_flush_in },
    Init { arg: fuse_init_in },
    OpenDir { arg: fuse_open_in },
    ReadDir { arg: fuse_read_in },
    ReleaseDir { arg: fuse_release_in },
    FSyncDir { arg: fuse_fsync_in },
    GetLk { arg: fuse_lk_in },
    SetLk { arg: fuse_lk_in, sleep: bool },
    Access { arg: fuse_access_in },
    Create { arg: fuse_create_in, name: &'a OsStr },
    Interrupt { arg: fuse_interrupt_in },
    BatchForget { nodes: Vec<fuse_forget_one> },
    FAllocate { arg: fuse_fallocate_in },
    Lseek { arg: fuse_lseek_in },
    CopyFileRange { arg: fuse_copy_file_range_in },
    IoCtl { arg: fuse_ioctl_in, data: &'a [u8] },
    Poll { arg: fuse_poll_in },
    Destroy,
    /// Parsed opcode with no dispatch path (bmap, readdirplus, notify
    /// replies); answered with `ENOSYS`.
    Unsupported { opcode: fuse_opcode },
}

impl<'a> Operation<'a> {
    fn parse(opcode: fuse_opcode, data: &mut ArgumentIterator<'a>) -> Option<Operation<'a>> {
        Some(match opcode {
            fuse_opcode::FUSE_LOOKUP => Operation::Lookup {
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_FORGET => Operation::Forget { arg: data.fetch()? },
            fuse_opcode::FUSE_GETATTR => Operation::GetAttr { arg: data.fetch()? },
            fuse_opcode::FUSE_SETATTR => Operation::SetAttr { arg: data.fetch()? },
            fuse_opcode::FUSE_READLINK => Operation::ReadLink,
            fuse_opcode::FUSE_SYMLINK => Operation::SymLink {
                name: data.fetch_str()?,
                target: data.fetch_str()?,
            },
            fuse_opcode::FUSE_MKNOD => Operation::MkNod {
                arg: data.fetch()?,
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_MKDIR => Operation::MkDir {
                arg: data.fetch()?,
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_UNLINK => Operation::Unlink {
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_RMDIR => Operation::RmDir {
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_RENAME => Operation::Rename {
                arg: data.fetch()?,
                name: data.fetch_str()?,
                newname: data.fetch_str()?,
            },
            fuse_opcode::FUSE_RENAME2 => Operation::Rename2 {
                arg: data.fetch()?,
                name: data.fetch_str()?,
                newname: data.fetch_str()?,
            },
            fuse_opcode::FUSE_LINK => Operation::Link {
                arg: data.fetch()?,
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_OPEN => Operation::Open { arg: data.fetch()? },
            fuse_opcode::FUSE_READ => Operation::Read { arg: data.fetch()? },
            fuse_opcode::FUSE_WRITE => {
                let arg: fuse_write_in = data.fetch()?;
                let data = data.fetch_bytes(arg.size as usize)?;
                Operation::Write { arg, data }
            }
            fuse_opcode::FUSE_STATFS => Operation::StatFs,
            fuse_opcode::FUSE_RELEASE => Operation::Release { arg: data.fetch()? },
            fuse_opcode::FUSE_FSYNC => Operation::FSync { arg: data.fetch()? },
            fuse_opcode::FUSE_SETXATTR => {
                let arg: fuse_setxattr_in = data.fetch()?;
                let name = data.fetch_str()?;
                let value = data.fetch_bytes(arg.size as usize)?;
                Operation::SetXAttr { arg, name, value }
            }
            fuse_opcode::FUSE_GETXATTR => Operation::GetXAttr {
                arg: data.fetch()?,
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_LISTXATTR => Operation::ListXAttr { arg: data.fetch()? },
            fuse_opcode::FUSE_REMOVEXATTR => Operation::RemoveXAttr {
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_FLUSH => Operation::Flush { arg: data.fetch()? },
            fuse_opcode::FUSE_INIT => Operation::Init { arg: data.fetch()? },
            fuse_opcode::FUSE_OPENDIR => Operation::OpenDir { arg: data.fetch()? },
            fuse_opcode::FUSE_READDIR => Operation::ReadDir { arg: data.fetch()? },
            fuse_opcode::FUSE_RELEASEDIR => Operation::ReleaseDir { arg: data.fetch()? },
            fuse_opcode::FUSE_FSYNCDIR => Operation::FSyncDir { arg: data.fetch()? },
            fuse_opcode::FUSE_GETLK => Operation::GetLk { arg: data.fetch()? },
            fuse_opcode::FUSE_SETLK => Operation::SetLk {
                arg: data.fetch()?,
                sleep: false,
            },
            fuse_opcode::FUSE_SETLKW => Operation::SetLk {
                arg: data.fetch()?,
                sleep: true,
            },
            fuse_opcode::FUSE_ACCESS => Operation::Access { arg: data.fetch()? },
            fuse_opcode::FUSE_CREATE => Operation::Create {
                arg: data.fetch()?,
                name: data.fetch_str()?,
            },
            fuse_opcode::FUSE_INTERRUPT => Operation::Interrupt { arg: data.fetch()? },
            fuse_opcode::FUSE_DESTROY => Operation::Destroy,
            fuse_opcode::FUSE_BATCH_FORGET => {
                let arg: fuse_batch_forget_in = data.fetch()?;
                let mut nodes = Vec::with_capacity(arg.count as usize);
                for _ in 0..arg.count {
                    nodes.push(data.fetch()?);
                }
                Operation::BatchForget { nodes }
            }
            fuse_opcode::FUSE_FALLOCATE => Operation::FAllocate { arg: data.fetch()? },
            fuse_opcode::FUSE_LSEEK => Operation::Lseek { arg: data.fetch()? },
            fuse_opcode::FUSE_COPY_FILE_RANGE => {
                Operation::CopyFileRange { arg: data.fetch()? }
            }
            fuse_opcode::FUSE_IOCTL => {
                let arg: fuse_ioctl_in = data.fetch()?;
                let data = data.fetch_bytes(arg.in_size as usize)?;
                Operation::IoCtl { arg, data }
            }
            fuse_opcode::FUSE_POLL => Operation::Poll { arg: data.fetch()? },
            fuse_opcode::FUSE_BMAP
            | fuse_opcode::FUSE_NOTIFY_REPLY
            | fuse_opcode::FUSE_READDIRPLUS => Operation::Unsupported { opcode },
        })
    }

    /// Short name for logs.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Operation::Lookup { .. } => "LOOKUP",
            Operation::Forget { .. } => "FORGET",
            Operation::GetAttr { .. } => "GETATTR",
            Operation::SetAttr { .. } => "SETATTR",
            Operation::ReadLink => "READLINK",
            Operation::SymLink { .. } => "SYMLINK",
            Operation::MkNod { .. } => "MKNOD",
            Operation::MkDir { .. } => "MKDIR",
            Operation::Unlink { .. } => "UNLINK",
            Operation::RmDir { .. } => "RMDIR",
            Operation::Rename { .. } => "RENAME",
            Operation::Rename2 { .. } => "RENAME2",
            Operation::Link { .. } => "LINK",
            Operation::Open { .. } => "OPEN",
            Operation::Read { .. } => "READ",
            Operation::Write { .. } => "WRITE",
            Operation::StatFs => "STATFS",
            Operation::Release { .. } => "RELEASE",
            Operation::FSync { .. } => "FSYNC",
            Operation::SetXAttr { .. } => "SETXATTR",
            Operation::GetXAttr { .. } => "GETXATTR",
            Operation::ListXAttr { .. } => "LISTXATTR",
            Operation::RemoveXAttr { .. } => "REMOVEXATTR",
            Operation::Flush { .. } => "FLUSH",
            Operation::Init { .. } => "INIT",
            Operation::OpenDir { .. } => "OPENDIR",
            Operation::ReadDir { .. } => "READDIR",
            Operation::ReleaseDir { .. } => "RELEASEDIR",
            Operation::FSyncDir { .. } => "FSYNCDIR",
            Operation::GetLk { .. } => "GETLK",
            Operation::SetLk { sleep: false, .. } => "SETLK",
            Operation::SetLk { sleep: true, .. } => "SETLKW",
            Operation::Access { .. } => "ACCESS",
            Operation::Create { .. } => "CREATE",
            Operation::Interrupt { .. } => "INTERRUPT",
            Operation::BatchForget { .. } => "BATCH_FORGET",
            Operation::FAllocate { .. } => "FALLOCATE",
            Operation::Lseek { .. } => "LSEEK",
            Operation::CopyFileRange { .. } => "COPY_FILE_RANGE",
            Operation::IoCtl { .. } => "IOCTL",
            Operation::Poll { .. } => "POLL",
            Operation::Destroy => "DESTROY",
            Operation::Unsupported { .. } => "UNSUPPORTED",
        }
    }
}

/// One parsed kernel request.
#[derive(Debug)]
pub(crate) struct Request<'a> {
    header: fuse_in_header,
    operation: Operation<'a>,
}

impl<'a> fmt::Display for Request<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FUSE({:3}) ino {:#018x}: {}",
            self.header.unique,
            self.header.nodeid,
            self.operation.name()
        )
    }
}

impl<'a> TryFrom<&'a [u8]> for Request<'a> {
    type Error = RequestError;

    fn try_from(data: &'a [u8]) -> Result<Self, Self::Error> {
        let data_len = data.len();
        let mut data = ArgumentIterator::new(data);
        let header: fuse_in_header = data
            .fetch()
            .ok_or(RequestError::ShortReadHeader(data_len))?;
        let opcode = fuse_opcode::try_from(header.opcode)
            .map_err(|_| RequestError::UnknownOperation(header.opcode))?;
        if data_len < header.len as usize {
            return Err(RequestError::ShortRead(data_len, header.len as usize));
        }
        let operation =
            Operation::parse(opcode, &mut data).ok_or(RequestError::InsufficientData)?;
        Ok(Request { header, operation })
    }
}

impl<'a> Request<'a> {
    /// Unique id assigned by the kernel; interrupt correlates by it.
    pub(crate) fn unique(&self) -> u64 {
        self.header.unique
    }

    /// Node id the request targets (0 for session-scoped requests).
    pub(crate) fn nodeid(&self) -> u64 {
        self.header.nodeid
    }

    pub(crate) fn uid(&self) -> u32 {
        self.header.uid
    }

    pub(crate) fn gid(&self) -> u32 {
        self.header.gid
    }

    pub(crate) fn pid(&self) -> u32 {
        self.header.pid
    }

    pub(crate) fn operation(&self) -> &Operation<'a> {
        &self.operation
    }
}
