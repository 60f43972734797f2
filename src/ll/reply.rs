//! Encoding of replies to the kernel.
//!
//! A [`Response`] is the body of one reply; `with_iovec` frames it
//! behind a `fuse_out_header` carrying the request's unique id and, for
//! errors, the negated errno.

use std::io::IoSlice;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use smallvec::{SmallVec, smallvec};
use zerocopy::{Immutable, IntoBytes};

use super::fuse_abi as abi;
use crate::FileAttr;
use crate::FileType;
use crate::error::Errno;
use crate::handlers::StatVfs;
use crate::types::{Fd, Timestamp};

const INLINE_DATA_THRESHOLD: usize = size_of::<u64>() * 4;
pub(crate) type ResponseBuf = SmallVec<[u8; INLINE_DATA_THRESHOLD]>;

/// Body of one reply frame.
#[derive(Debug)]
pub(crate) enum Response {
    /// `None` is the empty OK reply.
    Error(Option<Errno>),
    Data(ResponseBuf),
}

impl Response {
    /// Frames the response for the given unique id and hands the iovec
    /// to `f`, which performs the actual write.
    pub(crate) fn with_iovec<F: FnOnce(&[IoSlice<'_>]) -> T, T>(&self, unique: u64, f: F) -> T {
        let datalen = match self {
            Response::Error(_) => 0,
            Response::Data(v) => v.len(),
        };
        let header = abi::fuse_out_header {
            unique,
            error: if let Response::Error(Some(errno)) = self {
                -errno.code()
            } else {
                0
            },
            len: (size_of::<abi::fuse_out_header>() + datalen) as u32,
        };
        let mut v: SmallVec<[IoSlice<'_>; 2]> = smallvec![IoSlice::new(header.as_bytes())];
        if let Response::Data(d) = self {
            v.push(IoSlice::new(d));
        }
        f(&v)
    }

    pub(crate) fn new_ok() -> Self {
        Response::Error(None)
    }

    pub(crate) fn new_error(errno: Errno) -> Self {
        Response::Error(Some(errno))
    }

    pub(crate) fn new_data<T: AsRef<[u8]> + Into<Vec<u8>>>(data: T) -> Self {
        Response::Data(if data.as_ref().len() <= INLINE_DATA_THRESHOLD {
            ResponseBuf::from_slice(data.as_ref())
        } else {
            ResponseBuf::from_vec(data.into())
        })
    }

    pub(crate) fn new_entry(
        attr: &FileAttr,
        generation: u64,
        entry_ttl: Duration,
        attr_ttl: Duration,
    ) -> Self {
        let d = abi::fuse_entry_out {
            nodeid: attr.ino.0,
            generation,
            entry_valid: entry_ttl.as_secs(),
            attr_valid: attr_ttl.as_secs(),
            entry_valid_nsec: entry_ttl.subsec_nanos(),
            attr_valid_nsec: attr_ttl.subsec_nanos(),
            attr: fuse_attr_from_attr(attr),
        };
        Self::from_struct(&d)
    }

    pub(crate) fn new_attr(attr: &FileAttr, ttl: Duration) -> Self {
        let d = abi::fuse_attr_out {
            attr_valid: ttl.as_secs(),
            attr_valid_nsec: ttl.subsec_nanos(),
            dummy: 0,
            attr: fuse_attr_from_attr(attr),
        };
        Self::from_struct(&d)
    }

    pub(crate) fn new_open(fh: Fd, open_flags: u32) -> Self {
        let d = abi::fuse_open_out {
            fh: fh.0,
            open_flags,
            padding: 0,
        };
        Self::from_struct(&d)
    }

    /// Create replies carry an entry followed by an open body.
    pub(crate) fn new_create(
        attr: &FileAttr,
        generation: u64,
        entry_ttl: Duration,
        attr_ttl: Duration,
        fh: Fd,
        open_flags: u32,
    ) -> Self {
        let entry = abi::fuse_entry_out {
            nodeid: attr.ino.0,
            generation,
            entry_valid: entry_ttl.as_secs(),
            attr_valid: attr_ttl.as_secs(),
            entry_valid_nsec: entry_ttl.subsec_nanos(),
            attr_valid_nsec: attr_ttl.subsec_nanos(),
            attr: fuse_attr_from_attr(attr),
        };
        let open = abi::fuse_open_out {
            fh: fh.0,
            open_flags,
            padding: 0,
        };
        let mut buf = ResponseBuf::from_slice(entry.as_bytes());
        buf.extend_from_slice(open.as_bytes());
        Response::Data(buf)
    }

    pub(crate) fn new_write(written: u32) -> Self {
        Self::from_struct(&abi::fuse_write_out {
            size: written,
            padding: 0,
        })
    }

    pub(crate) fn new_statfs(st: &StatVfs) -> Self {
        Self::from_struct(&abi::fuse_statfs_out {
            st: abi::fuse_kstatfs {
                blocks: st.blocks,
                bfree: st.bfree,
                bavail: st.bavail,
                files: st.files,
                ffree: st.ffree,
                bsize: st.bsize,
                namelen: st.namelen,
                frsize: st.frsize,
                padding: 0,
                spare: [0; 6],
            },
        })
    }

    pub(crate) fn new_xattr_size(size: u32) -> Self {
        Self::from_struct(&abi::fuse_getxattr_out { size, padding: 0 })
    }

    pub(crate) fn new_lock(start: u64, end: u64, typ: i32, pid: u32) -> Self {
        Self::from_struct(&abi::fuse_lk_out {
            lk: abi::fuse_file_lock {
                start,
                end,
                typ,
                pid,
            },
        })
    }

    pub(crate) fn new_lseek(offset: u64) -> Self {
        Self::from_struct(&abi::fuse_lseek_out { offset })
    }

    pub(crate) fn new_ioctl(result: i32, data: &[u8]) -> Self {
        let out = abi::fuse_ioctl_out {
            result,
            flags: 0,
            in_iovs: 1,
            out_iovs: u32::from(!data.is_empty()),
        };
        let mut buf = ResponseBuf::from_slice(out.as_bytes());
        buf.extend_from_slice(data);
        Response::Data(buf)
    }

    pub(crate) fn new_poll(revents: u32) -> Self {
        Self::from_struct(&abi::fuse_poll_out {
            revents,
            padding: 0,
        })
    }

    pub(crate) fn new_init(out: &abi::fuse_init_out) -> Self {
        Self::from_struct(out)
    }

    pub(crate) fn new_directory(buf: DirentBuf) -> Self {
        Response::Data(ResponseBuf::from_vec(buf.buf))
    }

    fn from_struct<T: IntoBytes + Immutable>(data: &T) -> Self {
        Response::Data(ResponseBuf::from_slice(data.as_bytes()))
    }
}

/// Accumulates encoded directory entries up to the size the kernel
/// asked for.
#[derive(Debug)]
pub(crate) struct DirentBuf {
    buf: Vec<u8>,
    max_size: usize,
}

impl DirentBuf {
    pub(crate) fn new(max_size: usize) -> DirentBuf {
        DirentBuf {
            buf: Vec::with_capacity(max_size.min(4096)),
            max_size,
        }
    }

    /// Appends one entry. Returns false (and appends nothing) when the
    /// entry would exceed the buffer size.
    pub(crate) fn push(&mut self, ino: u64, offset: u64, kind: FileType, name: &std::ffi::OsStr) -> bool {
        let name = name.as_bytes();
        let header_len = size_of::<abi::fuse_dirent>();
        let padded = (header_len + name.len()).next_multiple_of(8);
        if self.buf.len() + padded > self.max_size {
            return false;
        }
        let dirent = abi::fuse_dirent {
            ino,
            off: offset,
            namelen: name.len() as u32,
            // Directory entry type is the file-type bits shifted down,
            // matching d_type in readdir(3).
            typ: mode_from_file_type(kind) >> 12,
        };
        self.buf.extend_from_slice(dirent.as_bytes());
        self.buf.extend_from_slice(name);
        self.buf.resize(self.buf.len() + padded - header_len - name.len(), 0);
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The `S_IF*` bits for a file type.
pub(crate) fn mode_from_file_type(kind: FileType) -> u32 {
    match kind {
        FileType::NamedPipe => libc::S_IFIFO,
        FileType::CharDevice => libc::S_IFCHR,
        FileType::BlockDevice => libc::S_IFBLK,
        FileType::Directory => libc::S_IFDIR,
        FileType::RegularFile => libc::S_IFREG,
        FileType::Symlink => libc::S_IFLNK,
        FileType::Socket => libc::S_IFSOCK,
    }
}

pub(crate) fn fuse_attr_from_attr(attr: &FileAttr) -> abi::fuse_attr {
    let atime = Timestamp::from_system_time(attr.atime);
    let mtime = Timestamp::from_system_time(attr.mtime);
    let ctime = Timestamp::from_system_time(attr.ctime);

    abi::fuse_attr {
        ino: attr.ino.0,
        size: attr.size,
        blocks: attr.blocks,
        atime: atime.secs(),
        mtime: mtime.secs(),
        ctime: ctime.secs(),
        atimensec: atime.nanos(),
        mtimensec: mtime.nanos(),
        ctimensec: ctime.nanos(),
        mode: mode_from_file_type(attr.kind) | u32::from(attr.perm),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        padding: 0,
    }
}
