//! Async FUSE request-dispatch runtime.
//!
//! `fusebridge` bridges the kernel's FUSE protocol to a typed, async
//! handler table. The session reads requests from the FUSE character
//! device, decodes them, validates their inputs, and dispatches each to
//! a handler in its own task under a cancellation signal that observes
//! kernel interrupts, per-invocation timeouts and session shutdown.
//! Handler results are shape-checked before they are encoded back to
//! the kernel, so a misbehaving handler surfaces as `EIO` instead of
//! undefined kernel state.
//!
//! A filesystem is a type implementing [`Handlers`]; any slot left at
//! its default behaves as unimplemented (`ENOSYS`). Mount one with
//! [`mount`] or run it in the background with [`spawn_mount`]:
//!
//! ```no_run
//! use fusebridge::{MountOption, NoopFs};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     fusebridge::mount(NoopFs, "/mnt/example", &[MountOption::AutoUnmount]).await
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

use std::cmp::{max, min};
use std::fmt;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use crate::abort::{AbortHandle, AbortOptions, AbortReason, AbortSignal, race_with_abort};
pub use crate::channel::Transport;
pub use crate::dispatch::{MAX_WRITE_SIZE, SessionOptions};
pub use crate::error::{Errno, FsError, FsResult};
pub use crate::handlers::{
    AttrOut, CreateOut, DirEntry, EntryOut, FileInfo, FileLock, Handlers, IoctlOut, NoopFs,
    RequestContext, SetAttrChanges, StatVfs, TimeOrNow, XattrOut,
};
pub use crate::ll::fuse_abi::InitFlags;
pub use crate::mnt::mount_options::MountOption;
pub use crate::registry::HandleRegistry;
pub use crate::session::{BackgroundSession, Session, SessionHandle};
pub use crate::types::{
    Dev, Fd, Flags, Gid, Ino, MAX_NAME_LEN, Mode, RenameFlags, Timestamp, Uid, Whence,
    validate_name,
};

mod abort;
mod channel;
mod dispatch;
mod error;
mod handlers;
mod ll;
mod mnt;
mod ops;
mod registry;
mod session;
mod types;

/// File types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileType {
    /// Named pipe (`S_IFIFO`)
    NamedPipe,
    /// Character device (`S_IFCHR`)
    CharDevice,
    /// Block device (`S_IFBLK`)
    BlockDevice,
    /// Directory (`S_IFDIR`)
    Directory,
    /// Regular file (`S_IFREG`)
    RegularFile,
    /// Symbolic link (`S_IFLNK`)
    Symlink,
    /// Unix domain socket (`S_IFSOCK`)
    Socket,
}

/// File attributes as reported to the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileAttr {
    /// Inode number.
    pub ino: Ino,
    /// Size in bytes.
    pub size: u64,
    /// Allocated size in 512-byte blocks.
    pub blocks: u64,
    /// Time of last access.
    pub atime: SystemTime,
    /// Time of last modification.
    pub mtime: SystemTime,
    /// Time of last change.
    pub ctime: SystemTime,
    /// Kind of file (directory, file, pipe, etc).
    pub kind: FileType,
    /// Permission bits (the low 12 mode bits).
    pub perm: u16,
    /// Number of hard links.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Device number, for special files.
    pub rdev: u32,
    /// Block size to report in `stat()`. If unsure, use 4096.
    pub blksize: u32,
}

impl FileAttr {
    /// The attributes the default `getattr` fallback reports for the
    /// root inode: an empty 0755 directory owned by the requester.
    pub fn synthetic_root(uid: u32, gid: u32) -> FileAttr {
        FileAttr {
            ino: Ino::ROOT,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid,
            gid,
            rdev: 0,
            blksize: 512,
        }
    }
}

/// Configuration of the fuse kernel module connection, negotiated at
/// INIT. Handlers may adjust it from [`Handlers::init`].
#[derive(Debug)]
pub struct KernelConfig {
    capabilities: InitFlags,
    requested: InitFlags,
    max_readahead: u32,
    max_max_readahead: u32,
    max_background: u16,
    congestion_threshold: Option<u16>,
    max_write: u32,
    time_gran: Duration,
}

impl KernelConfig {
    pub(crate) fn new(capabilities: InitFlags, max_readahead: u32) -> KernelConfig {
        KernelConfig {
            capabilities,
            requested: default_init_flags(capabilities),
            max_readahead,
            max_max_readahead: max_readahead,
            max_background: 16,
            congestion_threshold: None,
            // use a max write size that fits into the session's buffer
            max_write: MAX_WRITE_SIZE as u32,
            // 1ns means nano-second granularity.
            time_gran: Duration::new(0, 1),
        }
    }

    /// Query kernel capabilities.
    pub fn capabilities(&self) -> InitFlags {
        self.capabilities
    }

    /// Add a set of capabilities to request.
    ///
    /// # Errors
    /// When the argument includes capabilities not supported by the
    /// kernel, returns the unsupported bits.
    pub fn add_capabilities(&mut self, capabilities_to_add: InitFlags) -> Result<(), InitFlags> {
        if !self.capabilities.contains(capabilities_to_add) {
            return Err(capabilities_to_add & !self.capabilities);
        }
        self.requested |= capabilities_to_add;
        Ok(())
    }

    /// Set the maximum write size for a single request.
    ///
    /// On success returns the previous value.
    /// # Errors
    /// If the argument is out of range, returns the nearest value which
    /// will succeed.
    pub fn set_max_write(&mut self, value: u32) -> Result<u32, u32> {
        if value == 0 {
            return Err(1);
        }
        if value > MAX_WRITE_SIZE as u32 {
            return Err(MAX_WRITE_SIZE as u32);
        }
        let previous = self.max_write;
        self.max_write = value;
        Ok(previous)
    }

    /// Set the maximum readahead size.
    ///
    /// On success returns the previous value.
    /// # Errors
    /// If the argument is out of range, returns the nearest value which
    /// will succeed.
    pub fn set_max_readahead(&mut self, value: u32) -> Result<u32, u32> {
        if value == 0 {
            return Err(1);
        }
        if value > self.max_max_readahead {
            return Err(self.max_max_readahead);
        }
        let previous = self.max_readahead;
        self.max_readahead = value;
        Ok(previous)
    }

    /// Set the maximum number of pending background requests, such as
    /// readahead.
    ///
    /// On success returns the previous value.
    /// # Errors
    /// If the argument is too small, returns the nearest value which
    /// will succeed.
    pub fn set_max_background(&mut self, value: u16) -> Result<u16, u16> {
        if value == 0 {
            return Err(1);
        }
        let previous = self.max_background;
        self.max_background = value;
        Ok(previous)
    }

    /// Set the threshold of background requests at which the kernel
    /// considers the queue congested.
    ///
    /// On success returns the previous value.
    /// # Errors
    /// If the argument is too small, returns the nearest value which
    /// will succeed.
    pub fn set_congestion_threshold(&mut self, value: u16) -> Result<u16, u16> {
        if value == 0 {
            return Err(1);
        }
        let previous = self.congestion_threshold();
        self.congestion_threshold = Some(value);
        Ok(previous)
    }

    /// Set the timestamp granularity.
    ///
    /// Must be a power of 10 nanoseconds, i.e. 1s, 0.1s, ... 1ns.
    ///
    /// On success returns the previous value.
    /// # Errors
    /// If the argument does not match a valid granularity, returns the
    /// nearest value which will succeed.
    pub fn set_time_granularity(&mut self, value: Duration) -> Result<Duration, Duration> {
        if value.as_nanos() == 0 {
            return Err(Duration::new(0, 1));
        }
        if value.as_secs() > 1 || (value.as_secs() == 1 && value.subsec_nanos() > 0) {
            return Err(Duration::new(1, 0));
        }
        let mut power_of_10 = 1;
        while power_of_10 < value.as_nanos() {
            if value.as_nanos() < power_of_10 * 10 {
                // value is between two powers of ten
                return Err(Duration::new(0, power_of_10 as u32));
            }
            power_of_10 *= 10;
        }
        let previous = self.time_gran;
        self.time_gran = value;
        Ok(previous)
    }

    fn congestion_threshold(&self) -> u16 {
        match self.congestion_threshold {
            // Default to a threshold of 3/4 of the max background threads
            None => (u32::from(self.max_background) * 3 / 4) as u16,
            Some(value) => min(value, self.max_background),
        }
    }

    fn max_pages(&self) -> u16 {
        ((max(self.max_write, self.max_readahead) - 1) / page_size::get() as u32) as u16 + 1
    }

    pub(crate) fn init_out(&self, kernel: InitFlags) -> crate::ll::fuse_abi::fuse_init_out {
        crate::ll::fuse_abi::fuse_init_out {
            major: crate::ll::fuse_abi::FUSE_KERNEL_VERSION,
            minor: crate::ll::fuse_abi::FUSE_KERNEL_MINOR_VERSION,
            max_readahead: self.max_readahead,
            // requested features the kernel also reported as capable
            flags: (kernel & self.requested).bits(),
            max_background: self.max_background,
            congestion_threshold: self.congestion_threshold(),
            max_write: self.max_write,
            time_gran: self.time_gran.as_nanos() as u32,
            max_pages: self.max_pages(),
            map_alignment: 0,
            unused: [0; 8],
        }
    }
}

fn default_init_flags(capabilities: InitFlags) -> InitFlags {
    let mut flags = InitFlags::ASYNC_READ | InitFlags::BIG_WRITES | InitFlags::PARALLEL_DIROPS;
    if capabilities.contains(InitFlags::MAX_PAGES) {
        flags |= InitFlags::MAX_PAGES;
    }
    flags
}

impl<FS: Handlers> fmt::Debug for Session<FS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session {{ mountpoint: {:?} }}", self.mountpoint())
    }
}

/// Mounts the given filesystem and runs it until it is unmounted or
/// the session is closed.
///
/// # Errors
/// Returns an error if the options conflict, if the mount itself
/// fails, and any fatal transport error while the session runs.
pub async fn mount<FS: Handlers, P: AsRef<Path>>(
    fs: FS,
    mountpoint: P,
    options: &[MountOption],
) -> io::Result<()> {
    Session::mount(fs, mountpoint.as_ref(), options, SessionOptions::default())?
        .run()
        .await
}

/// Mounts the given filesystem and runs it in a background task,
/// returning immediately. Dropping the returned handle requests
/// shutdown and unmount.
///
/// # Errors
/// Returns an error if the options conflict or if the mount fails.
pub fn spawn_mount<FS: Handlers, P: AsRef<Path>>(
    fs: FS,
    mountpoint: P,
    options: &[MountOption],
) -> io::Result<BackgroundSession> {
    Ok(Session::mount(fs, mountpoint.as_ref(), options, SessionOptions::default())?.spawn())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_root_is_a_directory() {
        let attr = FileAttr::synthetic_root(1000, 1000);
        assert_eq!(attr.ino, Ino::ROOT);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!((attr.uid, attr.gid), (1000, 1000));
    }

    #[test]
    fn kernel_config_bounds() {
        let mut config = KernelConfig::new(InitFlags::ASYNC_READ, 4096);
        assert_eq!(config.set_max_write(0), Err(1));
        assert_eq!(
            config.set_max_write(u32::MAX),
            Err(MAX_WRITE_SIZE as u32)
        );
        assert_eq!(config.set_max_write(128 * 1024).unwrap(), MAX_WRITE_SIZE as u32);
        assert_eq!(config.set_max_readahead(1 << 20), Err(4096));
        assert_eq!(config.set_max_background(64).unwrap(), 16);
        // 3/4 of max_background while unset.
        assert_eq!(config.congestion_threshold(), 48);
    }

    #[test]
    fn time_granularity_must_be_a_power_of_ten() {
        let mut config = KernelConfig::new(InitFlags::empty(), 4096);
        assert!(config.set_time_granularity(Duration::new(0, 1000)).is_ok());
        assert_eq!(
            config.set_time_granularity(Duration::new(0, 300)),
            Err(Duration::new(0, 100))
        );
        assert_eq!(
            config.set_time_granularity(Duration::new(0, 0)),
            Err(Duration::new(0, 1))
        );
        assert_eq!(
            config.set_time_granularity(Duration::new(2, 0)),
            Err(Duration::new(1, 0))
        );
    }

    #[test]
    fn negotiated_flags_are_an_intersection() {
        let kernel = InitFlags::ASYNC_READ | InitFlags::BIG_WRITES | InitFlags::POSIX_ACL;
        let config = KernelConfig::new(kernel, 4096);
        let out = config.init_out(kernel);
        let flags = InitFlags::from_bits_truncate(out.flags);
        assert!(flags.contains(InitFlags::ASYNC_READ | InitFlags::BIG_WRITES));
        // Not requested by us, even though the kernel offers it.
        assert!(!flags.contains(InitFlags::POSIX_ACL));
        // Offered by us, not by the kernel.
        assert!(!flags.contains(InitFlags::PARALLEL_DIROPS));
    }

    #[test]
    fn add_capabilities_requires_kernel_support() {
        let mut config = KernelConfig::new(InitFlags::ASYNC_READ, 4096);
        assert!(config.add_capabilities(InitFlags::ASYNC_READ).is_ok());
        assert_eq!(
            config.add_capabilities(InitFlags::WRITEBACK_CACHE),
            Err(InitFlags::WRITEBACK_CACHE)
        );
    }
}
