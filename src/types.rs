//! Nominal protocol types and input validators.
//!
//! Inode numbers, file handles, modes and the rest of the id-like
//! quantities each get their own wrapper so they cannot be substituted
//! for one another. Checked constructors take the raw wire-width value
//! and fail with `EINVAL`; once a value is wrapped it is known valid.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Errno, FsError, FsResult};

/// Longest accepted path component, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Longest accepted extended-attribute name, in bytes.
pub const MAX_XATTR_NAME_LEN: usize = 255;

/// Inode number. The reserved value 1 denotes the filesystem root.
///
/// The core never invents inode numbers; uniqueness and stability are
/// the filesystem's responsibility.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ino(pub u64);

impl Ino {
    /// The root inode.
    pub const ROOT: Ino = Ino(1);

    /// Validates a raw node id. Zero is never a valid inode.
    pub fn check(raw: u64) -> FsResult<Ino> {
        if raw == 0 {
            return Err(FsError::with_message(Errno::EINVAL, "inode 0"));
        }
        Ok(Ino(raw))
    }

    /// Whether this is the root inode.
    pub fn is_root(self) -> bool {
        self == Ino::ROOT
    }
}

impl fmt::Debug for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ino({:#x})", self.0)
    }
}

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque file handle. Allocated by the core on open/create/opendir;
/// zero means the handler disclaimed handle state. The default is the
/// "no handle" value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fd(pub u64);

impl Fd {
    /// The "no handle" value.
    pub const NONE: Fd = Fd(0);

    /// Whether this is the "no handle" value.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fd({})", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

macro_rules! checked_u32_wrapper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// Validates a raw value: non-negative and within 32 bits.
            pub fn check(raw: i64) -> FsResult<$name> {
                u32::try_from(raw)
                    .map($name)
                    .map_err(|_| FsError::new(Errno::EINVAL))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

checked_u32_wrapper!(
    /// File mode: low 12 bits are permission bits, upper bits the POSIX
    /// file-type bits.
    Mode
);
checked_u32_wrapper!(
    /// Open flags as passed by the kernel (`O_RDONLY` and friends).
    Flags
);
checked_u32_wrapper!(
    /// User id.
    Uid
);
checked_u32_wrapper!(
    /// Group id.
    Gid
);
checked_u32_wrapper!(
    /// Device number for special files.
    Dev
);

impl Mode {
    /// The permission bits.
    pub fn permissions(self) -> u32 {
        self.0 & 0o7777
    }

    /// The file-type bits.
    pub fn file_type(self) -> u32 {
        self.0 & libc::S_IFMT
    }
}

impl Flags {
    /// The access-mode bits (`O_RDONLY`/`O_WRONLY`/`O_RDWR`).
    pub fn access_mode(self) -> u32 {
        self.0 & libc::O_ACCMODE as u32
    }
}

/// A point in time as the protocol carries it: signed seconds since the
/// epoch plus nanoseconds in `[0, 1e9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Validates the nanosecond field.
    pub fn new(secs: i64, nanos: u32) -> FsResult<Timestamp> {
        if nanos >= 1_000_000_000 {
            return Err(FsError::with_message(
                Errno::EINVAL,
                "nanoseconds out of range",
            ));
        }
        Ok(Timestamp { secs, nanos })
    }

    /// Seconds since the epoch; negative for times before it.
    pub fn secs(self) -> i64 {
        self.secs
    }

    /// Nanosecond part, always below one second.
    pub fn nanos(self) -> u32 {
        self.nanos
    }

    /// Converts from `SystemTime`, saturating outside the `i64` range.
    pub fn from_system_time(time: SystemTime) -> Timestamp {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => match i64::try_from(d.as_secs()) {
                Ok(secs) => Timestamp {
                    secs,
                    nanos: d.subsec_nanos(),
                },
                Err(_) => Timestamp {
                    secs: i64::MAX,
                    nanos: 999_999_999,
                },
            },
            Err(before) => {
                let d = before.duration();
                let (secs, nanos) = (d.as_secs(), d.subsec_nanos());
                if (secs, nanos) >= (i64::MAX as u64 + 1, 0) {
                    Timestamp {
                        secs: i64::MIN,
                        nanos: 0,
                    }
                } else if nanos == 0 {
                    Timestamp {
                        secs: -(secs as i64),
                        nanos: 0,
                    }
                } else {
                    Timestamp {
                        secs: -(secs as i64) - 1,
                        nanos: 1_000_000_000 - nanos,
                    }
                }
            }
        }
    }

    /// Converts back to `SystemTime`.
    pub fn to_system_time(self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else if self.nanos == 0 {
            UNIX_EPOCH - Duration::new(self.secs.unsigned_abs(), 0)
        } else {
            UNIX_EPOCH - Duration::new(self.secs.unsigned_abs() - 1, 1_000_000_000 - self.nanos)
        }
    }
}

bitflags::bitflags! {
    /// Flags accepted on rename.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenameFlags: u32 {
        /// Fail with `EEXIST` instead of replacing the target.
        const NOREPLACE = libc::RENAME_NOREPLACE;
        /// Atomically exchange source and target.
        const EXCHANGE = libc::RENAME_EXCHANGE;
        /// Leave a whiteout behind (overlay filesystems).
        const WHITEOUT = libc::RENAME_WHITEOUT;
    }
}

impl RenameFlags {
    /// Validates raw flag bits; unknown bits fail with `EINVAL`.
    pub fn check(raw: u32) -> FsResult<RenameFlags> {
        RenameFlags::from_bits(raw)
            .ok_or_else(|| FsError::with_message(Errno::EINVAL, "unknown rename flags"))
    }
}

/// Seek origin for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute offset.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to end of file.
    End,
    /// Next region containing data.
    Data,
    /// Next hole.
    Hole,
}

impl Whence {
    /// Validates the raw whence value.
    pub fn check(raw: u32) -> FsResult<Whence> {
        match raw as i32 {
            libc::SEEK_SET => Ok(Whence::Set),
            libc::SEEK_CUR => Ok(Whence::Cur),
            libc::SEEK_END => Ok(Whence::End),
            libc::SEEK_DATA => Ok(Whence::Data),
            libc::SEEK_HOLE => Ok(Whence::Hole),
            _ => Err(FsError::with_message(Errno::EINVAL, "unknown whence")),
        }
    }
}

/// Validates a path component: non-empty, at most [`MAX_NAME_LEN`]
/// bytes, no NUL and no `/`. The protocol is inode-based, so only the
/// component form ever appears.
pub fn validate_name(name: &OsStr) -> FsResult<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(FsError::with_message(Errno::EINVAL, "empty name"));
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(FsError::with_message(Errno::EINVAL, "name too long"));
    }
    if bytes.contains(&0) || bytes.contains(&b'/') {
        return Err(FsError::with_message(Errno::EINVAL, "invalid byte in name"));
    }
    Ok(())
}

/// Validates an extended-attribute name: non-empty, bounded, no NUL.
pub fn validate_xattr_name(name: &OsStr) -> FsResult<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.contains(&0) {
        return Err(FsError::new(Errno::EINVAL));
    }
    if bytes.len() > MAX_XATTR_NAME_LEN {
        return Err(FsError::new(Errno::ERANGE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ino_zero_is_invalid() {
        assert_eq!(Ino::check(0).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(Ino::check(1).unwrap(), Ino::ROOT);
    }

    #[test]
    fn u32_wrappers_reject_out_of_range() {
        assert_eq!(Mode::check(-1).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(Uid::check(1 << 33).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(Gid::check(1000).unwrap(), Gid(1000));
    }

    #[test]
    fn mode_splits_permissions_and_type() {
        let mode = Mode(libc::S_IFREG | 0o644);
        assert_eq!(mode.permissions(), 0o644);
        assert_eq!(mode.file_type(), libc::S_IFREG);
    }

    #[test]
    fn timestamp_rejects_bad_nanos() {
        assert!(Timestamp::new(0, 999_999_999).is_ok());
        assert_eq!(
            Timestamp::new(0, 1_000_000_000).unwrap_err().errno(),
            Errno::EINVAL
        );
    }

    #[test]
    fn timestamp_round_trips_before_epoch() {
        let t = UNIX_EPOCH - Duration::new(1, 200_000_000);
        let ts = Timestamp::from_system_time(t);
        assert_eq!((ts.secs(), ts.nanos()), (-2, 800_000_000));
        assert_eq!(ts.to_system_time(), t);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name(OsStr::new("a.txt")).is_ok());
        assert_eq!(
            validate_name(OsStr::new("")).unwrap_err().errno(),
            Errno::EINVAL
        );
        assert_eq!(
            validate_name(OsStr::new(&"a".repeat(300)))
                .unwrap_err()
                .errno(),
            Errno::EINVAL
        );
        assert_eq!(
            validate_name(OsStr::new("a/b")).unwrap_err().errno(),
            Errno::EINVAL
        );
    }

    #[test]
    fn rename_flags_reject_unknown_bits() {
        assert!(RenameFlags::check(libc::RENAME_NOREPLACE).is_ok());
        assert_eq!(
            RenameFlags::check(0x8000_0000).unwrap_err().errno(),
            Errno::EINVAL
        );
    }

    #[test]
    fn whence_mapping() {
        assert_eq!(Whence::check(libc::SEEK_SET as u32).unwrap(), Whence::Set);
        assert_eq!(Whence::check(libc::SEEK_HOLE as u32).unwrap(), Whence::Hole);
        assert_eq!(Whence::check(99).unwrap_err().errno(), Errno::EINVAL);
    }
}
