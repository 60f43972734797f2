//! Canonical errno-style errors.
//!
//! Every failure that reaches the kernel is expressed as a negated POSIX
//! errno in the reply header. `Errno` wraps the raw value so that the
//! zero "no error" value is unrepresentable, and `FsError` pairs an
//! errno with an optional human-readable message for logging.

use std::fmt;
use std::io;
use std::num::NonZeroI32;

/// A POSIX errno. The wrapped value is always positive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub NonZeroI32);

macro_rules! errno_consts {
    ($($name:ident),+ $(,)?) => {
        impl Errno {
            $(
                #[allow(missing_docs)]
                pub const $name: Errno = Errno(NonZeroI32::new(libc::$name).unwrap());
            )+

            fn name(self) -> Option<&'static str> {
                match self.0.get() {
                    $(x if x == libc::$name => Some(stringify!($name)),)+
                    _ => None,
                }
            }
        }
    };
}

errno_consts!(
    EPERM, ENOENT, ESRCH, EINTR, EIO, ENXIO, E2BIG, ENOEXEC, EBADF, ECHILD, EAGAIN, ENOMEM,
    EACCES, EFAULT, ENOTBLK, EBUSY, EEXIST, EXDEV, ENODEV, ENOTDIR, EISDIR, EINVAL, ENFILE,
    EMFILE, ENOTTY, ETXTBSY, EFBIG, ENOSPC, ESPIPE, EROFS, EMLINK, EPIPE, EDOM, ERANGE, EDEADLK,
    ENAMETOOLONG, ENOLCK, ENOSYS, ENOTEMPTY, ELOOP, ENOMSG, EIDRM, ENODATA, EPROTO, EOVERFLOW,
    EBADMSG, EILSEQ, ENOTSOCK, EDESTADDRREQ, EMSGSIZE, EPROTOTYPE, ENOPROTOOPT, EPROTONOSUPPORT,
    EOPNOTSUPP, EAFNOSUPPORT, EADDRINUSE, EADDRNOTAVAIL, ENETDOWN, ENETUNREACH, ENETRESET,
    ECONNABORTED, ECONNRESET, ENOBUFS, EISCONN, ENOTCONN, ESHUTDOWN, ETIMEDOUT, ECONNREFUSED,
    EHOSTDOWN, EHOSTUNREACH, EALREADY, EINPROGRESS, ESTALE, EDQUOT, ECANCELED, EOWNERDEAD,
    ENOTRECOVERABLE, EREMOTEIO, ENOMEDIUM, EMEDIUMTYPE,
);

impl Errno {
    /// `ENOTSUP` aliases `EOPNOTSUPP` on Linux; exposed under its own
    /// name since handler code tends to spell it this way.
    pub const ENOTSUP: Errno = Errno(NonZeroI32::new(libc::ENOTSUP).unwrap());

    /// The raw positive errno value.
    #[inline]
    pub fn code(self) -> i32 {
        self.0.get()
    }

    /// Converts a raw errno, mapping non-positive values to `EIO`.
    pub fn from_i32(raw: i32) -> Errno {
        match NonZeroI32::new(raw) {
            Some(value) if raw > 0 => Errno(value),
            _ => Errno::EIO,
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Errno({})", self.0.get()),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> i32 {
        errno.code()
    }
}

/// Error type surfaced by handlers and operation wrappers.
///
/// Carries the canonical errno that will be encoded in the kernel reply
/// plus an optional message that only ever reaches the log.
#[derive(Debug, Clone)]
pub struct FsError {
    errno: Errno,
    message: Option<String>,
}

impl FsError {
    /// An error from a bare errno.
    pub fn new(errno: Errno) -> FsError {
        FsError {
            errno,
            message: None,
        }
    }

    /// An error with a message for the log.
    pub fn with_message(errno: Errno, message: impl Into<String>) -> FsError {
        FsError {
            errno,
            message: Some(message.into()),
        }
    }

    /// The canonical errno.
    pub fn errno(&self) -> Errno {
        self.errno
    }

    /// The attached message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.errno, message),
            None => fmt::Display::fmt(&self.errno, f),
        }
    }
}

impl std::error::Error for FsError {}

impl From<Errno> for FsError {
    fn from(errno: Errno) -> FsError {
        FsError::new(errno)
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> FsError {
        match err.raw_os_error() {
            Some(raw) => FsError::new(Errno::from_i32(raw)),
            None => FsError::with_message(Errno::EIO, err.to_string()),
        }
    }
}

/// Result alias used by handlers and operation wrappers.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_positive() {
        assert_eq!(Errno::ENOENT.code(), libc::ENOENT);
        assert!(Errno::ENOENT.code() > 0);
    }

    #[test]
    fn from_i32_rejects_non_positive() {
        assert_eq!(Errno::from_i32(0), Errno::EIO);
        assert_eq!(Errno::from_i32(-5), Errno::EIO);
        assert_eq!(Errno::from_i32(libc::EACCES), Errno::EACCES);
    }

    #[test]
    fn debug_uses_symbol() {
        assert_eq!(format!("{:?}", Errno::EINVAL), "EINVAL");
        assert_eq!(format!("{}", Errno::ECANCELED), "ECANCELED");
    }

    #[test]
    fn io_error_conversion() {
        let err = io::Error::from_raw_os_error(libc::ENOTDIR);
        assert_eq!(FsError::from(err).errno(), Errno::ENOTDIR);

        let err = io::Error::other("no os code");
        let fs = FsError::from(err);
        assert_eq!(fs.errno(), Errno::EIO);
        assert!(fs.message().is_some());
    }

    #[test]
    fn display_includes_message() {
        let err = FsError::with_message(Errno::EIO, "short read");
        assert_eq!(err.to_string(), "EIO: short read");
    }
}
