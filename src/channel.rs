//! Kernel transport adapter.
//!
//! The dispatcher consumes the [`Transport`] contract; the concrete
//! implementation for the platform's FUSE character device is
//! [`DevFuse`]. Reads are nonblocking through the tokio reactor with a
//! periodic poke, because some unmount paths never mark the device
//! readable. Writes go through `writev` under the channel's own lock so
//! concurrent reply tasks serialize their frames.

use std::fs::File;
use std::io::{self, IoSlice};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use libc::{c_int, c_void, size_t};
use log::error;
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;

/// How the dispatcher talks to the kernel. `read_request` is the only
/// blocking point; writers serialize internally.
///
/// The in-tree implementation is the FUSE character device; the trait
/// is public so sessions can be driven over custom transports, e.g. an
/// in-memory loopback in tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Blocks until one request frame is available, filling `buf`.
    /// `Ok(None)` means the transport is closed (unmount or shutdown).
    async fn read_request(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Writes one reply frame. Must be callable from concurrent tasks.
    fn write_reply(&self, iov: &[IoSlice<'_>]) -> io::Result<()>;

    /// Closes the transport. Idempotent.
    fn close(&self);
}

/// The `/dev/fuse` device as a [`Transport`].
#[derive(Debug)]
pub(crate) struct DevFuse {
    fd: AsyncFd<DeviceFd>,
    // writev itself is atomic on the device, but the lock keeps frames
    // from interleaving if that ever changes and orders close() against
    // in-flight writes.
    write_lock: Mutex<()>,
}

#[derive(Debug)]
struct DeviceFd {
    file: Arc<File>,
    closed: AtomicBool,
}

impl AsRawFd for DeviceFd {
    fn as_raw_fd(&self) -> c_int {
        self.file.as_raw_fd()
    }
}

impl DevFuse {
    /// Wraps the device file in nonblocking mode.
    pub(crate) fn new(file: Arc<File>) -> io::Result<DevFuse> {
        let fd = file.as_raw_fd();
        let code = unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) };
        if code == -1 {
            error!("failed to set O_NONBLOCK on the fuse device");
            return Err(io::Error::last_os_error());
        }
        Ok(DevFuse {
            fd: AsyncFd::new(DeviceFd {
                file,
                closed: AtomicBool::new(false),
            })?,
            write_lock: Mutex::new(()),
        })
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.fd.get_ref().closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let rc = unsafe {
            libc::read(
                self.fd.get_ref().as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as size_t,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else if rc == 0 {
            // EOF from the device means the filesystem was unmounted.
            Ok(None)
        } else {
            Ok(Some(rc as usize))
        }
    }
}

#[async_trait]
impl Transport for DevFuse {
    async fn read_request(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            if self.fd.get_ref().closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            // Some unmount paths never signal readable, so poke the
            // device directly after a quiet second.
            match tokio::time::timeout(Duration::from_secs(1), self.fd.readable()).await {
                Ok(guard) => {
                    let mut guard = guard?;
                    match guard.try_io(|_| self.try_read(buf)) {
                        Ok(result) => return result,
                        Err(_would_block) => continue,
                    }
                }
                Err(_elapsed) => match self.try_read(buf) {
                    Ok(result) => return Ok(result),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(err) => return Err(err),
                },
            }
        }
    }

    fn write_reply(&self, iov: &[IoSlice<'_>]) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        if self.fd.get_ref().closed.load(Ordering::Acquire) {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        let rc = unsafe {
            libc::writev(
                self.fd.get_ref().as_raw_fd(),
                iov.as_ptr() as *const libc::iovec,
                iov.len() as c_int,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        // The fd itself is closed when the mount guard drops the file;
        // flagging here stops readers and writers first.
        self.fd.get_ref().closed.store(true, Ordering::Release);
    }
}
