//! Mounting through the setuid `fusermount` helper.
//!
//! The helper performs the privileged mount and passes the opened
//! device fd back over a unix socketpair (`_FUSE_COMMFD`, SCM_RIGHTS).
//! With `auto_unmount` the helper stays alive and unmounts when its end
//! of the socket closes. Unmounting tries the direct syscall first and
//! falls back to `fusermount -u`, which is the only path available to
//! unprivileged users on Linux.

use std::env;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, ErrorKind, IoSliceMut, Read};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, error};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};

use super::mount_options::{MountOption, option_to_string};

const FUSERMOUNT_BIN: &str = "fusermount";
const FUSERMOUNT3_BIN: &str = "fusermount3";
const FUSERMOUNT_COMM_ENV: &str = "_FUSE_COMMFD";

pub(crate) fn detect_fusermount_bin() -> String {
    if let Some(path) = env::var_os("FUSERMOUNT_PATH") {
        if let Some(path) = path.to_str() {
            return path.to_owned();
        }
    }
    for name in [
        FUSERMOUNT3_BIN.to_string(),
        FUSERMOUNT_BIN.to_string(),
        format!("/sbin/{FUSERMOUNT3_BIN}"),
        format!("/sbin/{FUSERMOUNT_BIN}"),
        format!("/bin/{FUSERMOUNT3_BIN}"),
        format!("/bin/{FUSERMOUNT_BIN}"),
    ] {
        if Command::new(&name).arg("-h").output().is_ok() {
            return name;
        }
    }
    FUSERMOUNT3_BIN.to_string()
}

/// Spawns the helper, mounts, and receives the device fd. Returns the
/// device and, with `auto_unmount`, the socket keeping the helper
/// alive.
pub(crate) fn mount(
    mountpoint: &Path,
    options: &[MountOption],
) -> io::Result<(File, Option<UnixStream>)> {
    let fusermount_bin = detect_fusermount_bin();
    let (child_socket, receive_socket) = UnixStream::pair()?;

    // The helper inherits its end of the pair across exec.
    unsafe {
        libc::fcntl(child_socket.as_raw_fd(), libc::F_SETFD, 0);
    }

    let mut builder = Command::new(&fusermount_bin);
    builder.stdout(Stdio::piped()).stderr(Stdio::piped());
    let rendered: Vec<String> = options.iter().filter_map(option_to_string).collect();
    if !rendered.is_empty() {
        builder.arg("-o").arg(rendered.join(","));
    }
    builder
        .arg("--")
        .arg(mountpoint.as_os_str())
        .env(FUSERMOUNT_COMM_ENV, child_socket.as_raw_fd().to_string());

    let child = builder.spawn()?;
    drop(child_socket);

    let file = match receive_device_fd(&receive_socket) {
        Ok(file) => file,
        Err(_) => {
            drop(receive_socket);
            let output = child.wait_with_output()?;
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!("fusermount failed: {}", stderr.trim());
            return if stderr.contains("only allowed if 'user_allow_other' is set") {
                Err(io::Error::new(ErrorKind::PermissionDenied, stderr))
            } else {
                Err(io::Error::other(stderr))
            };
        }
    };

    let keep_alive = if options.contains(&MountOption::AutoUnmount) {
        // fusermount keeps running until the socket closes and then
        // unmounts for us. Drain whatever it printed so far without
        // waiting on it.
        let mut child = child;
        if let Some(mut stdout) = child.stdout.take() {
            let fd = stdout.as_raw_fd();
            drain_nonblocking(&mut stdout, fd);
        }
        if let Some(mut stderr) = child.stderr.take() {
            let fd = stderr.as_raw_fd();
            drain_nonblocking(&mut stderr, fd);
        }
        Some(receive_socket)
    } else {
        drop(receive_socket);
        let output = child.wait_with_output()?;
        debug!("fusermount: {}", String::from_utf8_lossy(&output.stderr));
        None
    };

    unsafe {
        libc::fcntl(file.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
    }
    Ok((file, keep_alive))
}

fn receive_device_fd(socket: &UnixStream) -> io::Result<File> {
    let mut byte = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut byte)];
    let mut cmsg_buffer = nix::cmsg_space!(RawFd);

    let fd = loop {
        match recvmsg::<()>(
            socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        ) {
            Ok(message) => {
                if message.bytes == 0 {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "unexpected EOF reading from fusermount",
                    ));
                }
                let mut received = None;
                for cmsg in message.cmsgs()? {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        received = fds.first().copied();
                    }
                }
                match received {
                    Some(fd) if fd >= 0 => break fd,
                    _ => {
                        return Err(io::Error::new(
                            ErrorKind::InvalidData,
                            "no device fd in fusermount message",
                        ));
                    }
                }
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => return Err(err.into()),
        }
    };
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Unmounts a mountpoint: direct syscall when permitted, `fusermount
/// -u` otherwise.
pub(crate) fn unmount(mountpoint: &Path) -> io::Result<()> {
    match nix::mount::umount2(mountpoint, nix::mount::MntFlags::empty()) {
        Ok(()) => return Ok(()),
        // Linux returns EPERM for non-root users; go through the
        // setuid helper.
        Err(nix::errno::Errno::EPERM) => {}
        // Already gone.
        Err(nix::errno::Errno::EINVAL) | Err(nix::errno::Errno::ENOENT) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    let mut builder = Command::new(detect_fusermount_bin());
    builder.stdout(Stdio::piped()).stderr(Stdio::piped());
    builder.arg("-u").arg("-q").arg("--").arg(OsStr::new(
        &mountpoint.to_string_lossy().into_owned(),
    ));
    let output = builder.output()?;
    debug!("fusermount -u: {}", String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(
            output.status.code().unwrap_or(libc::EIO),
        ))
    }
}

// Drains helper output without blocking, for the auto_unmount case
// where the helper stays alive.
fn drain_nonblocking(stream: &mut impl Read, raw_fd: RawFd) {
    unsafe {
        let mut flags = libc::fcntl(raw_fd, libc::F_GETFL, 0);
        flags |= libc::O_NONBLOCK;
        libc::fcntl(raw_fd, libc::F_SETFL, flags);
    }
    let mut buf = vec![0; 64 * 1024];
    if let Ok(len) = stream.read(&mut buf) {
        debug!("fusermount: {}", String::from_utf8_lossy(&buf[..len]));
    }
}
