//! Mount surface.
//!
//! [`Mount`] is the RAII guard for a mounted filesystem: creating one
//! mounts via the fusermount helper and yields the device fd the
//! session reads from; dropping it unmounts. External unmounts are
//! tolerated, the drop-path unmount is a no-op then.

pub(crate) mod fusermount;
pub(crate) mod mount_options;

use std::fs::File;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::error;

use mount_options::MountOption;

/// Keeps a mountpoint mounted for as long as it lives.
#[derive(Debug)]
pub(crate) struct Mount {
    mountpoint: PathBuf,
    auto_unmount_socket: Option<UnixStream>,
}

impl Mount {
    pub(crate) fn new(mountpoint: &Path, options: &[MountOption]) -> io::Result<(Arc<File>, Mount)> {
        let mountpoint = mountpoint.canonicalize()?;
        let (device, socket) = fusermount::mount(&mountpoint, options)?;
        Ok((
            Arc::new(device),
            Mount {
                mountpoint,
                auto_unmount_socket: socket,
            },
        ))
    }

    /// The canonicalized path this guard keeps mounted.
    pub(crate) fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Some(socket) = self.auto_unmount_socket.take() {
            // fusermount is waiting on this socket and unmounts when it
            // closes.
            drop(socket);
            return;
        }
        if let Err(err) = fusermount::unmount(&self.mountpoint) {
            error!("failed to unmount {}: {}", self.mountpoint.display(), err);
        }
    }
}
