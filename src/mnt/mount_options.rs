//! Mount options.
//!
//! See `man mount.fuse` for the semantics; options are rendered into
//! the `-o` string handed to the mount helper.

use std::collections::HashSet;
use std::io;
use std::io::ErrorKind;

/// Options accepted when mounting a filesystem.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub enum MountOption {
    /// Set the name of the source in mtab.
    FsName(String),
    /// Set the filesystem subtype in mtab.
    Subtype(String),
    /// An option not otherwise covered by this enum, passed through
    /// verbatim.
    Custom(String),
    /// Allow all users to access files on this filesystem. By default
    /// access is restricted to the mounting user. Requires
    /// `user_allow_other` in /etc/fuse.conf.
    AllowOther,
    /// Allow the root user to access this filesystem in addition to the
    /// mounting user.
    AllowRoot,
    /// Automatically unmount when the mounting process exits.
    AutoUnmount,
    /// Enable permission checking in the kernel.
    DefaultPermissions,
    /// Cap the size of read requests.
    MaxRead(u32),
    /// Bypass the page cache for every file on this mount.
    DirectIO,
    /// Keep cached file data across opens.
    KernelCache,
    /// Log every request at debug level.
    Debug,
    /// Enable special character and block devices.
    Dev,
    /// Disable special character and block devices.
    NoDev,
    /// Honor set-user-id and set-group-id bits on files.
    Suid,
    /// Don't honor set-user-id and set-group-id bits on files.
    NoSuid,
    /// Read-only filesystem.
    RO,
    /// Read-write filesystem.
    RW,
    /// Allow execution of binaries.
    Exec,
    /// Don't allow execution of binaries.
    NoExec,
    /// Support inode access time.
    Atime,
    /// Don't update inode access time.
    NoAtime,
    /// All modifications to directories will be done synchronously.
    DirSync,
    /// All I/O will be done synchronously.
    Sync,
    /// All I/O will be done asynchronously.
    Async,
}

/// Formats one option for the helper's `-o` list. `Debug` is consumed
/// by the session and renders to nothing.
pub(crate) fn option_to_string(option: &MountOption) -> Option<String> {
    let rendered = match option {
        MountOption::FsName(name) => format!("fsname={name}"),
        MountOption::Subtype(subtype) => format!("subtype={subtype}"),
        MountOption::Custom(value) => value.clone(),
        MountOption::AllowOther => "allow_other".to_string(),
        MountOption::AllowRoot => "allow_root".to_string(),
        MountOption::AutoUnmount => "auto_unmount".to_string(),
        MountOption::DefaultPermissions => "default_permissions".to_string(),
        MountOption::MaxRead(size) => format!("max_read={size}"),
        MountOption::DirectIO => "direct_io".to_string(),
        MountOption::KernelCache => "kernel_cache".to_string(),
        MountOption::Debug => return None,
        MountOption::Dev => "dev".to_string(),
        MountOption::NoDev => "nodev".to_string(),
        MountOption::Suid => "suid".to_string(),
        MountOption::NoSuid => "nosuid".to_string(),
        MountOption::RO => "ro".to_string(),
        MountOption::RW => "rw".to_string(),
        MountOption::Exec => "exec".to_string(),
        MountOption::NoExec => "noexec".to_string(),
        MountOption::Atime => "atime".to_string(),
        MountOption::NoAtime => "noatime".to_string(),
        MountOption::DirSync => "dirsync".to_string(),
        MountOption::Sync => "sync".to_string(),
        MountOption::Async => "async".to_string(),
    };
    Some(rendered)
}

pub(crate) fn check_option_conflicts(options: &[MountOption]) -> io::Result<()> {
    let options_set: HashSet<MountOption> = options.iter().cloned().collect();
    let conflicting: HashSet<MountOption> = options.iter().flat_map(conflicts_with).collect();
    let intersection: Vec<MountOption> = conflicting.intersection(&options_set).cloned().collect();
    if intersection.is_empty() {
        Ok(())
    } else {
        Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("Conflicting mount options found: {intersection:?}"),
        ))
    }
}

fn conflicts_with(option: &MountOption) -> Vec<MountOption> {
    match option {
        MountOption::AllowOther => vec![MountOption::AllowRoot],
        MountOption::AllowRoot => vec![MountOption::AllowOther],
        MountOption::Dev => vec![MountOption::NoDev],
        MountOption::NoDev => vec![MountOption::Dev],
        MountOption::Suid => vec![MountOption::NoSuid],
        MountOption::NoSuid => vec![MountOption::Suid],
        MountOption::RO => vec![MountOption::RW],
        MountOption::RW => vec![MountOption::RO],
        MountOption::Exec => vec![MountOption::NoExec],
        MountOption::NoExec => vec![MountOption::Exec],
        MountOption::Atime => vec![MountOption::NoAtime],
        MountOption::NoAtime => vec![MountOption::Atime],
        MountOption::Sync => vec![MountOption::Async],
        MountOption::Async => vec![MountOption::Sync],
        _ => vec![],
    }
}
