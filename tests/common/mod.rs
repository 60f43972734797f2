//! A small in-memory filesystem used as the test fixture: a flat root
//! directory of regular files with POSIX read/write semantics.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::Mutex;

use fusebridge::{
    AttrOut, CreateOut, DirEntry, EntryOut, Errno, Fd, FileAttr, FileInfo, FileType, Flags,
    FsResult, Handlers, Ino, Mode, RequestContext, StatVfs,
};

#[derive(Default)]
struct State {
    next_ino: u64,
    // name -> ino
    names: BTreeMap<String, u64>,
    // ino -> contents
    data: BTreeMap<u64, Vec<u8>>,
    // ino -> permission bits, 0o644 unless chmodded
    perms: BTreeMap<u64, u16>,
}

/// Flat writable in-memory filesystem rooted at inode 1.
pub struct MemFs {
    state: Mutex<State>,
}

impl MemFs {
    pub fn new() -> MemFs {
        MemFs {
            state: Mutex::new(State {
                next_ino: 2,
                ..State::default()
            }),
        }
    }

    pub fn with_file(name: &str, contents: &[u8]) -> MemFs {
        let fs = MemFs::new();
        {
            let mut state = fs.state.lock();
            let ino = state.next_ino;
            state.next_ino += 1;
            state.names.insert(name.to_string(), ino);
            state.data.insert(ino, contents.to_vec());
        }
        fs
    }

    fn file_attr(ino: u64, size: u64) -> FileAttr {
        FileAttr {
            ino: Ino(ino),
            size,
            blocks: size.div_ceil(512),
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
        }
    }

    fn dir_attr() -> FileAttr {
        FileAttr {
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            ..Self::file_attr(1, 0)
        }
    }
}

#[async_trait]
impl Handlers for MemFs {
    async fn lookup(&self, _ctx: &RequestContext, parent: Ino, name: &OsStr) -> FsResult<EntryOut> {
        if !parent.is_root() {
            return Err(Errno::ENOTDIR.into());
        }
        let name = name.to_str().ok_or(Errno::ENOENT)?;
        let state = self.state.lock();
        let ino = *state.names.get(name).ok_or(Errno::ENOENT)?;
        let size = state.data[&ino].len() as u64;
        Ok(EntryOut::new(Self::file_attr(ino, size)))
    }

    async fn getattr(&self, _ctx: &RequestContext, ino: Ino, _fh: Option<Fd>) -> FsResult<AttrOut> {
        if ino.is_root() {
            return Ok(AttrOut::new(Self::dir_attr()));
        }
        let state = self.state.lock();
        let data = state.data.get(&ino.0).ok_or(Errno::ENOENT)?;
        let mut attr = Self::file_attr(ino.0, data.len() as u64);
        if let Some(perm) = state.perms.get(&ino.0) {
            attr.perm = *perm;
        }
        Ok(AttrOut::new(attr))
    }

    async fn chmod(
        &self,
        _ctx: &RequestContext,
        ino: Ino,
        mode: Mode,
        _fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let mut state = self.state.lock();
        let size = state.data.get(&ino.0).ok_or(Errno::ENOENT)?.len() as u64;
        let perm = mode.permissions() as u16;
        state.perms.insert(ino.0, perm);
        let mut attr = Self::file_attr(ino.0, size);
        attr.perm = perm;
        Ok(AttrOut::new(attr))
    }

    async fn truncate(
        &self,
        _ctx: &RequestContext,
        ino: Ino,
        size: u64,
        _fh: Option<Fd>,
    ) -> FsResult<AttrOut> {
        let mut state = self.state.lock();
        let data = state.data.get_mut(&ino.0).ok_or(Errno::ENOENT)?;
        data.resize(size as usize, 0);
        Ok(AttrOut::new(Self::file_attr(ino.0, size)))
    }

    async fn open(&self, _ctx: &RequestContext, ino: Ino, flags: Flags) -> FsResult<FileInfo> {
        let state = self.state.lock();
        if !state.data.contains_key(&ino.0) {
            return Err(Errno::ENOENT.into());
        }
        Ok(FileInfo::new(Fd::NONE, flags))
    }

    async fn create(
        &self,
        _ctx: &RequestContext,
        parent: Ino,
        name: &OsStr,
        _mode: Mode,
        flags: Flags,
    ) -> FsResult<CreateOut> {
        if !parent.is_root() {
            return Err(Errno::ENOTDIR.into());
        }
        let name = name.to_str().ok_or(Errno::EINVAL)?;
        let mut state = self.state.lock();
        if state.names.contains_key(name) {
            return Err(Errno::EEXIST.into());
        }
        let ino = state.next_ino;
        state.next_ino += 1;
        state.names.insert(name.to_string(), ino);
        state.data.insert(ino, Vec::new());
        Ok(CreateOut {
            entry: EntryOut::new(Self::file_attr(ino, 0)),
            fi: FileInfo::new(Fd::NONE, flags),
        })
    }

    async fn read(
        &self,
        _ctx: &RequestContext,
        ino: Ino,
        _fh: Fd,
        offset: u64,
        size: u32,
    ) -> FsResult<Vec<u8>> {
        let state = self.state.lock();
        let data = state.data.get(&ino.0).ok_or(Errno::ENOENT)?;
        let start = (offset as usize).min(data.len());
        let end = (start + size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write(
        &self,
        _ctx: &RequestContext,
        ino: Ino,
        _fh: Fd,
        offset: u64,
        buf: &[u8],
    ) -> FsResult<u32> {
        let mut state = self.state.lock();
        let data = state.data.get_mut(&ino.0).ok_or(Errno::ENOENT)?;
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len() as u32)
    }

    async fn flush(&self, _ctx: &RequestContext, _ino: Ino, _fh: Fd, _owner: u64) -> FsResult<()> {
        Ok(())
    }

    async fn release(&self, _ctx: &RequestContext, _ino: Ino, _fi: &FileInfo) -> FsResult<()> {
        Ok(())
    }

    async fn unlink(&self, _ctx: &RequestContext, parent: Ino, name: &OsStr) -> FsResult<()> {
        if !parent.is_root() {
            return Err(Errno::ENOTDIR.into());
        }
        let name = name.to_str().ok_or(Errno::ENOENT)?;
        let mut state = self.state.lock();
        let ino = state.names.remove(name).ok_or(Errno::ENOENT)?;
        state.data.remove(&ino);
        Ok(())
    }

    async fn opendir(&self, _ctx: &RequestContext, ino: Ino, flags: Flags) -> FsResult<FileInfo> {
        if !ino.is_root() {
            return Err(Errno::ENOTDIR.into());
        }
        Ok(FileInfo::new(Fd::NONE, flags))
    }

    async fn readdir(
        &self,
        _ctx: &RequestContext,
        ino: Ino,
        _fh: Fd,
        offset: u64,
        _size: u32,
    ) -> FsResult<Vec<DirEntry>> {
        if !ino.is_root() {
            return Err(Errno::ENOTDIR.into());
        }
        let state = self.state.lock();
        let mut entries = vec![
            DirEntry {
                ino: Ino::ROOT,
                name: ".".into(),
                kind: FileType::Directory,
                offset: 1,
            },
            DirEntry {
                ino: Ino::ROOT,
                name: "..".into(),
                kind: FileType::Directory,
                offset: 2,
            },
        ];
        for (i, (name, ino)) in state.names.iter().enumerate() {
            entries.push(DirEntry {
                ino: Ino(*ino),
                name: name.into(),
                kind: FileType::RegularFile,
                offset: 3 + i as u64,
            });
        }
        Ok(entries
            .into_iter()
            .filter(|entry| entry.offset > offset)
            .collect())
    }

    async fn releasedir(&self, _ctx: &RequestContext, _ino: Ino, _fi: &FileInfo) -> FsResult<()> {
        Ok(())
    }

    async fn statfs(&self, _ctx: &RequestContext, _ino: Ino) -> FsResult<StatVfs> {
        Ok(StatVfs {
            bsize: 512,
            namelen: 255,
            ..StatVfs::default()
        })
    }
}
