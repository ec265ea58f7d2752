//! `fuser::Filesystem` adapter over an [`ArchiveCatalog`].
//!
//! FUSE callbacks are synchronous; the catalog is async. Metadata calls are
//! answered inline by blocking on the runtime. Reads are spawned onto the
//! runtime and reply from the task, so slow blob fetches never hold up the
//! request loop, unless the mount runs single-threaded.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::catalog::{ArchiveCatalog, EntryKind, ListEntry, NodeAttr, ROOT_INO};
use crate::error::{self, XzipError};

const BLOCK_SIZE: u32 = 4096;
const MAX_NAME_LEN: u32 = 255;

/// Open flags that would modify the file.
const WRITE_FLAGS: i32 = libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_TRUNC;

pub struct XzipFs {
    catalog: Arc<ArchiveCatalog>,
    runtime: Handle,
    single_threaded: bool,
    ttl: Duration,
}

impl XzipFs {
    pub fn new(
        catalog: Arc<ArchiveCatalog>,
        runtime: Handle,
        single_threaded: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            runtime,
            single_threaded,
            ttl,
        }
    }

    pub fn catalog(&self) -> &Arc<ArchiveCatalog> {
        &self.catalog
    }
}

fn to_fuser_attr(attr: &NodeAttr) -> FileAttr {
    let (kind, nlink) = match attr.kind {
        EntryKind::Directory => (FileType::Directory, 2),
        EntryKind::File => (FileType::RegularFile, 1),
    };
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind,
        perm: attr.perm,
        nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn check_open_flags(flags: i32) -> error::Result<()> {
    if flags & WRITE_FLAGS != 0 {
        return Err(XzipError::ReadOnly);
    }
    Ok(())
}

fn check_access_mask(mask: i32) -> error::Result<()> {
    if mask & libc::W_OK != 0 {
        return Err(XzipError::ReadOnly);
    }
    Ok(())
}

/// One `readdir` reply entry; `next` is the offset the kernel passes back
/// to continue after it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirEntry {
    ino: u64,
    next: i64,
    kind: FileType,
    name: String,
}

/// Root listing with `.` and `..` first, starting at `offset`.
fn directory_page(archives: Vec<ListEntry>, offset: usize) -> Vec<DirEntry> {
    let dots = [".", ".."]
        .into_iter()
        .map(|name| (ROOT_INO, FileType::Directory, name.to_string()));
    let files = archives
        .into_iter()
        .map(|entry| (entry.ino, FileType::RegularFile, entry.name));

    dots.chain(files)
        .enumerate()
        .skip(offset)
        .map(|(i, (ino, kind, name))| DirEntry {
            ino,
            next: (i + 1) as i64,
            kind,
            name,
        })
        .collect()
}

impl Filesystem for XzipFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            "serving archives from {} (depth {})",
            self.catalog.root().display(),
            self.catalog.depth()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("unmounted");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = name.to_string_lossy();
        debug!("lookup parent={} name={}", parent, name_str);

        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.runtime.block_on(self.catalog.lookup(name)) {
            Ok(attr) => reply.entry(&self.ttl, &to_fuser_attr(&attr), 0),
            Err(e) => {
                debug!("lookup {} failed: {}", name, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr ino={}", ino);

        match self.runtime.block_on(self.catalog.attr(ino)) {
            Ok(attr) => reply.attr(&self.ttl, &to_fuser_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open ino={} flags={:#o}", ino, flags);

        if ino == ROOT_INO {
            reply.error(libc::EISDIR);
            return;
        }
        if let Err(e) = check_open_flags(flags) {
            reply.error(e.to_errno());
            return;
        }

        match self.runtime.block_on(self.catalog.open(ino)) {
            // contents never change while mounted
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read ino={} fh={} offset={} size={}", ino, fh, offset, size);

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let catalog = self.catalog.clone();
        let task = async move {
            match catalog.read(ino, offset as u64, size as usize).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    debug!("read ino={} offset={} failed: {}", ino, offset, e);
                    reply.error(e.to_errno());
                }
            }
        };

        if self.single_threaded {
            self.runtime.block_on(task);
        } else {
            self.runtime.spawn(task);
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release fh={}", fh);
        self.catalog.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir ino={}", ino);

        if ino == ROOT_INO {
            reply.opened(0, 0);
        } else {
            reply.error(libc::ENOTDIR);
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);

        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let archives = match self.runtime.block_on(self.catalog.list()) {
            Ok(archives) => archives,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        for entry in directory_page(archives, offset as usize) {
            // true when the reply buffer is full
            if reply.add(entry.ino, entry.next, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!("releasedir");
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs");

        let stats = self.catalog.stats();
        let blocks = stats.total_bytes.div_ceil(BLOCK_SIZE as u64);
        reply.statfs(
            blocks,
            0,
            0,
            stats.archives + 1,
            0,
            BLOCK_SIZE,
            MAX_NAME_LEN,
            BLOCK_SIZE,
        );
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access ino={} mask={}", ino, mask);

        if let Err(e) = check_access_mask(mask) {
            reply.error(e.to_errno());
            return;
        }
        match self.runtime.block_on(self.catalog.attr(ino)) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write ino={} offset={} size={}", ino, offset, data.len());
        reply.error(libc::EROFS);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr ino={} size={:?}", ino, size);
        reply.error(libc::EROFS);
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod parent={} name={}", parent, name.to_string_lossy());
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir parent={} name={}", parent, name.to_string_lossy());
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink parent={} name={}", parent, name.to_string_lossy());
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir parent={} name={}", parent, name.to_string_lossy());
        reply.error(libc::EROFS);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        debug!("symlink parent={} name={}", parent, link_name.to_string_lossy());
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename parent={} name={} newparent={} newname={}",
            parent,
            name.to_string_lossy(),
            newparent,
            newname.to_string_lossy()
        );
        reply.error(libc::EROFS);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!(
            "link ino={} newparent={} newname={}",
            ino,
            newparent,
            newname.to_string_lossy()
        );
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create parent={} name={}", parent, name.to_string_lossy());
        reply.error(libc::EROFS);
    }
}
