//! The set of exploded archives visible under a mount.
//!
//! Archives are discovered from `<root>/meta/*.dir` on every listing and
//! loaded lazily on first access. A load result is cached per archive:
//! successful loads stay until released by [`ArchiveCatalog::release_unused`],
//! failures stay until the process exits, so a broken archive costs one
//! load attempt and never affects its neighbours.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::descriptor::{DescriptorPaths, DIR_SUFFIX};
use crate::error::{Result, XzipError};
use crate::reconstruct::ExplodedArchive;

/// Inode of the mount root.
pub const ROOT_INO: u64 = 1;

/// Permission bits shown for the mount root.
const ROOT_PERM: u16 = 0o555;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Attributes of one node, independent of the FUSE wire types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

/// One name in the mount root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub ino: u64,
    pub name: String,
}

/// Totals over the archives currently loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub archives: u64,
    pub loaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
struct LoadedArchive {
    archive: Arc<ExplodedArchive>,
    uid: u32,
    gid: u32,
}

#[derive(Debug, Clone)]
enum CacheSlot {
    Loaded(LoadedArchive),
    Broken(String),
}

#[derive(Debug)]
struct ArchiveRecord {
    name: String,
    slot: Option<CacheSlot>,
    open_handles: u32,
}

#[derive(Debug)]
struct CatalogState {
    inodes: HashMap<String, u64>,
    records: HashMap<u64, ArchiveRecord>,
    handles: HashMap<u64, u64>,
    next_ino: u64,
    next_fh: u64,
}

pub struct ArchiveCatalog {
    root: PathBuf,
    meta_dir: PathBuf,
    depth: u8,
    root_mtime: SystemTime,
    root_owner: (u32, u32),
    state: Mutex<CatalogState>,
}

impl ArchiveCatalog {
    /// Catalog over the exploded archives under `root`, whose blobs were
    /// written with sharding `depth`.
    pub fn new(root: &Path, depth: u8) -> Self {
        // SAFETY: getuid and getgid cannot fail and touch no memory
        let root_owner = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            root: root.to_path_buf(),
            meta_dir: root.join("meta"),
            depth,
            root_mtime: SystemTime::now(),
            root_owner,
            state: Mutex::new(CatalogState {
                inodes: HashMap::new(),
                records: HashMap::new(),
                handles: HashMap::new(),
                next_ino: ROOT_INO + 1,
                next_fh: 1,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn inode_for(&self, name: &str) -> u64 {
        let mut state = self.state();
        if let Some(ino) = state.inodes.get(name) {
            return *ino;
        }
        let ino = state.next_ino;
        state.next_ino += 1;
        state.inodes.insert(name.to_string(), ino);
        state.records.insert(
            ino,
            ArchiveRecord {
                name: name.to_string(),
                slot: None,
                open_handles: 0,
            },
        );
        ino
    }

    /// Names of all archives with a `.dir` file, sorted.
    ///
    /// Only the directory listing is consulted, so a corrupt descriptor
    /// still shows up here and fails later on access.
    pub async fn list(&self) -> Result<Vec<ListEntry>> {
        let mut dir = match fs::read_dir(&self.meta_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("metadata directory {} does not exist", self.meta_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                debug!("skipping non UTF-8 name {:?}", entry.file_name());
                continue;
            };
            if let Some(name) = file_name.strip_suffix(DIR_SUFFIX) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| ListEntry {
                ino: self.inode_for(&name),
                name,
            })
            .collect())
    }

    /// Resolve a name in the mount root to its attributes.
    pub async fn lookup(&self, name: &str) -> Result<NodeAttr> {
        if name.is_empty() || name.contains('/') {
            return Err(XzipError::ArchiveNotFound {
                name: name.to_string(),
            });
        }
        let paths = DescriptorPaths::new(&self.meta_dir, name);
        match fs::metadata(&paths.dir).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(XzipError::ArchiveNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(XzipError::ArchiveNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        let ino = self.inode_for(name);
        self.attr(ino).await
    }

    /// Attributes of `ino`, loading the archive's descriptor if needed.
    pub async fn attr(&self, ino: u64) -> Result<NodeAttr> {
        if ino == ROOT_INO {
            return Ok(NodeAttr {
                ino,
                kind: EntryKind::Directory,
                size: 0,
                perm: ROOT_PERM,
                mtime: self.root_mtime,
                uid: self.root_owner.0,
                gid: self.root_owner.1,
            });
        }

        let loaded = self.loaded(ino).await?;
        let meta = loaded.archive.descriptor().meta();
        Ok(NodeAttr {
            ino,
            kind: EntryKind::File,
            size: meta.total_len,
            perm: (meta.mode & 0o555) as u16,
            mtime: meta.mtime(),
            uid: loaded.uid,
            gid: loaded.gid,
        })
    }

    /// The loaded archive behind `ino`.
    pub async fn archive(&self, ino: u64) -> Result<Arc<ExplodedArchive>> {
        Ok(self.loaded(ino).await?.archive)
    }

    async fn loaded(&self, ino: u64) -> Result<LoadedArchive> {
        let name = {
            let state = self.state();
            let record = state
                .records
                .get(&ino)
                .ok_or_else(|| XzipError::ArchiveNotFound {
                    name: format!("inode {}", ino),
                })?;
            match &record.slot {
                Some(CacheSlot::Loaded(loaded)) => return Ok(loaded.clone()),
                Some(CacheSlot::Broken(reason)) => {
                    return Err(XzipError::Unreadable {
                        name: record.name.clone(),
                        reason: reason.clone(),
                    });
                }
                None => record.name.clone(),
            }
        };

        // concurrent first accesses may both load; the first result stored wins
        let result = self.load(&name).await;
        let gone = match &result {
            Err(e) if is_missing(e) => {
                fs::metadata(DescriptorPaths::new(&self.meta_dir, &name).dir)
                    .await
                    .is_err()
            }
            _ => false,
        };

        let mut state = self.state();
        let Some(record) = state.records.get_mut(&ino) else {
            return Err(XzipError::ArchiveNotFound { name });
        };
        if let Some(slot) = &record.slot {
            return match slot {
                CacheSlot::Loaded(loaded) => Ok(loaded.clone()),
                CacheSlot::Broken(reason) => Err(XzipError::Unreadable {
                    name,
                    reason: reason.clone(),
                }),
            };
        }

        match result {
            Ok(loaded) => {
                info!(
                    "loaded {}: {} bytes in {} segments",
                    name,
                    loaded.archive.len(),
                    loaded.archive.descriptor().segments().len()
                );
                record.slot = Some(CacheSlot::Loaded(loaded.clone()));
                Ok(loaded)
            }
            // removed since it was listed
            Err(_) if gone => Err(XzipError::ArchiveNotFound { name }),
            Err(e) => {
                warn!("archive {} is unreadable: {}", name, e);
                let reason = e.to_string();
                record.slot = Some(CacheSlot::Broken(reason.clone()));
                Err(XzipError::Unreadable { name, reason })
            }
        }
    }

    async fn load(&self, name: &str) -> Result<LoadedArchive> {
        let archive = ExplodedArchive::open(&self.root, name, self.depth).await?;
        let owner = fs::metadata(DescriptorPaths::new(&self.meta_dir, name).dir).await?;
        let (uid, gid) = owner_of(&owner);
        Ok(LoadedArchive {
            archive: Arc::new(archive),
            uid,
            gid,
        })
    }

    /// Register an open file handle on `ino`.
    pub async fn open(&self, ino: u64) -> Result<u64> {
        self.loaded(ino).await?;
        let mut state = self.state();
        let fh = state.next_fh;
        state.next_fh += 1;
        state.handles.insert(fh, ino);
        if let Some(record) = state.records.get_mut(&ino) {
            record.open_handles += 1;
        }
        Ok(fh)
    }

    /// Drop a handle returned by [`open`](Self::open). Unknown handles are ignored.
    pub fn release(&self, fh: u64) {
        let mut state = self.state();
        if let Some(ino) = state.handles.remove(&fh) {
            if let Some(record) = state.records.get_mut(&ino) {
                record.open_handles = record.open_handles.saturating_sub(1);
            }
        }
    }

    /// Read up to `size` bytes of `ino` at `offset`.
    pub async fn read(&self, ino: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let archive = self.archive(ino).await?;
        archive.read(offset, size).await
    }

    /// Forget loaded descriptors that no open handle uses. Returns how many
    /// were released. Cached failures are kept.
    pub fn release_unused(&self) -> usize {
        let mut state = self.state();
        let mut released = 0;
        for record in state.records.values_mut() {
            if record.open_handles == 0 && matches!(record.slot, Some(CacheSlot::Loaded(_))) {
                record.slot = None;
                released += 1;
            }
        }
        released
    }

    pub fn stats(&self) -> CatalogStats {
        let state = self.state();
        let mut stats = CatalogStats {
            archives: state.records.len() as u64,
            ..CatalogStats::default()
        };
        for record in state.records.values() {
            if let Some(CacheSlot::Loaded(loaded)) = &record.slot {
                stats.loaded += 1;
                stats.total_bytes += loaded.archive.len();
            }
        }
        stats
    }
}

fn is_missing(e: &XzipError) -> bool {
    matches!(e, XzipError::Io(io) if io.kind() == ErrorKind::NotFound)
}

#[cfg(unix)]
fn owner_of(meta: &std::fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn owner_of(_meta: &std::fs::Metadata) -> (u32, u32) {
    (0, 0)
}
