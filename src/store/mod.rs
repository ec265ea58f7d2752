//! Content-addressed blob storage.
//!
//! Blobs live under `<root>/data`, named by the lowercase hex SHA-1 of their
//! content. With a sharding depth of *k*, the first *k* hex characters each
//! become one directory level:
//!
//! ```text
//! <root>/data/a/b/ab12...      depth 2
//! <root>/data/ab12...          depth 0
//! ```
//!
//! The depth is not recorded in the store itself; writer and reader must
//! agree on it. Blobs are written once through a temporary file and a
//! rename, so readers never observe a partially written blob, and two
//! writers racing on identical content both leave the same bytes behind.

mod hash;

pub use hash::BlobHash;

use sha1::{Digest, Sha1};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::{Result, XzipError};
use crate::io::{LocalFileReader, ReadAt};

/// Chunk size used when streaming payloads through the hasher
const COPY_CHUNK: usize = 1024 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<pid>-<n>`, distinct for every call within and across processes.
pub(crate) fn temp_suffix() -> String {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", std::process::id(), n)
}

/// Result of a [`ContentStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub hash: BlobHash,
    pub len: u64,
    /// False when a blob with this hash was already present
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    data_dir: PathBuf,
    depth: u8,
}

impl ContentStore {
    /// Deepest useful sharding: one level per hex character of a SHA-1.
    pub const MAX_DEPTH: u8 = 40;

    /// Open the store rooted at `<root>/data`. Depths beyond
    /// [`MAX_DEPTH`](Self::MAX_DEPTH) are clamped.
    pub fn new(root: &Path, depth: u8) -> Self {
        Self {
            data_dir: root.join("data"),
            depth: depth.min(Self::MAX_DEPTH),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn blob_path(&self, hash: &BlobHash) -> PathBuf {
        let hex = hash.to_hex();
        let mut path = self.data_dir.clone();
        for c in hex[..self.depth as usize].chars() {
            path.push(c.to_string());
        }
        path.push(hex);
        path
    }

    pub async fn contains(&self, hash: &BlobHash) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(hash)).await?)
    }

    /// Store a byte slice.
    pub async fn put(&self, data: &[u8]) -> Result<PutOutcome> {
        let hash = BlobHash::of(data);
        let len = data.len() as u64;
        if self.contains(&hash).await? {
            trace!("blob {} already present", hash);
            return Ok(PutOutcome {
                hash,
                len,
                written: false,
            });
        }

        let tmp = self.temp_path();
        fs::create_dir_all(&self.data_dir).await?;
        let mut file = fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.commit(tmp, &hash).await?;
        Ok(PutOutcome {
            hash,
            len,
            written: true,
        })
    }

    /// Store `len` bytes of `reader` starting at `offset` without holding
    /// them in memory.
    ///
    /// The range is hashed first; only when the blob is absent is it read a
    /// second time and copied into the store. The copy is re-hashed and must
    /// match, so a source that changes underneath us fails instead of
    /// storing a blob under the wrong name.
    pub async fn put_range<R: ReadAt + ?Sized>(
        &self,
        reader: &R,
        offset: u64,
        len: u64,
    ) -> Result<PutOutcome> {
        let mut buf = vec![0u8; COPY_CHUNK.min(len as usize)];

        let mut hasher = Sha1::new();
        let mut pos = 0u64;
        while pos < len {
            let n = (len - pos).min(buf.len() as u64) as usize;
            reader.read_exact_at(offset + pos, &mut buf[..n]).await?;
            hasher.update(&buf[..n]);
            pos += n as u64;
        }
        let hash = BlobHash::from_hasher(hasher);

        if self.contains(&hash).await? {
            trace!("blob {} already present", hash);
            return Ok(PutOutcome {
                hash,
                len,
                written: false,
            });
        }

        fs::create_dir_all(&self.data_dir).await?;
        let tmp = self.temp_path();
        let copied = self.copy_range(reader, offset, len, &mut buf, &tmp).await;
        match copied {
            Ok(copy_hash) if copy_hash == hash => {}
            Ok(copy_hash) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(std::io::Error::other(format!(
                    "source changed while storing blob: hashed {}, copied {}",
                    hash, copy_hash
                ))
                .into());
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        }

        self.commit(tmp, &hash).await?;
        Ok(PutOutcome {
            hash,
            len,
            written: true,
        })
    }

    async fn copy_range<R: ReadAt + ?Sized>(
        &self,
        reader: &R,
        offset: u64,
        len: u64,
        buf: &mut [u8],
        tmp: &Path,
    ) -> Result<BlobHash> {
        let mut file = fs::File::create(tmp).await?;
        let mut hasher = Sha1::new();
        let mut pos = 0u64;
        while pos < len {
            let n = (len - pos).min(buf.len() as u64) as usize;
            reader.read_exact_at(offset + pos, &mut buf[..n]).await?;
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            pos += n as u64;
        }
        file.sync_all().await?;
        Ok(BlobHash::from_hasher(hasher))
    }

    /// Move a fully written temporary file to its final name.
    async fn commit(&self, tmp: PathBuf, hash: &BlobHash) -> Result<()> {
        let path = self.blob_path(hash);
        let result = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("stored blob {}", path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.data_dir.join(format!(".tmp-{}", temp_suffix()))
    }

    /// Open a blob for random access reads.
    pub fn open(&self, hash: &BlobHash) -> Result<LocalFileReader> {
        LocalFileReader::new(&self.blob_path(hash)).map_err(|e| match e {
            XzipError::Io(io) if io.kind() == ErrorKind::NotFound => XzipError::BlobNotFound {
                hash: hash.to_hex(),
            },
            other => other,
        })
    }

    /// Read a whole blob.
    pub async fn get(&self, hash: &BlobHash) -> Result<Vec<u8>> {
        match fs::read(self.blob_path(hash)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(XzipError::BlobNotFound {
                hash: hash.to_hex(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Fill `buf` from the blob starting at `offset`.
    ///
    /// The open and read run on the blocking pool so slow storage never
    /// stalls runtime workers.
    pub async fn read_range(&self, hash: &BlobHash, offset: u64, buf: &mut [u8]) -> Result<()> {
        let store = self.clone();
        let hash = *hash;
        let len = buf.len();
        let data = tokio::task::spawn_blocking(move || store.read_range_blocking(&hash, offset, len))
            .await
            .map_err(std::io::Error::other)??;
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn read_range_blocking(&self, hash: &BlobHash, offset: u64, len: usize) -> Result<Vec<u8>> {
        let blob = self.open(hash)?;
        let mut data = vec![0u8; len];
        let n = blob.pread(offset, &mut data)?;
        if n < len {
            return Err(XzipError::format(
                blob.path().display().to_string(),
                format!(
                    "blob is {} bytes, read of {} bytes at {} requested",
                    blob.size(),
                    len,
                    offset
                ),
            ));
        }
        trace!("read {} bytes of blob {} at {}", len, hash, offset);
        Ok(data)
    }

    /// Re-hash a stored blob and check it still matches its name.
    pub async fn verify(&self, hash: &BlobHash) -> Result<bool> {
        let data = self.get(hash).await?;
        Ok(BlobHash::of(&data) == *hash)
    }
}
