//! Random-access reads of exploded archives.
//!
//! A read locates its first segment through the jump table, then walks
//! forward copying literal bytes and slices of referenced blobs until the
//! buffer is full or the archive ends. Nothing is cached between reads;
//! every read is a pure function of the descriptor, the store and the range.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::descriptor::{Descriptor, Segment};
use crate::error::{Result, XzipError};
use crate::io::ReadAt;
use crate::store::ContentStore;

/// A loaded descriptor bound to the store holding its blobs.
#[derive(Debug, Clone)]
pub struct ExplodedArchive {
    descriptor: Arc<Descriptor>,
    store: ContentStore,
}

impl ExplodedArchive {
    pub fn new(descriptor: Arc<Descriptor>, store: ContentStore) -> Self {
        Self { descriptor, store }
    }

    /// Load `<root>/meta/<name>.*` and bind it to `<root>/data` at `depth`.
    ///
    /// Fails with [`XzipError::DepthMismatch`] if the archive was exploded
    /// into a store with a different sharding depth.
    pub async fn open(root: &Path, name: &str, depth: u8) -> Result<Self> {
        let descriptor = Descriptor::load(&root.join("meta"), name).await?;
        let store = ContentStore::new(root, depth);
        check_depth(&descriptor, &store)?;
        Ok(Self::new(Arc::new(descriptor), store))
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn len(&self) -> u64 {
        self.descriptor.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`, clipped at the end of the archive.
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let available = self.len().saturating_sub(offset).min(len as u64) as usize;
        let mut buf = vec![0u8; available];
        let n = self.read_into(offset, &mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Fill as much of `buf` as the archive allows, returning the byte count.
    pub async fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let jump = self.descriptor.jump();
        let segments = self.descriptor.segments();

        let Some(mut index) = jump.locate(offset) else {
            return Ok(0);
        };
        let want = (self.len() - offset).min(buf.len() as u64) as usize;
        let mut filled = 0usize;
        let mut pos = offset;

        while filled < want {
            let range = jump.range(index);
            let within = pos - range.start;
            let take = (range.end - pos).min((want - filled) as u64) as usize;
            let dst = &mut buf[filled..filled + take];

            match &segments[index] {
                Segment::Literal(bytes) => {
                    let start = within as usize;
                    dst.copy_from_slice(&bytes[start..start + take]);
                }
                Segment::Reference { hash, .. } => {
                    trace!("segment {}: {} bytes of blob {} at {}", index, take, hash, within);
                    self.store.read_range(hash, within, dst).await?;
                }
            }

            filled += take;
            pos += take as u64;
            index += 1;
        }

        Ok(filled)
    }
}

#[async_trait]
impl ReadAt for ExplodedArchive {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.read_into(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.len()
    }
}

/// Refuse to bind a descriptor to a store sharded differently from the one
/// its blobs were written to.
pub fn check_depth(descriptor: &Descriptor, store: &ContentStore) -> Result<()> {
    let recorded = descriptor.meta().depth;
    if recorded != store.depth() {
        return Err(XzipError::DepthMismatch {
            recorded,
            configured: store.depth(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DirectoryMeta;
    use proptest::prelude::*;

    fn meta(depth: u8) -> DirectoryMeta {
        DirectoryMeta {
            name: "t.zip".to_string(),
            total_len: 0,
            mode: 0o100644,
            mtime_secs: 0,
            mtime_nanos: 0,
            depth,
            entry_count: 2,
            segment_count: 0,
        }
    }

    /// Archive of literal(0..10) ref(10..30) literal(30..33) ref(33..63) literal(63..70),
    /// together with the flat bytes it must read back as.
    async fn fixture(root: &Path) -> (ExplodedArchive, Vec<u8>) {
        let store = ContentStore::new(root, 2);
        let flat: Vec<u8> = (0..70u8).collect();

        let first = store.put(&flat[10..30]).await.unwrap();
        let second = store.put(&flat[33..63]).await.unwrap();
        let segments = vec![
            Segment::Literal(flat[0..10].to_vec()),
            Segment::Reference {
                hash: first.hash,
                len: 20,
            },
            Segment::Literal(flat[30..33].to_vec()),
            Segment::Reference {
                hash: second.hash,
                len: 30,
            },
            Segment::Literal(flat[63..70].to_vec()),
        ];
        let descriptor = Descriptor::from_segments(meta(2), segments);
        (ExplodedArchive::new(Arc::new(descriptor), store), flat)
    }

    #[tokio::test]
    async fn test_full_read() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, flat) = fixture(dir.path()).await;
        assert_eq!(archive.read(0, 70).await.unwrap(), flat);
    }

    #[tokio::test]
    async fn test_read_spanning_segments() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, flat) = fixture(dir.path()).await;
        assert_eq!(archive.read(8, 30).await.unwrap(), &flat[8..38]);
        assert_eq!(archive.read(30, 3).await.unwrap(), &flat[30..33]);
    }

    #[tokio::test]
    async fn test_read_clipped_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, flat) = fixture(dir.path()).await;
        assert_eq!(archive.read(60, 100).await.unwrap(), &flat[60..]);
        assert!(archive.read(70, 10).await.unwrap().is_empty());
        assert!(archive.read(1000, 10).await.unwrap().is_empty());
        assert!(archive.read(5, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_blob_fails_read() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, flat) = fixture(dir.path()).await;
        let hash = archive.descriptor().referenced_blobs()[0];
        std::fs::remove_file(archive.store().blob_path(&hash)).unwrap();

        // literal-only ranges still read
        assert_eq!(archive.read(0, 10).await.unwrap(), &flat[0..10]);
        let err = archive.read(0, 70).await.unwrap_err();
        assert!(matches!(err, XzipError::BlobNotFound { .. }));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[tokio::test]
    async fn test_open_checks_depth() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, flat) = fixture(dir.path()).await;
        archive
            .descriptor()
            .write(&dir.path().join("meta"))
            .await
            .unwrap();

        let reopened = ExplodedArchive::open(dir.path(), "t.zip", 2).await.unwrap();
        assert_eq!(reopened.read(0, 70).await.unwrap(), flat);

        let err = ExplodedArchive::open(dir.path(), "t.zip", 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            XzipError::DepthMismatch {
                recorded: 2,
                configured: 0
            }
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_partial_read_matches_flat_bytes(offset in 0u64..90, len in 0usize..90) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let dir = tempfile::tempdir().unwrap();
            let (archive, flat) = rt.block_on(fixture(dir.path()));

            let got = rt.block_on(archive.read(offset, len)).unwrap();
            let start = (offset as usize).min(flat.len());
            let end = (start + len).min(flat.len());
            prop_assert_eq!(got, flat[start..end].to_vec());

            let mut buf = vec![0u8; len];
            let n = rt.block_on(archive.read_at(offset, &mut buf)).unwrap();
            prop_assert_eq!(&buf[..n], &flat[start..end]);
        }
    }
}
