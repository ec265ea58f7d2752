//! Descriptors: the on-disk representation of one exploded archive.
//!
//! A descriptor is three files under `<root>/meta`, named after the
//! archive's base name:
//!
//! - `<name>.dir`: [`DirectoryMeta`], what the mount shows as file attributes
//! - `<name>.jump`: the [`JumpTable`], offset of every segment
//! - `<name>.stream`: the ordered [`Segment`]s whose concatenation is the archive
//!
//! Descriptors are written once by the explode engine and never modified.

pub mod codec;
mod jump;

pub use jump::{JumpEntry, JumpTable};

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, XzipError};
use crate::store::{temp_suffix, BlobHash};

pub const DIR_SUFFIX: &str = ".dir";
pub const JUMP_SUFFIX: &str = ".jump";
pub const STREAM_SUFFIX: &str = ".stream";

/// A contiguous run of archive bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Archive-specific bytes kept inline
    Literal(Vec<u8>),
    /// Entry payload kept in the content store
    Reference { hash: BlobHash, len: u32 },
}

impl Segment {
    pub fn len(&self) -> u64 {
        match self {
            Segment::Literal(bytes) => bytes.len() as u64,
            Segment::Reference { len, .. } => *len as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filesystem-facing facts about an exploded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMeta {
    /// Base name of the original archive
    pub name: String,
    pub total_len: u64,
    /// `st_mode` of the source archive at explode time
    pub mode: u32,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
    /// Sharding depth of the store the blobs were written to
    pub depth: u8,
    pub entry_count: u16,
    pub segment_count: u32,
}

impl DirectoryMeta {
    pub fn mtime(&self) -> SystemTime {
        let nanos = Duration::from_nanos(self.mtime_nanos as u64);
        if self.mtime_secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.mtime_secs as u64) + nanos
        } else {
            UNIX_EPOCH - Duration::from_secs(self.mtime_secs.unsigned_abs()) + nanos
        }
    }
}

/// Paths of the three files making up one descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorPaths {
    pub dir: PathBuf,
    pub jump: PathBuf,
    pub stream: PathBuf,
}

impl DescriptorPaths {
    pub fn new(meta_dir: &Path, name: &str) -> Self {
        Self {
            dir: meta_dir.join(format!("{}{}", name, DIR_SUFFIX)),
            jump: meta_dir.join(format!("{}{}", name, JUMP_SUFFIX)),
            stream: meta_dir.join(format!("{}{}", name, STREAM_SUFFIX)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    meta: DirectoryMeta,
    jump: JumpTable,
    segments: Vec<Segment>,
}

impl Descriptor {
    /// Assemble a descriptor, deriving length, segment count and jump table
    /// from the segments. Segments must be non-empty.
    pub fn from_segments(mut meta: DirectoryMeta, segments: Vec<Segment>) -> Self {
        let jump = JumpTable::from_lengths(segments.iter().map(Segment::len));
        meta.total_len = jump.total_len();
        meta.segment_count = segments.len() as u32;
        Self {
            meta,
            jump,
            segments,
        }
    }

    pub fn meta(&self) -> &DirectoryMeta {
        &self.meta
    }

    pub fn jump(&self) -> &JumpTable {
        &self.jump
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_len(&self) -> u64 {
        self.meta.total_len
    }

    /// Distinct blobs this descriptor references.
    pub fn referenced_blobs(&self) -> Vec<BlobHash> {
        let mut hashes: Vec<BlobHash> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Reference { hash, .. } => Some(*hash),
                Segment::Literal(_) => None,
            })
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    /// Encode all three files: (dir, jump, stream).
    pub fn encode(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            codec::encode_dir(&self.meta),
            codec::encode_jump(self.jump.entries()),
            codec::encode_stream(&self.segments),
        )
    }

    /// Decode and cross-check the three files of one descriptor.
    pub fn decode(dir: &[u8], jump: &[u8], stream: &[u8], paths: &DescriptorPaths) -> Result<Self> {
        let dir_src = paths.dir.display().to_string();
        let jump_src = paths.jump.display().to_string();
        let stream_src = paths.stream.display().to_string();

        let meta = codec::decode_dir(dir, &dir_src)?;
        let entries = codec::decode_jump(jump, &jump_src)?;
        let segments = codec::decode_stream(stream, &stream_src)?;

        if entries.len() != meta.segment_count as usize {
            return Err(XzipError::format(
                jump_src,
                format!("{} entries, directory expects {}", entries.len(), meta.segment_count),
            ));
        }
        if segments.len() != meta.segment_count as usize {
            return Err(XzipError::format(
                stream_src,
                format!("{} segments, directory expects {}", segments.len(), meta.segment_count),
            ));
        }

        let jump = JumpTable::from_entries(entries, meta.total_len).map_err(|e| match e {
            XzipError::Format { reason, .. } => XzipError::format(jump_src.clone(), reason),
            other => other,
        })?;
        for (i, segment) in segments.iter().enumerate() {
            let range = jump.range(i);
            if range.end - range.start != segment.len() {
                return Err(XzipError::format(
                    stream_src,
                    format!(
                        "segment {} is {} bytes, jump table gives it {}",
                        i,
                        segment.len(),
                        range.end - range.start
                    ),
                ));
            }
        }

        Ok(Self {
            meta,
            jump,
            segments,
        })
    }

    /// Load the descriptor for `name` from `meta_dir`.
    pub async fn load(meta_dir: &Path, name: &str) -> Result<Self> {
        let paths = DescriptorPaths::new(meta_dir, name);
        let dir = fs::read(&paths.dir).await?;
        let jump = fs::read(&paths.jump).await?;
        let stream = fs::read(&paths.stream).await?;
        let descriptor = Self::decode(&dir, &jump, &stream, &paths)?;
        debug!(
            "loaded descriptor {}: {} bytes in {} segments",
            name,
            descriptor.total_len(),
            descriptor.segments.len()
        );
        Ok(descriptor)
    }

    /// Write the three files under `meta_dir`, replacing any previous
    /// descriptor of the same name.
    ///
    /// Each file goes through a temporary sibling and a rename. The `.dir`
    /// file, which makes the archive visible in listings, is renamed last.
    pub async fn write(&self, meta_dir: &Path) -> Result<DescriptorPaths> {
        fs::create_dir_all(meta_dir).await?;
        let paths = DescriptorPaths::new(meta_dir, &self.meta.name);
        let (dir, jump, stream) = self.encode();

        write_atomic(&paths.stream, &stream).await?;
        write_atomic(&paths.jump, &jump).await?;
        write_atomic(&paths.dir, &dir).await?;
        Ok(paths)
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}", temp_suffix()));
    let tmp = PathBuf::from(tmp);

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptor {
        let meta = DirectoryMeta {
            name: "a.zip".to_string(),
            total_len: 0,
            mode: 0o100644,
            mtime_secs: 1_600_000_000,
            mtime_nanos: 0,
            depth: 1,
            entry_count: 1,
            segment_count: 0,
        };
        Descriptor::from_segments(
            meta,
            vec![
                Segment::Literal(vec![1; 40]),
                Segment::Reference {
                    hash: BlobHash::of(b"x"),
                    len: 1,
                },
                Segment::Literal(vec![2; 70]),
            ],
        )
    }

    #[test]
    fn test_from_segments_fills_totals() {
        let d = sample();
        assert_eq!(d.total_len(), 111);
        assert_eq!(d.meta().segment_count, 3);
        assert_eq!(d.jump().range(1), 40..41);
        assert_eq!(d.referenced_blobs(), vec![BlobHash::of(b"x")]);
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let d = sample();
        let paths = d.write(dir.path()).await.unwrap();
        assert!(paths.dir.ends_with("a.zip.dir"));
        assert_eq!(Descriptor::load(dir.path(), "a.zip").await.unwrap(), d);

        // no temporaries left behind
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_truncated_stream_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = sample().write(dir.path()).await.unwrap();
        let mut bytes = std::fs::read(&paths.stream).unwrap();
        bytes.pop();
        std::fs::write(&paths.stream, bytes).unwrap();

        let err = Descriptor::load(dir.path(), "a.zip").await.unwrap_err();
        assert!(matches!(err, XzipError::Format { ref path, .. } if path.ends_with(".stream")));
    }

    #[tokio::test]
    async fn test_mismatched_files_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        let d = sample();
        let paths = d.write(dir.path()).await.unwrap();

        // jump table from a different descriptor
        let other = Descriptor::from_segments(
            d.meta().clone(),
            vec![Segment::Literal(vec![0; 50]), Segment::Literal(vec![0; 50]), Segment::Literal(vec![0; 11])],
        );
        std::fs::write(&paths.jump, codec::encode_jump(other.jump().entries())).unwrap();
        assert!(matches!(
            Descriptor::load(dir.path(), "a.zip").await,
            Err(XzipError::Format { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Descriptor::load(dir.path(), "nope.zip").await,
            Err(XzipError::Io(_))
        ));
    }

    #[test]
    fn test_mtime() {
        let d = sample();
        assert_eq!(
            d.meta().mtime(),
            UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );
    }
}
