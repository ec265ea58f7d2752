//! Splitting zip archives into descriptors and content-store blobs.
//!
//! An archive is cut at the boundaries its own structure already has:
//!
//! ```text
//! | LFH+name+extra | payload | [data descriptor] | LFH ... | central dir | EOCD+comment |
//!   literal          blob      literal (merged with the next header)       literal
//! ```
//!
//! Entry payloads are the only bytes that stay identical when the same
//! file is packed into a different archive, so they are the only bytes sent
//! to the content store. Everything else, including any gap or prefix the
//! central directory does not account for, is kept inline as a literal.
//! Because the cut points partition `[0, archive size)`, concatenating the
//! segments gives back the input byte for byte.
//!
//! The whole archive is planned before anything is written, so a malformed
//! archive leaves neither blobs nor descriptor files behind.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::descriptor::{Descriptor, DirectoryMeta, Segment};
use crate::error::{Result, XzipError};
use crate::io::{LocalFileReader, ReadAt};
use crate::store::ContentStore;
use crate::zip::ZipParser;

/// A planned cut of the source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(Range<u64>),
    Payload(Range<u64>),
}

impl Piece {
    pub fn range(&self) -> &Range<u64> {
        match self {
            Piece::Literal(r) | Piece::Payload(r) => r,
        }
    }
}

/// Where every byte of an archive goes, decided before any write.
#[derive(Debug, Clone)]
pub struct Plan {
    pub pieces: Vec<Piece>,
    pub entry_count: u16,
    pub size: u64,
}

impl Plan {
    fn push_literal(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        if let Some(Piece::Literal(prev)) = self.pieces.last_mut() {
            if prev.end == range.start {
                prev.end = range.end;
                return;
            }
        }
        self.pieces.push(Piece::Literal(range));
    }
}

/// Work out the segment boundaries of the archive behind `parser`.
pub async fn plan<R: ReadAt>(parser: &ZipParser<R>) -> Result<Plan> {
    let size = parser.size();
    if size > u32::MAX as u64 {
        return Err(XzipError::Zip64Unsupported(format!(
            "archive is {} bytes, larger than 4 GiB",
            size
        )));
    }

    let cd = parser.read_central_directory().await?;
    let mut entries: Vec<_> = cd.entries.iter().collect();
    entries.sort_by_key(|e| e.lfh_offset);

    let mut plan = Plan {
        pieces: Vec::with_capacity(entries.len() * 2 + 1),
        entry_count: cd.entries.len() as u16,
        size,
    };
    let mut cursor = 0u64;

    for entry in entries {
        if entry.lfh_offset < cursor {
            return Err(XzipError::parse(format!(
                "entry {} at offset {} overlaps the previous entry ending at {}",
                entry.file_name, entry.lfh_offset, cursor
            )));
        }

        let lfh = parser.read_local_header(entry).await?;
        let data_start = entry.lfh_offset + lfh.header_len();
        let data_end = data_start + entry.compressed_size;
        if data_end > cd.offset {
            return Err(XzipError::parse(format!(
                "data of {} ends at {}, past the central directory at {}",
                entry.file_name, data_end, cd.offset
            )));
        }

        debug!(
            "entry {}: header {}..{}, payload {} bytes ({:?}){}",
            entry.file_name,
            entry.lfh_offset,
            data_start,
            entry.compressed_size,
            entry.compression_method,
            if entry.has_data_descriptor() {
                ", data descriptor follows"
            } else {
                ""
            }
        );

        plan.push_literal(cursor..data_start);
        if data_end > data_start {
            plan.pieces.push(Piece::Payload(data_start..data_end));
        }
        cursor = data_end;
    }

    // data descriptor of the last entry, central directory, EOCD, comment
    plan.push_literal(cursor..size);
    Ok(plan)
}

/// Presentation attributes of the source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub mode: u32,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            mode: libc::S_IFREG as u32 | 0o644,
            mtime_secs: 0,
            mtime_nanos: 0,
        }
    }
}

impl SourceInfo {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                mode: meta.mode(),
                mtime_secs: meta.mtime(),
                mtime_nanos: meta.mtime_nsec() as u32,
            }
        }

        #[cfg(not(unix))]
        {
            use std::time::UNIX_EPOCH;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .unwrap_or_default();
            Self {
                mtime_secs: mtime.as_secs() as i64,
                mtime_nanos: mtime.subsec_nanos(),
                ..Self::default()
            }
        }
    }
}

/// Outcome of exploding one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplodeReport {
    pub name: String,
    pub total_len: u64,
    pub entries: u16,
    pub segments: usize,
    pub blobs_written: usize,
    pub blobs_reused: usize,
    /// Payload bytes now held in the store
    pub referenced_bytes: u64,
    /// Payload bytes that were already in the store
    pub deduplicated_bytes: u64,
}

pub struct Exploder {
    store: ContentStore,
    meta_dir: PathBuf,
}

impl Exploder {
    /// Exploder writing `<root>/meta` and `<root>/data` with the given sharding depth.
    pub fn new(root: &Path, depth: u8) -> Self {
        Self {
            store: ContentStore::new(root, depth),
            meta_dir: root.join("meta"),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    /// Explode the archive at `path`, naming the descriptor after its base name.
    pub async fn explode_file(&self, path: &Path) -> Result<ExplodeReport> {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| XzipError::parse(format!("{} has no file name", path.display())))?;
        let reader = Arc::new(LocalFileReader::new(path)?);
        let source = SourceInfo::from_metadata(&std::fs::metadata(path)?);

        let (_, report) = self.explode_reader(&name, reader, source).await?;
        Ok(report)
    }

    /// Explode an archive from any random-access source.
    pub async fn explode_reader<R: ReadAt>(
        &self,
        name: &str,
        reader: Arc<R>,
        source: SourceInfo,
    ) -> Result<(Descriptor, ExplodeReport)> {
        let parser = ZipParser::new(reader.clone());
        let plan = plan(&parser).await?;

        let mut report = ExplodeReport {
            name: name.to_string(),
            entries: plan.entry_count,
            ..ExplodeReport::default()
        };

        let mut segments = Vec::with_capacity(plan.pieces.len());
        for piece in &plan.pieces {
            match piece {
                Piece::Literal(range) => {
                    let mut bytes = vec![0u8; (range.end - range.start) as usize];
                    reader.read_exact_at(range.start, &mut bytes).await?;
                    segments.push(Segment::Literal(bytes));
                }
                Piece::Payload(range) => {
                    let len = range.end - range.start;
                    let outcome = self.store.put_range(reader.as_ref(), range.start, len).await?;
                    if outcome.written {
                        report.blobs_written += 1;
                    } else {
                        report.blobs_reused += 1;
                        report.deduplicated_bytes += len;
                    }
                    report.referenced_bytes += len;
                    segments.push(Segment::Reference {
                        hash: outcome.hash,
                        len: len as u32,
                    });
                }
            }
        }

        let meta = DirectoryMeta {
            name: name.to_string(),
            total_len: 0,
            mode: source.mode,
            mtime_secs: source.mtime_secs,
            mtime_nanos: source.mtime_nanos,
            depth: self.store.depth(),
            entry_count: plan.entry_count,
            segment_count: 0,
        };
        let descriptor = Descriptor::from_segments(meta, segments);
        debug_assert_eq!(descriptor.total_len(), plan.size);
        descriptor.write(&self.meta_dir).await?;

        report.total_len = descriptor.total_len();
        report.segments = descriptor.segments().len();
        info!(
            "exploded {}: {} entries, {} segments, {} new blobs, {} bytes deduplicated",
            name, report.entries, report.segments, report.blobs_written, report.deduplicated_bytes
        );
        Ok((descriptor, report))
    }

    /// Explode each archive independently; one failure never stops the rest.
    pub async fn explode_all(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<ExplodeReport>)> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = self.explode_file(path).await;
            if let Err(e) = &result {
                warn!("failed to explode {}: {}", path.display(), e);
            }
            results.push((path.clone(), result));
        }
        results
    }
}
