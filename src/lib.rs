//! # xzip
//!
//! Deduplication of zip archives by "exploding" them.
//!
//! Exploding an archive splits it at its own structural boundaries: entry
//! payloads go to a content-addressed store shared by every archive, the
//! remaining archive-specific bytes (headers, central directory) are kept
//! inline in a small per-archive descriptor. A read-only FUSE mount then
//! presents every descriptor as a regular file whose bytes are identical to
//! the original archive, reassembled on demand.
//!
//! ## Layout on disk
//!
//! ```text
//! <root>/data/<hash prefix dirs>/<sha1>   payload blobs
//! <root>/meta/<name>.dir                  size, mode, mtime, store depth
//! <root>/meta/<name>.jump                 offset of every segment
//! <root>/meta/<name>.stream               literal bytes and blob references
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use xzip::{ExplodedArchive, Exploder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let root = Path::new("/srv/xz");
//!     let exploder = Exploder::new(root, 2);
//!     let report = exploder.explode_file(Path::new("app.zip")).await?;
//!     println!("{} bytes deduplicated", report.deduplicated_bytes);
//!
//!     let archive = ExplodedArchive::open(root, "app.zip", 2).await?;
//!     let head = archive.read(0, 4).await?;
//!     assert_eq!(head, b"PK\x03\x04");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod descriptor;
pub mod error;
pub mod explode;
pub mod fs;
pub mod io;
pub mod reconstruct;
pub mod store;
pub mod zip;

pub use cli::Cli;
pub use descriptor::{Descriptor, Segment};
pub use error::{Result, XzipError};
pub use explode::{ExplodeReport, Exploder};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use reconstruct::ExplodedArchive;
pub use store::{BlobHash, ContentStore};
pub use zip::{ZipFileEntry, ZipParser};
