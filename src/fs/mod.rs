//! Read-only FUSE view of exploded archives.
//!
//! The mount root is a flat directory with one regular file per descriptor
//! under `<root>/meta`. Reading a file reassembles the original archive on
//! demand through [`ExplodedArchive`](crate::reconstruct::ExplodedArchive).
//!
//! - [`catalog`]: archive discovery, inode numbers, descriptor cache
//! - [`filesystem`]: the `fuser::Filesystem` implementation
//! - [`mount`]: mount configuration and option parsing

pub mod catalog;
pub mod filesystem;
pub mod mount;

pub use catalog::{ArchiveCatalog, CatalogStats, ROOT_INO};
pub use filesystem::XzipFs;
pub use mount::{apply_mount_options, mount, MountConfig, MountError};
