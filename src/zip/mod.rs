//! ZIP archive parsing.
//!
//! This module reads the structure of ZIP archives without decompressing
//! them: it only needs to know where every header, payload and directory
//! record starts and ends.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from any [`ReadAt`](crate::io::ReadAt) source
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file, each optionally
//!    followed by a data descriptor
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end, plus an optional comment
//!
//! ## Limitations
//!
//! - No ZIP64 support (archives near 4 GiB or with 65535+ entries are rejected)
//! - No multi-disk archive support

mod parser;
mod structures;

pub use parser::ZipParser;
pub use structures::*;
