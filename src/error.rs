use thiserror::Error;

#[derive(Debug, Error)]
pub enum XzipError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed archive: {0}")]
    Parse(String),

    #[error("ZIP64 archives are not supported: {0}")]
    Zip64Unsupported(String),

    #[error("Corrupt descriptor file {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("Blob not found in content store: {hash}")]
    BlobNotFound { hash: String },

    #[error("Archive not found: {name}")]
    ArchiveNotFound { name: String },

    #[error("Archive {name} is unreadable: {reason}")]
    Unreadable { name: String, reason: String },

    #[error("Sharding depth mismatch: exploded with depth {recorded}, mounted with depth {configured}")]
    DepthMismatch { recorded: u8, configured: u8 },

    #[error("Read-only file system")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, XzipError>;

impl XzipError {
    pub fn parse(msg: impl Into<String>) -> Self {
        XzipError::Parse(msg.into())
    }

    pub fn format(path: impl Into<String>, reason: impl Into<String>) -> Self {
        XzipError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that describe a missing object rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            XzipError::BlobNotFound { .. } | XzipError::ArchiveNotFound { .. }
        )
    }

    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            XzipError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            XzipError::ArchiveNotFound { .. } => ENOENT,
            XzipError::ReadOnly => EROFS,
            // a missing blob is an unreadable block from the caller's view
            XzipError::BlobNotFound { .. } => EIO,
            XzipError::Parse(_)
            | XzipError::Zip64Unsupported(_)
            | XzipError::Format { .. }
            | XzipError::Unreadable { .. }
            | XzipError::DepthMismatch { .. } => EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_not_found_errno() {
        let err = XzipError::ArchiveNotFound {
            name: "a.zip".to_string(),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_missing_blob_is_io_failure() {
        let err = XzipError::BlobNotFound {
            hash: "00".repeat(20),
        };
        assert_eq!(err.to_errno(), libc::EIO);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_only_errno() {
        assert_eq!(XzipError::ReadOnly.to_errno(), libc::EROFS);
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let err = XzipError::from(std::io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_format_error_names_file() {
        let err = XzipError::format("meta/a.zip.stream", "truncated");
        let msg = err.to_string();
        assert!(msg.contains("a.zip.stream"));
        assert!(msg.contains("truncated"));
        assert_eq!(err.to_errno(), libc::EIO);
    }
}
