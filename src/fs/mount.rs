//! Mount configuration and the `-o` option syntax.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::store::ContentStore;

use super::filesystem::XzipFs;

/// Runtime configuration of a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Sharding depth of the content store
    pub depth: u8,
    /// Log every filesystem request
    pub debug: bool,
    /// Stay attached to the terminal
    pub foreground: bool,
    /// Serve reads on the request loop instead of worker tasks
    pub single_threaded: bool,
    pub allow_other: bool,
    pub allow_root: bool,
    pub default_permissions: bool,
    pub auto_unmount: bool,
    pub fsname: String,
    /// How long the kernel may cache attributes and lookups
    pub ttl: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            depth: 0,
            debug: false,
            foreground: false,
            single_threaded: false,
            allow_other: false,
            allow_root: false,
            default_permissions: false,
            auto_unmount: false,
            fsname: "xzip".to_string(),
            ttl: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid depth {0}: expected 0..={max}", max = ContentStore::MAX_DEPTH)]
    InvalidDepth(String),
}

/// Check that a path exists and is a directory.
pub fn validate_directory(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }

    Ok(())
}

pub fn parse_depth(value: &str) -> Result<u8, MountError> {
    match value.trim().parse::<u8>() {
        Ok(depth) if depth <= ContentStore::MAX_DEPTH => Ok(depth),
        _ => Err(MountError::InvalidDepth(value.to_string())),
    }
}

/// Apply a comma-separated option string on top of `config`.
///
/// Valid options: depth=N, debug, foreground, nothread, allow_other,
/// allow_root, default_permissions, auto_unmount, fsname=NAME, ro.
pub fn apply_mount_options(config: &mut MountConfig, opts_str: &str) -> Result<(), MountError> {
    for opt in opts_str.split(',') {
        let opt = opt.trim();
        let (key, value) = match opt.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (opt, None),
        };

        match (key, value) {
            ("depth", Some(value)) => config.depth = parse_depth(value)?,
            ("fsname", Some(value)) if !value.is_empty() => config.fsname = value.to_string(),
            ("debug", None) => config.debug = true,
            ("foreground", None) => config.foreground = true,
            ("nothread", None) => config.single_threaded = true,
            ("allow_other", None) => config.allow_other = true,
            ("allow_root", None) => config.allow_root = true,
            ("default_permissions", None) => config.default_permissions = true,
            ("auto_unmount", None) => config.auto_unmount = true,
            // always read-only
            ("ro", None) => {}
            ("", None) => {}
            _ => return Err(MountError::InvalidOption(opt.to_string())),
        }
    }

    Ok(())
}

/// Convert a MountConfig to the fuser option list. The mount is always read-only.
pub fn options_to_fuser(config: &MountConfig) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![
        fuser::MountOption::FSName(config.fsname.clone()),
        fuser::MountOption::Subtype("xzip".to_string()),
        fuser::MountOption::RO,
        fuser::MountOption::NoDev,
        fuser::MountOption::NoSuid,
    ];

    if config.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }

    if config.allow_root {
        fuser_opts.push(fuser::MountOption::AllowRoot);
    }

    if config.default_permissions {
        fuser_opts.push(fuser::MountOption::DefaultPermissions);
    }

    if config.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }

    fuser_opts
}

/// Mount `fs` at `mountpoint` and serve requests until unmounted.
pub fn mount(fs: XzipFs, mountpoint: &Path, config: &MountConfig) -> std::io::Result<()> {
    fuser::mount2(fs, mountpoint, &options_to_fuser(config))
}
