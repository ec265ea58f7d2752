use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::fs::mount::{apply_mount_options, parse_depth, MountConfig, MountError};

#[derive(Parser, Debug)]
#[command(name = "xzip")]
#[command(version)]
#[command(about = "Deduplicate zip archives and mount them back read-only", long_about = None)]
#[command(after_help = "Examples:\n  \
  xzip explode -d /srv/xz --depth 2 *.zip    explode archives into /srv/xz\n  \
  xzip mount --depth 2 /srv/xz /mnt/zips     serve them at /mnt/zips")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split archives into a content store and descriptors
    Explode(ExplodeArgs),
    /// Mount exploded archives as a read-only filesystem
    Mount(MountArgs),
}

#[derive(Args, Debug)]
pub struct ExplodeArgs {
    /// Base directory for the exploded files
    #[arg(short = 'd', long = "directory", value_name = "DIR", default_value = ".")]
    pub directory: PathBuf,

    /// Number of hash-prefix directory levels in the content store
    #[arg(long, value_name = "N", default_value_t = 0, value_parser = depth_arg)]
    pub depth: u8,

    /// Zip archives to explode
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Number of hash-prefix directory levels used at explode time
    #[arg(short = 'd', long, value_name = "N", default_value_t = 0, value_parser = depth_arg)]
    pub depth: u8,

    /// Log every filesystem request (implies --foreground)
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Stay in the foreground
    #[arg(short = 'f', long)]
    pub foreground: bool,

    /// Serve one request at a time
    #[arg(short = 's', long)]
    pub single_threaded: bool,

    /// Mount options, comma separated; override the flags above
    #[arg(short = 'o', value_name = "OPTIONS")]
    pub options: Vec<String>,

    /// Base directory of the exploded files
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Where to mount
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,
}

impl MountArgs {
    /// Merge flags and `-o` options into a mount configuration.
    pub fn to_config(&self) -> Result<MountConfig, MountError> {
        let mut config = MountConfig {
            depth: self.depth,
            debug: self.debug,
            foreground: self.foreground,
            single_threaded: self.single_threaded,
            ..MountConfig::default()
        };
        for opts in &self.options {
            apply_mount_options(&mut config, opts)?;
        }
        if config.debug {
            config.foreground = true;
        }
        Ok(config)
    }
}

fn depth_arg(s: &str) -> Result<u8, String> {
    parse_depth(s).map_err(|e| e.to_string())
}
