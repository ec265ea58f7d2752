//! Main entry point for the xzip CLI application.
//!
//! `xzip explode` splits archives into a content store and descriptors;
//! `xzip mount` serves them back as a read-only FUSE filesystem.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xzip::cli::{Command, ExplodeArgs, MountArgs};
use xzip::fs::mount::validate_directory;
use xzip::fs::{mount, ArchiveCatalog, XzipFs};
use xzip::{Cli, Exploder};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Explode(args) => {
            init_tracing(false);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(explode(args))
        }
        Command::Mount(args) => run_mount(args),
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the default level.
///
/// The subscriber also picks up `log` records, which is where the FUSE
/// session reports its own request traffic.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Explode every archive named on the command line.
///
/// Each archive is processed independently; the command fails after all
/// of them have been attempted if any one failed.
async fn explode(args: ExplodeArgs) -> Result<()> {
    let exploder = Exploder::new(&args.directory, args.depth);
    let results = exploder.explode_all(&args.files).await;

    let mut failed = 0usize;
    let mut total_dedup = 0u64;
    for (path, result) in &results {
        match result {
            Ok(report) => total_dedup += report.deduplicated_bytes,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    info!(
        "{} of {} archives exploded into {}, {} bytes deduplicated",
        results.len() - failed,
        results.len(),
        args.directory.display(),
        total_dedup
    );
    if failed > 0 {
        bail!("{} of {} archives failed", failed, results.len());
    }
    Ok(())
}

/// Mount the exploded archives and serve requests until unmounted.
///
/// The FUSE session loop runs on the main thread; descriptor loads and blob
/// reads run on a tokio runtime built after any daemonizing, since a forked
/// child does not inherit runtime threads.
fn run_mount(args: MountArgs) -> Result<()> {
    let config = args.to_config()?;
    init_tracing(config.debug);

    validate_directory(&args.directory)?;
    validate_directory(&args.mountpoint)?;
    let directory = canonical(&args.directory)?;
    let mountpoint = canonical(&args.mountpoint)?;

    if !config.foreground {
        daemonize()?;
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.single_threaded {
        builder.worker_threads(1);
    }
    let runtime = builder.enable_all().build()?;

    let catalog = Arc::new(ArchiveCatalog::new(&directory, config.depth));
    runtime.spawn(release_on_hangup(catalog.clone()));

    let fs = XzipFs::new(
        catalog,
        runtime.handle().clone(),
        config.single_threaded,
        config.ttl,
    );
    info!(
        "mounting {} at {} (depth {})",
        directory.display(),
        mountpoint.display(),
        config.depth
    );
    mount(fs, &mountpoint, &config)
        .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;

    runtime.shutdown_background();
    Ok(())
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("cannot resolve {}", path.display()))
}

/// Detach from the terminal. Changes the working directory to `/`.
fn daemonize() -> Result<()> {
    // SAFETY: called before any other thread exists
    if unsafe { libc::daemon(0, 0) } != 0 {
        return Err(std::io::Error::last_os_error()).context("failed to daemonize");
    }
    Ok(())
}

/// Drop idle cached descriptors every time SIGHUP arrives.
async fn release_on_hangup(catalog: Arc<ArchiveCatalog>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("cannot listen for SIGHUP: {}", e);
            return;
        }
    };
    while hangup.recv().await.is_some() {
        let released = catalog.release_unused();
        info!("SIGHUP: released {} cached archives", released);
    }
}
