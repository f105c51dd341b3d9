pub mod commands;

use std::env;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

/// Absolute form of a path given on the command line. The path need not exist.
pub fn canonicalize_or_current(path: &str) -> Result<PathBuf> {
    let cwd = env::current_dir().context("Failed to get current directory")?;
    if path == "." {
        return Ok(cwd);
    }
    Ok(Path::new(path).canonicalize().unwrap_or_else(|_| cwd.join(path)))
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open image for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read image for hashing: {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` selects the filter (default `info`); `verbose` forces `debug`.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // A subscriber may already be installed when running under tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
