use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Ensure a directory exists, creating it and any parents if needed.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Replace the file at `path` with `contents` atomically.
///
/// The data is written to a temporary file in the same directory, flushed to
/// disk, then renamed over the destination. A crash at any point leaves either
/// the old file or the new one, never a partial write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable where the platform allows opening directories.
    #[cfg(unix)]
    if let Ok(d) = std::fs::File::open(dir) {
        if let Err(e) = d.sync_all() {
            tracing::debug!("Failed to sync directory {}: {e}", dir.display());
        }
    }
    Ok(())
}
