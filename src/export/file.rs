//! File operations for the working directory.
//!
//! - Atomic writes: write to a temp file, sync to disk, then rename
//! - Streaming concatenation of segment files, optionally wrapped once in
//!   the container element
//! - A run-owned working directory removed on drop

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Write content to a file atomically.
///
/// Writes to `<path>.tmp`, syncs, then renames over the target. If any
/// step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Concatenate `inputs` in order into `output`.
///
/// With `wrap`, the result is enclosed in `<wrap>` ... `</wrap>` exactly
/// once. Inputs are streamed, never loaded whole. Returns bytes written.
///
/// # Errors
///
/// Returns an error if an input cannot be read or the output written.
pub fn concatenate(output: &Path, inputs: &[PathBuf], wrap: Option<&str>) -> io::Result<u64> {
    let mut writer = BufWriter::new(File::create(output)?);
    let mut written = 0;

    if let Some(tag) = wrap {
        let open = format!("<{tag}>\n");
        writer.write_all(open.as_bytes())?;
        written += open.len() as u64;
    }

    for input in inputs {
        let mut reader = BufReader::new(File::open(input)?);
        written += io::copy(&mut reader, &mut writer)?;
    }

    if let Some(tag) = wrap {
        let close = format!("</{tag}>\n");
        writer.write_all(close.as_bytes())?;
        written += close.len() as u64;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(written)
}

/// Working directory owned by one run.
///
/// Removed when dropped unless [`WorkDir::keep`] was called. A failed
/// removal is logged and otherwise ignored.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create a fresh, uniquely named directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(root: &Path) -> io::Result<Self> {
        let path = root.join(format!("oai-harvest-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "Created working directory");
        Ok(Self { path, keep: false })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory on disk and return its path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove working directory");
        }
    }
}
