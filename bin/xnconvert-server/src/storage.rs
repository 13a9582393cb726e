//! Working directories for uploads and converter output.
//!
//! [`Storage`] owns the two directory paths and the set of file paths that
//! belong to in-flight requests. [`Artifacts`] is the per-request guard: every
//! path it holds is deleted when it drops, whichever way the request ends.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Suffix appended to the upload's stem to name the converted file.
pub const OUTPUT_SUFFIX: &str = "_converted";

/// Extension of every converted file.
pub const OUTPUT_EXTENSION: &str = "jpg";

/// Stem used when the client's filename has none usable.
const FALLBACK_STEM: &str = "image";

/// Another in-flight request is already producing this output file.
#[derive(Debug, Error)]
#[error("output '{}' is already being produced by another request", .0.display())]
pub struct OutputInUse(pub PathBuf);

/// The uploads and outputs directories shared by every request.
#[derive(Debug)]
pub struct Storage {
    uploads_dir: PathBuf,
    outputs_dir: PathBuf,
    /// Paths owned by live [`Artifacts`] guards.
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl Storage {
    pub fn new(uploads_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            outputs_dir: outputs_dir.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// Create both directories if they are missing.
    ///
    /// Creation is single-level: a missing parent is an error, as is any
    /// permission problem. Callers treat a failure here as fatal.
    pub async fn prepare(&self) -> io::Result<()> {
        for dir in [&self.uploads_dir, &self.outputs_dir] {
            if tokio::fs::try_exists(dir).await? {
                continue;
            }
            tokio::fs::create_dir(dir).await?;
            info!(path = %dir.display(), "created working directory");
        }
        Ok(())
    }

    /// Open a new per-request guard with a fresh, unique upload path.
    pub fn begin(self: &Arc<Self>) -> Artifacts {
        let input = self.uploads_dir.join(Uuid::new_v4().simple().to_string());
        self.lock().insert(input.clone());
        Artifacts {
            storage: Arc::clone(self),
            input,
            output: None,
        }
    }

    /// Where the converted form of `original_filename` is written.
    ///
    /// Directory components are dropped and the stem is kept as sent. A stem
    /// that cannot name a file falls back to `image`.
    pub fn output_path_for(&self, original_filename: &str) -> PathBuf {
        let stem = Path::new(original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| is_usable_stem(s))
            .unwrap_or(FALLBACK_STEM);
        self.outputs_dir
            .join(format!("{stem}{OUTPUT_SUFFIX}.{OUTPUT_EXTENSION}"))
    }

    /// Remove every regular file from both directories that no in-flight
    /// request owns. Returns the number of files deleted.
    pub async fn sweep(&self) -> io::Result<usize> {
        let mut removed = 0;
        for dir in [&self.uploads_dir, &self.outputs_dir] {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let path = entry.path();
                if self.lock().contains(&path) {
                    debug!(path = %path.display(), "sweep skipped in-flight file");
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    // Raced with a request finishing its own cleanup.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        info!(removed, "swept working directories");
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // The set stays consistent across a panic: every mutation is a single
        // insert or remove.
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Temporary files owned by one request.
///
/// Dropping the guard deletes the upload and, if claimed, the output, then
/// releases both paths for reuse. The responder moves the guard into the
/// response body so deletion waits until the file has been sent.
#[derive(Debug)]
pub struct Artifacts {
    storage: Arc<Storage>,
    input: PathBuf,
    output: Option<PathBuf>,
}

impl Artifacts {
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Reserve `path` as this request's output.
    ///
    /// Two concurrent uploads with the same stem would otherwise overwrite
    /// each other's result, so the second one is refused.
    pub fn claim_output(&mut self, path: PathBuf) -> Result<(), OutputInUse> {
        if !self.storage.lock().insert(path.clone()) {
            return Err(OutputInUse(path));
        }
        if let Some(previous) = self.output.replace(path) {
            release(&self.storage, &previous);
        }
        Ok(())
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        release(&self.storage, &self.input);
        if let Some(output) = self.output.take() {
            release(&self.storage, &output);
        }
    }
}

fn release(storage: &Storage, path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete temporary file");
        }
    }
    storage.lock().remove(path);
}

fn is_usable_stem(stem: &str) -> bool {
    !matches!(stem, "" | "." | "..") && !stem.contains(['\0', '/'])
}

// ── Tests ──────────────────────────────────────────────────────────────────────
