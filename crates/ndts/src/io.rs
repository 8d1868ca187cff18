use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{NdtsError, Result};

// --- Atomic file replacement ---

/// Build the replacement in a temp file in the same directory, then rename
/// it over `path`. The filesystem contract is atomic same-volume rename and
/// durable fsync; nothing else is assumed of the host.
///
/// With `keep_bak`, the prior file survives as `<path>.bak`.
pub fn atomic_replace(
    path: &Path,
    keep_bak: bool,
    write_fn: impl FnOnce(&mut fs::File) -> Result<()>,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| NdtsError::io(dir, e))?;

    write_fn(tmp.as_file_mut())?;
    tmp.as_file().sync_all().map_err(|e| NdtsError::io(tmp.path(), e))?;

    if keep_bak && path.exists() {
        let bak = append_ext(path, ".bak");
        fs::rename(path, &bak).map_err(|e| NdtsError::io(path, e))?;
    }

    tmp.persist(path)
        .map_err(|e| NdtsError::io(path, e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

pub fn fsync_dir(dir: &Path) -> Result<()> {
    let f = fs::File::open(dir).map_err(|e| NdtsError::io(dir, e))?;
    f.sync_all().map_err(|e| NdtsError::io(dir, e))?;
    Ok(())
}

pub fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(ext);
    PathBuf::from(s)
}

// --- Cooperative cancellation ---

/// Shared flag observed by long operations (compact, rewrite, bulk reads)
/// between chunks. Cancelling leaves the file in its prior committed state:
/// replacements go to a temp path and only rename on success.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Error out of a long operation if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(NdtsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_replace_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        atomic_replace(&path, false, |f| {
            f.write_all(b"one").map_err(|e| NdtsError::io(&path, e))
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");

        atomic_replace(&path, true, |f| {
            f.write_all(b"two").map_err(|e| NdtsError::io(&path, e))
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read(append_ext(&path, ".bak")).unwrap(), b"one");
    }

    #[test]
    fn test_atomic_replace_failure_keeps_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"keep").unwrap();

        let result = atomic_replace(&path, false, |_| Err(NdtsError::Cancelled));
        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"keep");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(matches!(token.check(), Err(NdtsError::Cancelled)));
    }
}
