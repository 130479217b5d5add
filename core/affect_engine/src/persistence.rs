//! JSON snapshot files for affect state, backend health and backend weights.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::CoreResult;

/// Read and parse `path`. `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(Some(value))
}

/// Load `path`, falling back to `fallback()` when the file is missing or
/// unreadable. Corrupt files are reported and left untouched on disk.
pub fn load_or_else<T, F>(path: &Path, what: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match load_json(path) {
        Ok(Some(value)) => {
            debug!(path = %path.display(), "loaded {what}");
            value
        }
        Ok(None) => {
            debug!(path = %path.display(), "no persisted {what}, using defaults");
            fallback()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "persisted {what} unreadable, using defaults");
            fallback()
        }
    }
}

/// Write `value` as pretty JSON via a sibling temp file and a rename, so a
/// crash mid-write never leaves a truncated snapshot behind.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> CoreResult<()> {
    write_atomic(path, &to_json(value)?)
}

/// The exact text [`save_json`] writes for `value`.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Replace `path` with `contents` through a temp file and a rename.
pub fn write_atomic(path: &Path, contents: &str) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
