//! File-backed JSON document stores.
//!
//! Both stores share one persistence policy:
//! - a missing file is created with a default document
//! - an unparseable file is moved to `<name>.backup` and replaced with a default document
//! - every write re-serializes the whole document (pretty-printed, UTF-8)

pub mod guild_config;
pub mod prompts;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::{errors::Error, Result};

/// `<file name>.backup` next to the original file.
pub fn backup_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".backup")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Read and parse a document, recovering from a missing or corrupt file.
///
/// Corrupt content is renamed out of the way (overwriting an older backup) and a
/// fresh default document takes its place. At most one rename is attempted; a file
/// that is still unreadable afterwards is reported as `Error::Recovery`.
pub fn load_document<T, F>(path: &Path, default: F) -> Result<T>
where
    T: DeserializeOwned + Serialize,
    F: Fn() -> T,
{
    let mut backed_up = false;

    loop {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let doc = default();
                if let Err(e) = save_document(path, &doc) {
                    tracing::warn!(path = %path.display(), error = %e, "could not create default document");
                }
                return Ok(doc);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let parse_err = match serde_json::from_str::<T>(&raw) {
            Ok(doc) => return Ok(doc),
            Err(e) => e,
        };

        if backed_up {
            return Err(Error::Recovery {
                path: path.to_path_buf(),
                reason: format!("still unreadable after backup: {parse_err}"),
            });
        }

        let backup = backup_path(path);
        tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            error = %parse_err,
            "corrupt document, moving it aside"
        );
        fs::rename(path, &backup).map_err(|e| Error::Recovery {
            path: path.to_path_buf(),
            reason: format!("rename to {} failed: {e}", backup.display()),
        })?;
        backed_up = true;
    }
}

/// Serialize the full document and atomically replace the file.
///
/// The parent directory is created if needed. Failures are logged and returned.
pub fn save_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let res = write_pretty(path, doc);
    if let Err(e) = &res {
        tracing::error!(path = %path.display(), error = %e, "failed to save document");
    }
    res
}

fn write_pretty<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let txt = serde_json::to_string_pretty(doc)?;
    let tmp = sibling_with_suffix(path, ".tmp");
    fs::write(&tmp, txt)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn scratch_path(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!("gcb-{prefix}-{}-{ts}-{n}", std::process::id()))
        .join("doc.json")
}
