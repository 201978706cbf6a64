//! [`ObjectStore`] over a local directory.
//!
//! Keys map onto paths below `base` with any `scheme://` prefix dropped, so
//! `s3://bucket/Plans/a.yaml` lands at `<base>/bucket/Plans/a.yaml`.

use crate::error::{Result, VaultError};
use crate::paths;
use crate::store::{ObjectEntry, ObjectStore};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Readers never see a half-written record.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FsStore {
    base: PathBuf,
}

impl FsStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.base.clone();
        for seg in paths::strip_scheme(key).split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    return Err(VaultError::Storage(format!(
                        "key escapes store root: {key}"
                    )))
                }
                s => path.push(s),
            }
        }
        Ok(path)
    }
}

fn not_found_as_vault(key: &str, err: std::io::Error) -> VaultError {
    if err.kind() == std::io::ErrorKind::NotFound {
        VaultError::NotFound(key.to_string())
    } else {
        VaultError::Io(err)
    }
}

fn modified_utc(meta: &std::fs::Metadata) -> Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(meta.modified()?))
}

impl ObjectStore for FsStore {
    fn list(&self, folder: &str) -> Result<Vec<ObjectEntry>> {
        let dir = self.resolve(folder)?;
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip in-flight temp files from atomic_write.
            if name.starts_with(".tmp") {
                continue;
            }
            entries.push(ObjectEntry {
                key: paths::combine(folder, &[&name]),
                name,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn folder_exists(&self, folder: &str) -> Result<bool> {
        Ok(self.resolve(folder)?.is_dir())
    }

    fn create_folder(&self, folder: &str) -> Result<()> {
        std::fs::create_dir_all(self.resolve(folder)?)?;
        Ok(())
    }

    fn read_text(&self, key: &str) -> Result<String> {
        std::fs::read_to_string(self.resolve(key)?).map_err(|e| not_found_as_vault(key, e))
    }

    fn write_text(&self, key: &str, text: &str) -> Result<()> {
        atomic_write(&self.resolve(key)?, text.as_bytes())
    }

    fn last_modified(&self, key: &str) -> Result<DateTime<Utc>> {
        let meta = std::fs::metadata(self.resolve(key)?).map_err(|e| not_found_as_vault(key, e))?;
        modified_utc(&meta)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
