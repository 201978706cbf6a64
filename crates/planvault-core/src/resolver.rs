//! Case-insensitive name resolution over a listing-based store.
//!
//! The backend preserves case but callers do not know which casing a record
//! was written with. Lookups list the folder and compare names ignoring
//! case. More than one hit is an error; the resolver never picks one.

use crate::error::{Result, VaultError};
use crate::paths;
use crate::store::{ObjectEntry, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PathResolver {
    store: Arc<dyn ObjectStore>,
}

impl PathResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Resolve `file_name` inside `folder`, ignoring case.
    ///
    /// Exactly one match returns its key. Zero matches return `Ok(None)`
    /// unless `required`, in which case `NotFound`. Two or more matches are
    /// always `Ambiguous`.
    pub fn find_file(&self, folder: &str, file_name: &str, required: bool) -> Result<Option<String>> {
        let mut matches: Vec<ObjectEntry> = self
            .store
            .list(folder)?
            .into_iter()
            .filter(|e| e.name.eq_ignore_ascii_case(file_name))
            .collect();

        debug!(folder = %folder, name = %file_name, matches = matches.len(), "resolve file");

        match matches.len() {
            1 => Ok(matches.pop().map(|e| e.key)),
            0 if required => Err(VaultError::NotFound(paths::combine(folder, &[file_name]))),
            0 => Ok(None),
            count => Err(VaultError::Ambiguous {
                name: file_name.to_string(),
                folder: folder.to_string(),
                count,
            }),
        }
    }

    /// Like [`find_file`](Self::find_file) with `required = true`.
    pub fn require_file(&self, folder: &str, file_name: &str) -> Result<String> {
        self.find_file(folder, file_name, true)?
            .ok_or_else(|| VaultError::NotFound(paths::combine(folder, &[file_name])))
    }

    /// Keys of the folder's direct children, optionally limited to names
    /// ending in `suffix` (case-insensitive).
    pub fn list_files(&self, folder: &str, suffix: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .list_entries(folder, suffix)?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }

    pub fn list_entries(&self, folder: &str, suffix: Option<&str>) -> Result<Vec<ObjectEntry>> {
        let entries = self.store.list(folder)?;
        let Some(suffix) = suffix.filter(|s| !s.trim().is_empty()) else {
            return Ok(entries);
        };
        let suffix = suffix.to_ascii_lowercase();
        Ok(entries
            .into_iter()
            .filter(|e| e.name.to_ascii_lowercase().ends_with(&suffix))
            .collect())
    }

    /// Create `folder` if the backend does not report it. Idempotent.
    pub fn ensure_folder(&self, folder: &str) -> Result<()> {
        if !self.store.folder_exists(folder)? {
            info!(folder = %folder, "creating folder");
            self.store.create_folder(folder)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
