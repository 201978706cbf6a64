//! Object-storage capability.
//!
//! The core never talks to a concrete storage client. Everything goes through
//! [`ObjectStore`], keyed by `/`-separated strings that may carry a scheme
//! (`s3://bucket/Plans/x.yaml`). Backends are assumed to be case-preserving
//! and listing-based; case-insensitive matching happens in the resolver.

use crate::error::{Result, VaultError};
use crate::paths;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// One direct child of a listed folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full key, usable with `read_text` / `write_text`.
    pub key: String,
    /// Case-preserved file name.
    pub name: String,
}

pub trait ObjectStore: Send + Sync {
    /// Direct file children of `folder`. A missing folder lists as empty.
    fn list(&self, folder: &str) -> Result<Vec<ObjectEntry>>;

    fn folder_exists(&self, folder: &str) -> Result<bool>;

    fn create_folder(&self, folder: &str) -> Result<()>;

    fn read_text(&self, key: &str) -> Result<String>;

    /// Overwrite (or create) the object at `key`.
    fn write_text(&self, key: &str, text: &str) -> Result<()>;

    fn last_modified(&self, key: &str) -> Result<DateTime<Utc>>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryObject {
    text: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, MemoryObject>,
    folders: BTreeSet<String>,
    last_stamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Wall-clock stamp, bumped so that two writes never share one.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// Case-preserving in-memory store. `Plan.yaml` and `plan.YAML` are distinct
/// keys, which is exactly the situation the resolver has to guard against.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored objects (folders excluded).
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an object; returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.state().objects.remove(key).is_some()
    }
}

fn folder_key(folder: &str) -> String {
    folder.trim_end_matches('/').to_string()
}

fn parent_of(key: &str) -> &str {
    match key.rfind('/') {
        Some(i) => &key[..i],
        None => "",
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, folder: &str) -> Result<Vec<ObjectEntry>> {
        let folder = folder_key(folder);
        let state = self.state();
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| parent_of(key) == folder)
            .map(|(key, obj)| ObjectEntry {
                key: key.clone(),
                name: paths::file_name(key).to_string(),
            })
            .collect())
    }

    fn folder_exists(&self, folder: &str) -> Result<bool> {
        let folder = folder_key(folder);
        let state = self.state();
        Ok(state.folders.contains(&folder)
            || state.objects.keys().any(|k| parent_of(k) == folder))
    }

    fn create_folder(&self, folder: &str) -> Result<()> {
        self.state().folders.insert(folder_key(folder));
        Ok(())
    }

    fn read_text(&self, key: &str) -> Result<String> {
        self.state()
            .objects
            .get(key)
            .map(|obj| obj.text.clone())
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }

    fn write_text(&self, key: &str, text: &str) -> Result<()> {
        let mut state = self.state();
        let modified = state.next_stamp();
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                text: text.to_string(),
                modified,
            },
        );
        Ok(())
    }

    fn last_modified(&self, key: &str) -> Result<DateTime<Utc>> {
        self.state()
            .objects
            .get(key)
            .map(|obj| obj.modified)
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_returns_direct_children_only() {
        let store = MemoryStore::new();
        store.write_text("b/Plans/a.yaml", "x").unwrap();
        store.write_text("b/Plans/sub/deep.yaml", "x").unwrap();
        store.write_text("b/History/a_1.yaml", "x").unwrap();

        let names: Vec<_> = store
            .list("b/Plans/")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.yaml"]);
    }

    #[test]
    fn keys_are_case_preserving() {
        let store = MemoryStore::new();
        store.write_text("b/Plans/Plan.yaml", "1").unwrap();
        store.write_text("b/Plans/plan.YAML", "2").unwrap();
        assert_eq!(store.list("b/Plans").unwrap().len(), 2);
        assert!(store.read_text("b/Plans/PLAN.yaml").is_err());
    }

    #[test]
    fn rewrites_get_strictly_newer_stamps() {
        let store = MemoryStore::new();
        store.write_text("k/f", "1").unwrap();
        let first = store.last_modified("k/f").unwrap();
        store.write_text("k/f", "2").unwrap();
        assert!(store.last_modified("k/f").unwrap() > first);
    }

    #[test]
    fn folders_exist_once_created_or_populated() {
        let store = MemoryStore::new();
        assert!(!store.folder_exists("b/Plans").unwrap());
        store.create_folder("b/Plans/").unwrap();
        assert!(store.folder_exists("b/Plans").unwrap());
        store.write_text("b/History/x.yaml", "").unwrap();
        assert!(store.folder_exists("b/History").unwrap());
    }
}
