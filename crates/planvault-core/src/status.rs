//! Per-instance execution history.
//!
//! One record per plan instance at `<history>/<UniqueName>_<InstanceId>.<ext>`.
//! Writes overwrite the whole record; there is no merge and no
//! compare-and-swap, so concurrent action updates on one instance can lose
//! each other (last write wins).

use crate::codec::{self, Codec};
use crate::error::{Result, VaultError};
use crate::paths;
use crate::resolver::PathResolver;
use crate::types::{ActionItem, Plan};
use regex::RegexBuilder;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Clone)]
pub struct StatusStore {
    resolver: PathResolver,
    folder: String,
    codec: Codec,
}

impl StatusStore {
    pub fn new(resolver: PathResolver, folder: impl Into<String>, codec: Codec) -> Self {
        Self {
            resolver,
            folder: folder.into(),
            codec,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    fn record_name(unique_name: &str, instance_id: i64, ext: &str) -> String {
        format!("{unique_name}_{instance_id}{ext}")
    }

    /// Locate an existing record, trying the active extension first and then
    /// the one an earlier format would have written.
    fn find_record(&self, unique_name: &str, instance_id: i64) -> Result<Option<String>> {
        let format = self.codec.format();
        for ext in [format.extension(), format.alternate_extension()] {
            let name = Self::record_name(unique_name, instance_id, ext);
            if let Some(key) = self.resolver.find_file(&self.folder, &name, false)? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    pub fn get_status(&self, unique_name: &str, instance_id: i64) -> Result<Plan> {
        let key = self.find_record(unique_name, instance_id)?.ok_or_else(|| {
            VaultError::NotFound(paths::combine(
                &self.folder,
                &[&Self::record_name(unique_name, instance_id, self.codec.extension())],
            ))
        })?;
        let text = self.resolver.store().read_text(&key)?;
        self.codec.decode(&key, &text)
    }

    /// Serialize `plan` in the active format and overwrite its record.
    ///
    /// An existing record with different casing is overwritten in place so
    /// the folder never collects case variants of one instance.
    pub fn put_status(&self, plan: &Plan) -> Result<()> {
        let name = Self::record_name(&plan.unique_name, plan.instance_id, self.codec.extension());
        let key = match self.resolver.find_file(&self.folder, &name, false)? {
            Some(existing) => existing,
            None => paths::combine(&self.folder, &[&name]),
        };
        let text = self.codec.encode(plan)?;
        self.resolver.store().write_text(&key, &text)?;
        debug!(key = %key, "wrote plan status");
        Ok(())
    }

    /// Instance ids recorded for `unique_name`, ascending.
    pub fn instance_ids(&self, unique_name: &str) -> Result<Vec<i64>> {
        let pattern = format!(
            r"^{}_(\d+)(?:{}|{})$",
            regex::escape(unique_name),
            regex::escape(codec::YAML_EXT),
            regex::escape(codec::JSON_EXT),
        );
        let re = RegexBuilder::new(&pattern).case_insensitive(true).build()?;

        let mut ids = BTreeSet::new();
        for entry in self.resolver.list_entries(&self.folder, None)? {
            let Some(caps) = re.captures(&entry.name) else {
                continue;
            };
            // digits that overflow i64 are not ours
            if let Ok(id) = caps[1].parse::<i64>() {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Load the instance, replace the action at `delta`'s tree position and
    /// write the whole record back.
    ///
    /// A delta that matches no node fails with `ActionNotFound` and leaves
    /// the stored record untouched.
    pub fn apply_action_update(&self, unique_name: &str, instance_id: i64, delta: &ActionItem) -> Result<()> {
        let mut plan = self.get_status(unique_name, instance_id)?;

        match plan.count_matching_actions(delta) {
            0 => {
                return Err(VaultError::ActionNotFound {
                    plan: unique_name.to_string(),
                    instance_id,
                    action: delta.name.clone(),
                    parent_instance_id: delta.parent_instance_id,
                })
            }
            1 => {}
            count => {
                return Err(VaultError::Ambiguous {
                    name: format!("{}@{}", delta.name, delta.parent_instance_id),
                    folder: format!("{unique_name}_{instance_id}"),
                    count,
                })
            }
        }

        plan.replace_action(delta);
        self.put_status(&plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
