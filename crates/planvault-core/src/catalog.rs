use crate::codec;
use crate::error::Result;
use crate::ids::InstanceIdSource;
use crate::paths::{self, PLAN_EXT};
use crate::resolver::PathResolver;
use crate::types::Plan;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Pattern helpers
// ---------------------------------------------------------------------------

/// Escape everything but `*`, which becomes `.*`. Not anchored.
pub(crate) fn glob_to_regex(glob: &str) -> String {
    glob.split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

/// Build the case-insensitive file-name regex for a plan-list filter.
///
/// Literal filters match anywhere in the name and must be followed by a
/// `.yaml` suffix. Regex filters are used as given, but are pinned to the
/// `.yaml` suffix unless they already mention it.
pub fn plan_filter_regex(filter: &str, is_regex: bool) -> Result<Regex> {
    let pattern = if !is_regex {
        format!(r"{}.*\.yaml$", glob_to_regex(filter))
    } else if filter.to_ascii_lowercase().ends_with(PLAN_EXT) {
        filter.to_string()
    } else if let Some(stripped) = filter.strip_suffix('$') {
        format!(r"{stripped}\.yaml$")
    } else {
        format!(r"{filter}.*\.yaml$")
    };
    Ok(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
}

// ---------------------------------------------------------------------------
// PlanCatalog
// ---------------------------------------------------------------------------

/// Read side over the plan definition folder.
#[derive(Clone)]
pub struct PlanCatalog {
    resolver: PathResolver,
    folder: String,
    ids: Arc<dyn InstanceIdSource>,
}

impl PlanCatalog {
    pub fn new(resolver: PathResolver, folder: impl Into<String>, ids: Arc<dyn InstanceIdSource>) -> Self {
        Self {
            resolver,
            folder: folder.into(),
            ids,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Unique names of the definitions in the plan folder.
    ///
    /// No filter lists every `.yaml` file.
    pub fn list_plans(&self, filter: Option<&str>, is_regex: bool) -> Result<Vec<String>> {
        let filter = filter.filter(|f| !f.is_empty());
        let names: Vec<String> = match filter {
            None => self
                .resolver
                .list_entries(&self.folder, Some(PLAN_EXT))?
                .into_iter()
                .map(|e| paths::file_stem(&e.name).to_string())
                .collect(),
            Some(filter) => {
                let re = plan_filter_regex(filter, is_regex)?;
                self.resolver
                    .list_entries(&self.folder, None)?
                    .into_iter()
                    .filter(|e| re.is_match(&e.name))
                    .map(|e| paths::file_stem(&e.name).to_string())
                    .collect()
            }
        };
        debug!(folder = %self.folder, count = names.len(), "listed plans");
        Ok(names)
    }

    /// Load the single definition named `unique_name` (any casing).
    pub fn get_plan(&self, unique_name: &str) -> Result<Plan> {
        let key = self
            .resolver
            .require_file(&self.folder, &format!("{unique_name}{PLAN_EXT}"))?;
        let text = self.resolver.store().read_text(&key)?;
        codec::decode(&key, &text)
    }

    /// Load a definition and stamp it as a new instance.
    pub fn create_instance(&self, unique_name: &str) -> Result<Plan> {
        let mut plan = self.get_plan(unique_name)?;
        if plan.unique_name.trim().is_empty() {
            plan.unique_name = unique_name.to_string();
        }
        plan.instance_id = self.ids.next_id(&plan.unique_name);
        debug!(plan = %plan.unique_name, instance_id = plan.instance_id, "created plan instance");
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
