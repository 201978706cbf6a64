//! Built-in policy engine: a YAML list of access-control entries.
//!
//! ```yaml
//! Aces:
//!   - Trustee: Operators
//!     Resource: "deploy-*"
//!     Kind: FileSystem
//!     Rights: [Execute, Read]
//!   - Trustee: contractor
//!     Resource: "deploy-prod"
//!     Rights: [Execute]
//!     Allowed: false
//! ```
//!
//! Trustees match the identity's name, its groups, or any global external
//! group. Resources are case-insensitive globs. A matching deny entry wins
//! over any allow; no matching entry denies.

use super::{Identity, Policy, PolicyLoader, Right, RightKind};
use crate::catalog::glob_to_regex;
use crate::error::{Result, VaultError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Grants every right of its kind.
pub const FULL_CONTROL: &str = "FullControl";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AclDocument {
    pub aces: Vec<AccessControlEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessControlEntry {
    pub trustee: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default)]
    pub kind: RightKind,
    pub rights: Vec<String>,
    #[serde(default = "default_allowed")]
    pub allowed: bool,
}

fn default_resource() -> String {
    "*".to_string()
}

fn default_allowed() -> bool {
    true
}

#[derive(Debug)]
struct CompiledAce {
    trustee: String,
    resource: Regex,
    kind: RightKind,
    rights: Vec<String>,
    allowed: bool,
}

impl CompiledAce {
    fn compile(ace: &AccessControlEntry) -> Result<Self> {
        let resource = RegexBuilder::new(&format!("^{}$", glob_to_regex(&ace.resource)))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            trustee: ace.trustee.to_lowercase(),
            resource,
            kind: ace.kind,
            rights: ace.rights.iter().map(|r| r.to_lowercase()).collect(),
            allowed: ace.allowed,
        })
    }

    fn grants(&self, right: &Right) -> bool {
        self.kind == right.kind
            && self
                .rights
                .iter()
                .any(|r| *r == right.name.to_lowercase() || r.eq_ignore_ascii_case(FULL_CONTROL))
    }
}

#[derive(Debug)]
pub struct AclPolicy {
    aces: Vec<CompiledAce>,
    global_groups: Vec<String>,
}

impl AclPolicy {
    pub fn parse(data: &str, global_groups: &[String]) -> Result<Self> {
        let doc: AclDocument = if data.trim().is_empty() {
            AclDocument::default()
        } else {
            serde_yaml::from_str(data).map_err(|e| VaultError::Policy(format!("unreadable ACL: {e}")))?
        };
        Self::from_document(&doc, global_groups)
    }

    pub fn from_document(doc: &AclDocument, global_groups: &[String]) -> Result<Self> {
        let aces = doc.aces.iter().map(CompiledAce::compile).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            aces,
            global_groups: global_groups.iter().map(|g| g.to_lowercase()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.aces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aces.is_empty()
    }

    fn is_trustee(&self, identity: &Identity, trustee: &str) -> bool {
        identity.name.to_lowercase() == trustee
            || identity.groups.iter().any(|g| g.to_lowercase() == trustee)
            || self.global_groups.iter().any(|g| g == trustee)
    }
}

impl Policy for AclPolicy {
    fn evaluate(&self, identity: &Identity, resource: &str, right: &Right) -> Result<bool> {
        let mut allowed = false;
        for ace in &self.aces {
            if !ace.grants(right) || !ace.resource.is_match(resource) || !self.is_trustee(identity, &ace.trustee) {
                continue;
            }
            if !ace.allowed {
                return Ok(false);
            }
            allowed = true;
        }
        Ok(allowed)
    }
}

/// [`PolicyLoader`] for [`AclPolicy`] documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct AclPolicyLoader;

impl PolicyLoader for AclPolicyLoader {
    fn load(&self, data: &str, global_groups: &[String]) -> Result<Arc<dyn Policy>> {
        Ok(Arc::new(AclPolicy::parse(data, global_groups)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
