use crate::codec::HistoryFormat;
use crate::error::{Result, VaultError};
use crate::ids::{InstanceIdScheme, MAX_NODE_ID};
use crate::paths;
use crate::pipeline::Delivery;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Explicit backend credentials. Absent means ambient resolution by the
/// storage client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SecurityConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityConfig {
    /// Folder holding `security.splx`.
    #[serde(default = "default_security_path")]
    pub file_path: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_global_groups")]
    pub global_external_groups_csv: String,
    /// Reload poll period; `0` disables the background poller.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_security_path() -> String {
    paths::SECURITY_DIR.to_string()
}

fn default_global_groups() -> String {
    "Everyone".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            file_path: default_security_path(),
            is_required: false,
            global_external_groups_csv: default_global_groups(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SecurityConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

// ---------------------------------------------------------------------------
// StoreConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub default_bucket_name: String,
    #[serde(default = "default_plan_folder")]
    pub plan_folder_path: String,
    #[serde(default = "default_history_folder")]
    pub history_folder_path: String,
    #[serde(default)]
    pub write_history_as: HistoryFormat,
    #[serde(default)]
    pub process_plans_on_singleton: bool,
    #[serde(default = "default_true")]
    pub process_actions_on_singleton: bool,
    #[serde(default)]
    pub instance_ids: InstanceIdScheme,
    /// Node id for time-ordered ids; random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_node_id: Option<u16>,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_plan_folder() -> String {
    paths::PLANS_DIR.to_string()
}

fn default_history_folder() -> String {
    paths::HISTORY_DIR.to_string()
}

fn default_true() -> bool {
    true
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            aws_access_key: None,
            aws_secret_access_key: None,
            region: default_region(),
            default_bucket_name: String::new(),
            plan_folder_path: default_plan_folder(),
            history_folder_path: default_history_folder(),
            write_history_as: HistoryFormat::default(),
            process_plans_on_singleton: false,
            process_actions_on_singleton: true,
            instance_ids: InstanceIdScheme::default(),
            instance_node_id: None,
            security: SecurityConfig::default(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("aws_access_key", &self.aws_access_key)
            .field(
                "aws_secret_access_key",
                &self.aws_secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("default_bucket_name", &self.default_bucket_name)
            .field("plan_folder_path", &self.plan_folder_path)
            .field("history_folder_path", &self.history_folder_path)
            .field("write_history_as", &self.write_history_as)
            .field("process_plans_on_singleton", &self.process_plans_on_singleton)
            .field("process_actions_on_singleton", &self.process_actions_on_singleton)
            .field("instance_ids", &self.instance_ids)
            .field("instance_node_id", &self.instance_node_id)
            .field("security", &self.security)
            .finish()
    }
}

impl StoreConfig {
    /// Defaults rooted under `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            default_bucket_name: bucket.into(),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VaultError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Result<()> {
        let folders = [
            ("PlanFolderPath", &self.plan_folder_path),
            ("HistoryFolderPath", &self.history_folder_path),
            ("Security.FilePath", &self.security.file_path),
        ];
        for (key, value) in folders {
            if value.trim().is_empty() {
                return Err(VaultError::Configuration(format!("{key} is empty")));
            }
            if self.default_bucket_name.trim().is_empty() && !paths::is_qualified(value) {
                return Err(VaultError::Configuration(format!(
                    "{key} '{value}' is relative and DefaultBucketName is not set"
                )));
            }
        }
        if let Some(node) = self.instance_node_id {
            if node > MAX_NODE_ID {
                return Err(VaultError::Configuration(format!(
                    "InstanceNodeId {node} exceeds {MAX_NODE_ID}"
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Derived values
    // -----------------------------------------------------------------------

    /// Explicit credentials when both keys carry a value. A missing or blank
    /// key on either side selects ambient resolution.
    pub fn credentials(&self) -> Option<Credentials> {
        match (non_blank(&self.aws_access_key), non_blank(&self.aws_secret_access_key)) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
            }),
            _ => None,
        }
    }

    /// Trimmed, non-empty entries of `GlobalExternalGroupsCsv`.
    pub fn global_groups(&self) -> Vec<String> {
        self.security
            .global_external_groups_csv
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn plan_folder(&self) -> String {
        paths::qualify(&self.default_bucket_name, &self.plan_folder_path)
    }

    pub fn history_folder(&self) -> String {
        paths::qualify(&self.default_bucket_name, &self.history_folder_path)
    }

    pub fn security_folder(&self) -> String {
        paths::qualify(&self.default_bucket_name, &self.security.file_path)
    }

    pub fn plan_delivery(&self) -> Delivery {
        Delivery::from_singleton_flag(self.process_plans_on_singleton)
    }

    pub fn action_delivery(&self) -> Delivery {
        Delivery::from_singleton_flag(self.process_actions_on_singleton)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = StoreConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg, StoreConfig::default());
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.plan_folder_path, "Plans");
        assert_eq!(cfg.history_folder_path, "History");
        assert_eq!(cfg.write_history_as, HistoryFormat::Yaml);
        assert_eq!(cfg.plan_delivery(), Delivery::Synchronous);
        assert_eq!(cfg.action_delivery(), Delivery::Asynchronous);
        assert_eq!(cfg.security.poll_interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn pascal_case_keys_parse() {
        let yaml = r#"
DefaultBucketName: synapse-prod
PlanFolderPath: plans/v2
WriteHistoryAs: CompressedJson
ProcessPlansOnSingleton: true
ProcessActionsOnSingleton: false
InstanceIds: TimeOrdered
InstanceNodeId: 7
Security:
  FilePath: s3://secure-bucket/acl
  IsRequired: true
  GlobalExternalGroupsCsv: " Everyone , Staff,,"
  PollIntervalMs: 0
"#;
        let cfg = StoreConfig::from_yaml_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.write_history_as, HistoryFormat::CompressedJson);
        assert_eq!(cfg.plan_delivery(), Delivery::Asynchronous);
        assert_eq!(cfg.action_delivery(), Delivery::Synchronous);
        assert_eq!(cfg.instance_ids, InstanceIdScheme::TimeOrdered);
        assert_eq!(cfg.instance_node_id, Some(7));
        assert!(cfg.security.is_required);
        assert_eq!(cfg.security.poll_interval(), None);
        assert_eq!(cfg.global_groups(), vec!["Everyone", "Staff"]);

        assert_eq!(cfg.plan_folder(), "synapse-prod/plans/v2");
        assert_eq!(cfg.history_folder(), "synapse-prod/History");
        assert_eq!(cfg.security_folder(), "s3://secure-bucket/acl");
    }

    #[test]
    fn unknown_history_format_is_rejected() {
        assert!(StoreConfig::from_yaml_str("WriteHistoryAs: Xml\n").is_err());
    }

    #[test]
    fn relative_paths_need_a_bucket() {
        let cfg = StoreConfig::default();
        assert!(matches!(cfg.validate(), Err(VaultError::Configuration(_))));

        let qualified = StoreConfig {
            plan_folder_path: "s3://b/Plans".into(),
            history_folder_path: "s3://b/History".into(),
            security: SecurityConfig {
                file_path: "s3://b/Security".into(),
                ..SecurityConfig::default()
            },
            ..StoreConfig::default()
        };
        qualified.validate().unwrap();
        assert_eq!(qualified.plan_folder(), "s3://b/Plans");
    }

    #[test]
    fn node_id_range_checked() {
        let cfg = StoreConfig {
            instance_node_id: Some(MAX_NODE_ID + 1),
            ..StoreConfig::new("b")
        };
        assert!(matches!(cfg.validate(), Err(VaultError::Configuration(_))));
    }

    #[test]
    fn credentials_need_both_keys() {
        let mut cfg = StoreConfig::new("b");
        assert!(cfg.credentials().is_none());

        cfg.aws_access_key = Some("AKIA".into());
        assert!(cfg.credentials().is_none());
        cfg.validate().unwrap();

        cfg.aws_secret_access_key = Some("hunter2".into());
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.access_key, "AKIA");
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn blank_keys_mean_ambient_credentials() {
        let both = StoreConfig::from_yaml_str(
            "DefaultBucketName: b\nAwsAccessKey: \"\"\nAwsSecretAccessKey: \"  \"\n",
        )
        .unwrap();
        both.validate().unwrap();
        assert!(both.credentials().is_none());

        let access_only = StoreConfig::from_yaml_str("DefaultBucketName: b\nAwsAccessKey: \"\"\n").unwrap();
        access_only.validate().unwrap();
        assert!(access_only.credentials().is_none());

        let blank_access = StoreConfig::from_yaml_str(
            "DefaultBucketName: b\nAwsAccessKey: \" \"\nAwsSecretAccessKey: hunter2\n",
        )
        .unwrap();
        blank_access.validate().unwrap();
        assert!(blank_access.credentials().is_none());
    }

    #[test]
    fn load_from_disk_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("planvault.yaml");
        let cfg = StoreConfig {
            write_history_as: HistoryFormat::FormattedJson,
            ..StoreConfig::new("bucket")
        };
        std::fs::write(&path, cfg.to_yaml().unwrap()).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), cfg);

        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            StoreConfig::load(&missing),
            Err(VaultError::Configuration(_))
        ));
    }
}
