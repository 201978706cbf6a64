use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous name '{name}' in {folder}: {count} case-insensitive matches")]
    Ambiguous {
        name: String,
        folder: String,
        count: usize,
    },

    #[error(
        "could not find action '{action}' (ParentInstanceId = {parent_instance_id}) \
         in {plan} instance {instance_id}"
    )]
    ActionNotFound {
        plan: String,
        instance_id: i64,
        action: String,
        parent_instance_id: i64,
    },

    #[error("access denied: '{identity}' lacks {right} on '{resource}'")]
    AccessDenied {
        identity: String,
        resource: String,
        right: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("update pipeline closed: {0}")]
    PipelineClosed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// Transport or backend failure, as opposed to a lookup or content problem.
    pub fn is_storage(&self) -> bool {
        matches!(self, VaultError::Storage(_) | VaultError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
