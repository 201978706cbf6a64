pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod fs_store;
pub mod ids;
pub mod paths;
pub mod pipeline;
pub mod resolver;
pub mod security;
pub mod status;
pub mod store;
pub mod types;
pub mod vault;

pub use config::StoreConfig;
pub use error::{Result, VaultError};
pub use fs_store::FsStore;
pub use security::{Identity, Right, RightKind};
pub use store::{MemoryStore, ObjectStore};
pub use types::{ActionItem, ExecuteResult, Plan, StatusType};
pub use vault::PlanVault;
