//! The persistence core as one configured service.
//!
//! [`PlanVault::configure`] builds the catalog, the status store, both update
//! pipelines and the security gate from a [`StoreConfig`]. Access checks are
//! exposed but not wired into catalog or status calls; the orchestrator
//! decides which operations to protect.

use crate::catalog::PlanCatalog;
use crate::codec::Codec;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::ids::{InstanceIdScheme, InstanceIdSource, ProcessCounter, TimeOrderedIds};
use crate::pipeline::{ActionUpdateItem, PlanUpdateItem, UpdatePipeline};
use crate::resolver::PathResolver;
use crate::security::{Identity, PolicyLoader, PollerHandle, Right, RightKind, SecurityGate};
use crate::status::StatusStore;
use crate::store::ObjectStore;
use crate::types::{ActionItem, Plan};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PlanVault {
    config: StoreConfig,
    catalog: PlanCatalog,
    status: Arc<StatusStore>,
    plan_updates: UpdatePipeline<PlanUpdateItem>,
    action_updates: UpdatePipeline<ActionUpdateItem>,
    gate: Arc<SecurityGate>,
    poller: Option<PollerHandle>,
}

fn id_source(config: &StoreConfig) -> Arc<dyn InstanceIdSource> {
    match config.instance_ids {
        InstanceIdScheme::ProcessCounter => Arc::new(ProcessCounter::new()),
        InstanceIdScheme::TimeOrdered => match config.instance_node_id {
            Some(node) => Arc::new(TimeOrderedIds::new(node)),
            None => Arc::new(TimeOrderedIds::with_random_node()),
        },
    }
}

impl PlanVault {
    /// Validate `config` and bring every component up.
    ///
    /// Fails with `Configuration` when security is required but no policy
    /// file exists, or when asynchronous delivery is selected outside a
    /// Tokio runtime. Nothing is created in the store on failure.
    pub fn configure(
        store: Arc<dyn ObjectStore>,
        config: &StoreConfig,
        loader: Arc<dyn PolicyLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let resolver = PathResolver::new(store);
        let plan_folder = config.plan_folder();
        let history_folder = config.history_folder();

        let gate = Arc::new(SecurityGate::open(
            resolver.clone(),
            config.security_folder(),
            loader,
            config.global_groups(),
            config.security.is_required,
        )?);

        let status = Arc::new(StatusStore::new(
            resolver.clone(),
            history_folder.clone(),
            Codec::new(config.write_history_as),
        ));
        let plan_updates =
            UpdatePipeline::<PlanUpdateItem>::new("plan-updates", status.clone(), config.plan_delivery())?;
        let action_updates =
            UpdatePipeline::<ActionUpdateItem>::new("action-updates", status.clone(), config.action_delivery())?;

        resolver.ensure_folder(&plan_folder)?;
        resolver.ensure_folder(&history_folder)?;

        let catalog = PlanCatalog::new(resolver, plan_folder, id_source(config));

        let poller = match config.security.poll_interval() {
            Some(every) if gate.is_loaded() => {
                let poller = gate.spawn_poller(every);
                if poller.is_none() {
                    warn!(
                        folder = %gate.folder(),
                        "no Tokio runtime; security policy will not hot-reload"
                    );
                }
                poller
            }
            _ => None,
        };

        let vault = Self {
            config: config.clone(),
            catalog,
            status,
            plan_updates,
            action_updates,
            gate,
            poller,
        };
        info!(
            plans = %vault.catalog.folder(),
            history = %vault.status.folder(),
            security_loaded = vault.gate.is_loaded(),
            polling = vault.poller.is_some(),
            "plan vault configured"
        );
        Ok(vault)
    }

    /// Resolved settings for diagnostics. Informational only.
    pub fn describe(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("Region".into(), self.config.region.clone());
        out.insert("DefaultBucketName".into(), self.config.default_bucket_name.clone());
        out.insert("PlanFolderPath".into(), self.catalog.folder().to_string());
        out.insert("HistoryFolderPath".into(), self.status.folder().to_string());
        out.insert("SecurityFolderPath".into(), self.gate.folder().to_string());
        out.insert("SecurityIsRequired".into(), self.config.security.is_required.to_string());
        out.insert("SecurityLoaded".into(), self.gate.is_loaded().to_string());
        out.insert("SecurityPolling".into(), self.poller.is_some().to_string());
        out.insert("WriteHistoryAs".into(), self.status.codec().format().to_string());
        out.insert("PlanDelivery".into(), format!("{:?}", self.plan_updates.delivery()));
        out.insert("ActionDelivery".into(), format!("{:?}", self.action_updates.delivery()));
        out.insert("InstanceIds".into(), format!("{:?}", self.config.instance_ids));
        out
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Access checks
    // -----------------------------------------------------------------------

    /// `FileSystem/Execute` on `plan_unique_name`. Errors count as deny.
    pub fn has_access(&self, identity: &Identity, plan_unique_name: &str) -> bool {
        self.gate.authorize(identity, plan_unique_name, &Right::execute())
    }

    pub fn has_access_for(&self, identity: &Identity, plan_unique_name: &str, kind: RightKind, right: &str) -> bool {
        self.gate.authorize(identity, plan_unique_name, &Right::new(kind, right))
    }

    pub fn has_access_or_fail(&self, identity: &Identity, plan_unique_name: &str) -> Result<()> {
        self.gate.authorize_or_fail(identity, plan_unique_name, &Right::execute())
    }

    pub fn has_access_for_or_fail(
        &self,
        identity: &Identity,
        plan_unique_name: &str,
        kind: RightKind,
        right: &str,
    ) -> Result<()> {
        self.gate
            .authorize_or_fail(identity, plan_unique_name, &Right::new(kind, right))
    }

    // -----------------------------------------------------------------------
    // Catalog / history
    // -----------------------------------------------------------------------

    pub fn plan_list(&self, filter: Option<&str>, is_regex: bool) -> Result<Vec<String>> {
        self.catalog.list_plans(filter, is_regex)
    }

    pub fn get_plan(&self, unique_name: &str) -> Result<Plan> {
        self.catalog.get_plan(unique_name)
    }

    pub fn create_instance(&self, unique_name: &str) -> Result<Plan> {
        self.catalog.create_instance(unique_name)
    }

    pub fn instance_ids(&self, unique_name: &str) -> Result<Vec<i64>> {
        self.status.instance_ids(unique_name)
    }

    pub fn get_status(&self, unique_name: &str, instance_id: i64) -> Result<Plan> {
        self.status.get_status(unique_name, instance_id)
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Persist a full instance snapshot through the plan pipeline.
    pub fn update_plan_status(&self, plan: &Plan) -> Result<()> {
        debug!(plan = %plan.unique_name, instance_id = plan.instance_id, "plan status update");
        self.plan_updates.submit(PlanUpdateItem::new(plan.clone()))
    }

    /// Apply one action's state to a stored instance through the action
    /// pipeline.
    pub fn update_action_status(
        &self,
        plan_unique_name: &str,
        plan_instance_id: i64,
        action: &ActionItem,
    ) -> Result<()> {
        debug!(
            plan = %plan_unique_name,
            instance_id = plan_instance_id,
            action = %action.name,
            "action status update"
        );
        self.action_updates
            .submit(ActionUpdateItem::new(plan_unique_name, plan_instance_id, action.clone()))
    }

    pub fn plan_updates(&self) -> &UpdatePipeline<PlanUpdateItem> {
        &self.plan_updates
    }

    pub fn action_updates(&self) -> &UpdatePipeline<ActionUpdateItem> {
        &self.action_updates
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    /// Stop polling and flush both pipelines.
    pub async fn shutdown(self) {
        if let Some(poller) = &self.poller {
            poller.cancel();
        }
        self.plan_updates.shutdown().await;
        self.action_updates.shutdown().await;
        info!("plan vault shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
