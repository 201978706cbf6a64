use super::{UpdateItem, UpdateSink};
use crate::error::Result;
use crate::status::StatusStore;
use crate::types::{ActionItem, Plan};

/// Full plan snapshot headed for its history record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdateItem {
    pub plan: Plan,
    pub retry_attempts: u32,
}

impl PlanUpdateItem {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            retry_attempts: 0,
        }
    }
}

impl UpdateItem for PlanUpdateItem {
    fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    fn retry_attempts_mut(&mut self) -> &mut u32 {
        &mut self.retry_attempts
    }

    fn describe(&self) -> String {
        format!("{}_{}", self.plan.unique_name, self.plan.instance_id)
    }
}

/// One action's new state, applied into an existing instance record.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionUpdateItem {
    pub plan_unique_name: String,
    pub plan_instance_id: i64,
    pub action_item: ActionItem,
    pub retry_attempts: u32,
}

impl ActionUpdateItem {
    pub fn new(plan_unique_name: impl Into<String>, plan_instance_id: i64, action_item: ActionItem) -> Self {
        Self {
            plan_unique_name: plan_unique_name.into(),
            plan_instance_id,
            action_item,
            retry_attempts: 0,
        }
    }
}

impl UpdateItem for ActionUpdateItem {
    fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    fn retry_attempts_mut(&mut self) -> &mut u32 {
        &mut self.retry_attempts
    }

    fn describe(&self) -> String {
        format!(
            "{}_{}:{}@{}",
            self.plan_unique_name,
            self.plan_instance_id,
            self.action_item.name,
            self.action_item.parent_instance_id
        )
    }
}

impl UpdateSink<PlanUpdateItem> for StatusStore {
    fn apply(&self, item: &PlanUpdateItem) -> Result<()> {
        self.put_status(&item.plan)
    }
}

impl UpdateSink<ActionUpdateItem> for StatusStore {
    fn apply(&self, item: &ActionUpdateItem) -> Result<()> {
        self.apply_action_update(&item.plan_unique_name, item.plan_instance_id, &item.action_item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, HistoryFormat};
    use crate::error::VaultError;
    use crate::pipeline::{Delivery, UpdatePipeline};
    use crate::resolver::PathResolver;
    use crate::store::MemoryStore;
    use crate::types::StatusType;
    use std::sync::Arc;

    fn status_store() -> Arc<StatusStore> {
        Arc::new(StatusStore::new(
            PathResolver::new(Arc::new(MemoryStore::new())),
            "bucket/History",
            Codec::new(HistoryFormat::Yaml),
        ))
    }

    fn instance() -> Plan {
        let mut plan = Plan::new("sample");
        plan.instance_id = 11;
        plan.actions.push(ActionItem::new("step", 0));
        plan
    }

    #[test]
    fn describe_labels() {
        assert_eq!(PlanUpdateItem::new(instance()).describe(), "sample_11");
        let item = ActionUpdateItem::new("sample", 11, ActionItem::new("step", 3));
        assert_eq!(item.describe(), "sample_11:step@3");
    }

    #[test]
    fn status_store_is_a_sink_for_both_kinds() {
        let store = status_store();
        let plans = UpdatePipeline::<PlanUpdateItem>::new("plans", store.clone(), Delivery::Synchronous).unwrap();
        let actions =
            UpdatePipeline::<ActionUpdateItem>::new("actions", store.clone(), Delivery::Synchronous).unwrap();

        plans.submit(PlanUpdateItem::new(instance())).unwrap();
        actions
            .submit(ActionUpdateItem::new(
                "sample",
                11,
                ActionItem::new("step", 0).with_status(StatusType::Running),
            ))
            .unwrap();

        let stored = store.get_status("sample", 11).unwrap();
        assert_eq!(stored.actions[0].result.status, StatusType::Running);

        let missing = actions.submit(ActionUpdateItem::new("sample", 11, ActionItem::new("ghost", 0)));
        assert!(matches!(missing, Err(VaultError::ActionNotFound { .. })));
    }

    #[tokio::test]
    async fn out_of_order_action_update_ends_fatal() {
        let store = status_store();
        let actions =
            UpdatePipeline::<ActionUpdateItem>::new("actions", store.clone(), Delivery::Asynchronous).unwrap();
        // no instance record yet: every attempt fails with NotFound
        actions
            .submit(ActionUpdateItem::new("sample", 11, ActionItem::new("step", 0)))
            .unwrap();
        actions.wait_idle().await;

        let fatal = actions.drain_fatal();
        assert_eq!(fatal.len(), 1);
        assert!(matches!(fatal[0].error, VaultError::NotFound(_)));
        assert_eq!(fatal[0].item.retry_attempts, 5);
    }
}
