//! Index reconcile background job.
//!
//! Republishes catalogs whose index delivery was never acknowledged. Runs
//! once at startup and then on a fixed interval, so messages lost in the
//! outbox or at the sink converge eventually.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use std::time::Duration;
use tracing::info;

pub struct IndexReconcileJob {
    interval: Duration,
}

impl IndexReconcileJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for IndexReconcileJob {
    fn id(&self) -> &'static str {
        "index_reconcile"
    }

    fn name(&self) -> &'static str {
        "Index Reconcile"
    }

    fn description(&self) -> &'static str {
        "Republish online catalogs whose index delivery was never acknowledged"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .runtime
            .block_on(ctx.index.reconcile_unindexed())
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if report.found > 0 {
            info!(
                "Reconciled {} unindexed catalog(s), {} republished",
                report.found, report.published
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{
        CatalogChanges, CatalogGuard, CatalogState, CatalogStore, MountedResource, NewCatalog,
        SqliteCatalogStore,
    };
    use crate::index_sync::{IndexSyncPublisher, IndexSyncSettings, StoreEnricher};
    use crate::test_support::job_context;
    use std::sync::Arc;

    #[test]
    fn runs_at_startup_and_on_interval() {
        let job = IndexReconcileJob::new(Duration::from_secs(300));
        let schedule = job.schedule();
        assert_eq!(schedule.interval(), Some(Duration::from_secs(300)));
        assert!(schedule.listens_to(HookEvent::OnStartup));
    }

    #[test]
    fn execute_republishes_unindexed_catalogs() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let catalog = store
            .create_catalog(&NewCatalog {
                code: "ops/tickets".to_string(),
                title: "Tickets".to_string(),
                owner_id: "o".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .update_catalog(
                &CatalogGuard::new(catalog.id),
                &CatalogChanges {
                    state: Some(CatalogState::Online),
                    touch: true,
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .add_mount(
                catalog.id,
                &MountedResource {
                    resource_type: "api".to_string(),
                    resource_id: "a-1".to_string(),
                    name: "tickets".to_string(),
                },
            )
            .unwrap();

        let enricher = Arc::new(StoreEnricher::new(store.clone()));
        let (publisher, mut outbox) =
            IndexSyncPublisher::new(store.clone(), enricher, IndexSyncSettings::default());
        let ctx = job_context(store, Arc::new(publisher), runtime.handle().clone());

        IndexReconcileJob::new(Duration::from_secs(60))
            .execute(&ctx)
            .unwrap();
        let message = outbox.try_recv().unwrap();
        assert_eq!(message.doc_id, "ops-tickets");
    }
}
