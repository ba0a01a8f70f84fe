//! Test fixtures: fake workflow engine and catalog seeding

use super::constants::*;
use anyhow::Result;
use async_trait::async_trait;
use data_catalog_server::catalog_store::{
    Catalog, CatalogChanges, CatalogGuard, CatalogState, CatalogStore, FlowType, MountedResource,
    NewCatalog,
};
use data_catalog_server::download_grants::DOWNLOAD_AUDIT_TYPE;
use data_catalog_server::workflow::{AuditApply, AuditCancel, WorkflowEngine};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Workflow engine that records every outbound call instead of sending it.
#[derive(Default)]
pub struct RecordingEngine {
    applies: Mutex<Vec<AuditApply>>,
    cancels: Mutex<Vec<AuditCancel>>,
}

#[allow(dead_code)]
impl RecordingEngine {
    pub fn applies(&self) -> Vec<AuditApply> {
        self.applies.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<AuditCancel> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn last_apply_id(&self) -> String {
        self.applies
            .lock()
            .unwrap()
            .last()
            .map(|a| a.apply_id.clone())
            .expect("no audit was dispatched")
    }
}

#[async_trait]
impl WorkflowEngine for RecordingEngine {
    async fn apply(&self, apply: &AuditApply) -> Result<()> {
        self.applies.lock().unwrap().push(apply.clone());
        Ok(())
    }

    async fn cancel(&self, cancel: &AuditCancel) -> Result<()> {
        self.cancels.lock().unwrap().push(cancel.clone());
        Ok(())
    }
}

/// Bind every catalog audit type and the download audit type.
pub fn bind_audit_flows(store: &dyn CatalogStore) -> Result<()> {
    for flow in [
        FlowType::Publish,
        FlowType::Online,
        FlowType::Offline,
        FlowType::Change,
    ] {
        if let Some(audit_type) = flow.audit_type() {
            store.upsert_audit_flow_binding(audit_type, CATALOG_PROC_DEF)?;
        }
    }
    store.upsert_audit_flow_binding(DOWNLOAD_AUDIT_TYPE, DOWNLOAD_PROC_DEF)?;
    Ok(())
}

/// Draft catalog with one mounted table.
pub fn create_draft_catalog(store: &dyn CatalogStore, code: &str) -> Catalog {
    let catalog = store
        .create_catalog(&NewCatalog {
            code: code.to_string(),
            title: format!("Catalog {}", code),
            owner_id: OWNER_ID.to_string(),
            ..Default::default()
        })
        .expect("Failed to create catalog");
    store
        .add_mount(
            catalog.id,
            &MountedResource {
                resource_type: "table".to_string(),
                resource_id: format!("tbl-{}", catalog.id),
                name: code.replace('/', "_"),
            },
        )
        .expect("Failed to mount resource");
    catalog
}

/// Catalog forced straight to online, bypassing audits.
#[allow(dead_code)]
pub fn create_online_catalog(store: &dyn CatalogStore, code: &str) -> Catalog {
    let catalog = create_draft_catalog(store, code);
    store
        .update_catalog(
            &CatalogGuard::new(catalog.id),
            &CatalogChanges {
                state: Some(CatalogState::Online),
                touch: true,
                ..Default::default()
            },
        )
        .expect("Failed to bring catalog online");
    store
        .get_catalog(catalog.id)
        .expect("Failed to reload catalog")
        .expect("catalog vanished")
}

/// Poll `condition` until it holds or [`SETTLE_TIMEOUT_MS`] passes.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(SETTLE_TIMEOUT_MS) {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
