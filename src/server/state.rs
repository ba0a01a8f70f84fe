use axum::extract::FromRef;

use crate::audit::AuditCoordinator;
use crate::download_grants::DownloadGrantCoordinator;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedAuditCoordinator = Arc<AuditCoordinator>;
pub type GuardedDownloadCoordinator = Arc<DownloadGrantCoordinator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub audit: GuardedAuditCoordinator,
    pub downloads: GuardedDownloadCoordinator,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        audit: GuardedAuditCoordinator,
        downloads: GuardedDownloadCoordinator,
        hash: String,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            audit,
            downloads,
            hash,
        }
    }
}

impl FromRef<ServerState> for GuardedAuditCoordinator {
    fn from_ref(input: &ServerState) -> Self {
        input.audit.clone()
    }
}

impl FromRef<ServerState> for GuardedDownloadCoordinator {
    fn from_ref(input: &ServerState) -> Self {
        input.downloads.clone()
    }
}
