//! Reachability monitor reporting status to the asset manager.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use tripup_core::{StatusMonitor, SystemStatus};
use tripup_sync::AssetManager;

use crate::http::HttpAssetApi;

/// Probes the API health endpoint on every refresh and forwards the result.
///
/// The manager is attached after construction because the manager itself
/// needs the monitor to start.
pub struct ReachabilityMonitor {
    api: Arc<HttpAssetApi>,
    manager: OnceLock<AssetManager>,
}

impl ReachabilityMonitor {
    pub fn new(api: Arc<HttpAssetApi>) -> Self {
        Self {
            api,
            manager: OnceLock::new(),
        }
    }

    /// Deliver future status reports to `manager`.
    pub fn attach(&self, manager: AssetManager) {
        if self.manager.set(manager).is_err() {
            warn!("Reachability monitor already attached");
        }
    }

    /// Probe once and build a status snapshot.
    pub async fn probe(&self) -> SystemStatus {
        SystemStatus {
            network_available: self.api.health_check().await,
            ..SystemStatus::healthy()
        }
    }
}

impl StatusMonitor for ReachabilityMonitor {
    fn refresh(&self) {
        let Some(manager) = self.manager.get().cloned() else {
            debug!("Status refresh before manager attached");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Status refresh outside a runtime");
            return;
        };
        let api = self.api.clone();
        runtime.spawn(async move {
            let status = SystemStatus {
                network_available: api.health_check().await,
                ..SystemStatus::healthy()
            };
            debug!(network_available = status.network_available, "Reporting system status");
            if let Err(e) = manager.handle_status(status) {
                warn!(error = %e, "Failed to deliver system status");
            }
        });
    }
}
