use crate::error::{MonitorError, SessionError};
use crate::services::{MonitoringService, TopologyStore};
use chainwatch_core::{GroupScope, MonitoredChainRef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Starts and stops monitoring on the external service and reads back the
/// monitored chains visible to one scope.
#[derive(Clone)]
pub struct MonitorController {
    service: Arc<dyn MonitoringService>,
    store: Arc<dyn TopologyStore>,
}

impl MonitorController {
    pub fn new(service: Arc<dyn MonitoringService>, store: Arc<dyn TopologyStore>) -> Self {
        Self { service, store }
    }

    /// Already monitoring in the same scope counts as success.
    pub async fn start_monitoring(
        &self,
        chain_id: &str,
        scope: GroupScope,
    ) -> Result<(), MonitorError> {
        let owned = self.owned_topologies(chain_id, scope).await?;
        if owned == Ownership::Foreign {
            warn!(event = "monitor_start_out_of_scope", chain_id, scope = %scope);
            return Err(MonitorError::OutOfScope {
                chain_id: chain_id.to_string(),
                scope,
            });
        }
        match self.service.start(chain_id, scope).await {
            Ok(()) => {
                info!(event = "monitor_started", chain_id, scope = %scope);
                Ok(())
            }
            Err(MonitorError::AlreadyMonitored { owner, .. }) if owner == scope => {
                info!(event = "monitor_already_active", chain_id, scope = %scope);
                Ok(())
            }
            Err(err) => {
                warn!(event = "monitor_start_rejected", chain_id, error = %err);
                Err(err)
            }
        }
    }

    /// Not currently monitored counts as success. Chains held by another
    /// scope are refused before the service is contacted.
    pub async fn stop_monitoring(
        &self,
        chain_id: &str,
        scope: GroupScope,
    ) -> Result<(), MonitorError> {
        match self.owned_topologies(chain_id, scope).await? {
            Ownership::Foreign => {
                warn!(event = "monitor_stop_out_of_scope", chain_id, scope = %scope);
                return Err(MonitorError::OutOfScope {
                    chain_id: chain_id.to_string(),
                    scope,
                });
            }
            Ownership::Unknown | Ownership::Owned { monitoring: false } => {
                info!(event = "monitor_stop_noop", chain_id, scope = %scope);
                return Ok(());
            }
            Ownership::Owned { monitoring: true } => {}
        }
        match self.service.stop(chain_id).await {
            Ok(()) => {
                info!(event = "monitor_stopped", chain_id);
                Ok(())
            }
            Err(MonitorError::NotMonitored { .. }) => Ok(()),
            Err(err) => {
                warn!(event = "monitor_stop_rejected", chain_id, error = %err);
                Err(err)
            }
        }
    }

    pub async fn force_refresh(&self) {
        self.service.force_refresh().await;
        info!(event = "monitor_force_refresh");
    }

    pub async fn load_monitored(
        &self,
        scope: GroupScope,
    ) -> Result<Vec<MonitoredChainRef>, SessionError> {
        let records = self.store.find_chains(scope).await?;
        let mut seen = HashSet::new();
        let chains = records
            .iter()
            .filter(|record| record.scope == scope && record.monitoring_enabled)
            .map(MonitoredChainRef::from_topology)
            .filter(|chain| seen.insert((chain.chain_id.clone(), chain.scope)))
            .collect::<Vec<_>>();
        Ok(chains)
    }

    async fn owned_topologies(
        &self,
        chain_id: &str,
        scope: GroupScope,
    ) -> Result<Ownership, MonitorError> {
        let records = self.store.find_by_chain(chain_id).await?;
        if records.is_empty() {
            return Ok(Ownership::Unknown);
        }
        let mut owned = records.iter().filter(|record| record.scope == scope).peekable();
        if owned.peek().is_none() {
            return Ok(Ownership::Foreign);
        }
        let monitoring = owned.any(|record| record.monitoring_enabled);
        Ok(Ownership::Owned { monitoring })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Unknown,
    Foreign,
    Owned { monitoring: bool },
}
