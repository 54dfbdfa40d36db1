//! Seams to the backing services a session talks to. Every collaborator is
//! shared between sessions, so implementations must be `Send + Sync`.

use crate::error::{LookupError, MonitorError, StoreError, TransportError};
use async_trait::async_trait;
use chainwatch_core::{
    AnalysisResult, CharacterId, ConnectionRecord, GroupScope, InboundNotification,
    OccupantRecord, TopicPattern, TopologyRecord,
};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDelivery {
    pub topic: String,
    pub notification: InboundNotification,
}

/// A live binding to the bus. Delivery stops once this handle is dropped;
/// bus implementations watch `Sender::closed` on their side.
#[derive(Debug)]
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusDelivery>,
}

impl BusSubscription {
    pub fn new(receiver: mpsc::Receiver<BusDelivery>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<BusDelivery> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn subscribe(&self, pattern: &TopicPattern) -> Result<BusSubscription, TransportError>;
}

#[async_trait]
pub trait MonitoringService: Send + Sync {
    async fn start(&self, chain_id: &str, scope: GroupScope) -> Result<(), MonitorError>;
    async fn stop(&self, chain_id: &str) -> Result<(), MonitorError>;
    /// Fire-and-forget; any effect shows up later as bus notifications.
    async fn force_refresh(&self);
}

#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Monitoring-enabled topologies owned by `scope`.
    async fn find_chains(&self, scope: GroupScope) -> Result<Vec<TopologyRecord>, StoreError>;

    async fn find_by_chain(&self, chain_id: &str) -> Result<Vec<TopologyRecord>, StoreError>;

    /// Exactly one topology for `chain_id`, or `NotFound`/`Ambiguous`.
    async fn find_one(&self, chain_id: &str) -> Result<TopologyRecord, LookupError> {
        let mut records = self.find_by_chain(chain_id).await?;
        if records.len() > 1 {
            return Err(LookupError::Ambiguous {
                chain_id: chain_id.to_string(),
                count: records.len(),
            });
        }
        records.pop().ok_or_else(|| LookupError::NotFound {
            chain_id: chain_id.to_string(),
        })
    }

    /// Occupants of `topology_id` with `present = true`.
    async fn find_occupants(&self, topology_id: &str) -> Result<Vec<OccupantRecord>, StoreError>;

    async fn find_connections(&self, topology_id: &str)
        -> Result<Vec<ConnectionRecord>, StoreError>;
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, character_id: CharacterId) -> AnalysisResult;
}

#[derive(Clone)]
pub struct SessionServices {
    pub bus: Arc<dyn BroadcastBus>,
    pub monitoring: Arc<dyn MonitoringService>,
    pub store: Arc<dyn TopologyStore>,
    pub analysis: Arc<dyn AnalysisService>,
}
