//! In-process implementations of the session's collaborators. Used by tests
//! and by single-process deployments that have no external monitoring stack.

use crate::error::{MonitorError, StoreError, TransportError};
use crate::services::{
    AnalysisService, BroadcastBus, BusDelivery, BusSubscription, MonitoringService, TopologyStore,
};
use async_trait::async_trait;
use chainwatch_core::{
    AnalysisResult, ChainNotification, CharacterId, ConnectionRecord, GroupScope,
    InboundNotification, OccupantRecord, TopicPattern, TopologyRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Topic-filtered fan-out over a tokio broadcast channel.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<BusDelivery>,
    available: Arc<AtomicBool>,
    generation: Arc<watch::Sender<u64>>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (generation, _) = watch::channel(0);
        Self {
            tx,
            available: Arc::new(AtomicBool::new(true)),
            generation: Arc::new(generation),
        }
    }

    /// While unavailable, new subscriptions fail. Existing ones keep running.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Ends every live subscription as if the bus connection dropped.
    pub fn disconnect_subscribers(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Returns how many subscriptions received the notification's topic.
    pub fn publish(&self, notification: &ChainNotification) -> usize {
        self.publish_raw(notification.topic(), notification.clone().into())
    }

    pub fn publish_raw(
        &self,
        topic: impl Into<String>,
        notification: InboundNotification,
    ) -> usize {
        let delivery = BusDelivery {
            topic: topic.into(),
            notification,
        };
        self.tx.send(delivery).unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BroadcastBus for InMemoryBus {
    async fn subscribe(&self, pattern: &TopicPattern) -> Result<BusSubscription, TransportError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::new("in-memory bus unavailable"));
        }
        let mut rx = self.tx.subscribe();
        let mut generation = self.generation.subscribe();
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let filter = pattern.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = out_tx.closed() => break,
                    _ = generation.changed() => break,
                    received = rx.recv() => match received {
                        Ok(delivery) => {
                            if !filter.matches(&delivery.topic) {
                                continue;
                            }
                            if out_tx.send(delivery).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(event = "bus_subscriber_lagged", pattern = %filter, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(event = "bus_subscription_released", pattern = %filter);
        });

        Ok(BusSubscription::new(out_rx))
    }
}

#[derive(Default)]
struct StoreState {
    topologies: Vec<TopologyRecord>,
    occupants: HashMap<String, Vec<OccupantRecord>>,
    connections: HashMap<String, Vec<ConnectionRecord>>,
    fail_topologies: Option<StoreError>,
    fail_occupants: Option<StoreError>,
    fail_connections: Option<StoreError>,
}

/// Topology records keyed by topology id, with injectable failures per query.
#[derive(Default)]
pub struct InMemoryTopologyStore {
    state: Mutex<StoreState>,
}

impl InMemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_topology(&self, record: TopologyRecord) {
        lock(&self.state).topologies.push(record);
    }

    /// Removes every topology of `chain_id` together with its occupants and
    /// connections.
    pub fn remove_topology(&self, chain_id: &str) {
        let mut state = lock(&self.state);
        let removed = state
            .topologies
            .iter()
            .filter(|record| record.chain_id == chain_id)
            .map(|record| record.id.clone())
            .collect::<Vec<_>>();
        state.topologies.retain(|record| record.chain_id != chain_id);
        for topology_id in removed {
            state.occupants.remove(&topology_id);
            state.connections.remove(&topology_id);
        }
    }

    pub fn set_monitoring(&self, chain_id: &str, enabled: bool) {
        let mut state = lock(&self.state);
        for record in state
            .topologies
            .iter_mut()
            .filter(|record| record.chain_id == chain_id)
        {
            record.monitoring_enabled = enabled;
        }
    }

    pub fn topologies_for(&self, chain_id: &str) -> Vec<TopologyRecord> {
        lock(&self.state)
            .topologies
            .iter()
            .filter(|record| record.chain_id == chain_id)
            .cloned()
            .collect()
    }

    /// Replaces an existing record for the same character.
    pub fn insert_occupant(&self, topology_id: &str, record: OccupantRecord) {
        let mut state = lock(&self.state);
        let entries = state.occupants.entry(topology_id.to_string()).or_default();
        match entries
            .iter_mut()
            .find(|entry| entry.character_id == record.character_id)
        {
            Some(entry) => *entry = record,
            None => entries.push(record),
        }
    }

    pub fn set_occupant_presence(
        &self,
        topology_id: &str,
        character_id: CharacterId,
        present: bool,
    ) {
        let mut state = lock(&self.state);
        if let Some(entries) = state.occupants.get_mut(topology_id) {
            for entry in entries
                .iter_mut()
                .filter(|entry| entry.character_id == character_id)
            {
                entry.present = present;
            }
        }
    }

    pub fn insert_connection(&self, topology_id: &str, record: ConnectionRecord) {
        lock(&self.state)
            .connections
            .entry(topology_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn fail_topologies(&self, error: Option<StoreError>) {
        lock(&self.state).fail_topologies = error;
    }

    pub fn fail_occupants(&self, error: Option<StoreError>) {
        lock(&self.state).fail_occupants = error;
    }

    pub fn fail_connections(&self, error: Option<StoreError>) {
        lock(&self.state).fail_connections = error;
    }
}

#[async_trait]
impl TopologyStore for InMemoryTopologyStore {
    async fn find_chains(&self, scope: GroupScope) -> Result<Vec<TopologyRecord>, StoreError> {
        let state = lock(&self.state);
        if let Some(err) = &state.fail_topologies {
            return Err(err.clone());
        }
        Ok(state
            .topologies
            .iter()
            .filter(|record| record.scope == scope && record.monitoring_enabled)
            .cloned()
            .collect())
    }

    async fn find_by_chain(&self, chain_id: &str) -> Result<Vec<TopologyRecord>, StoreError> {
        let state = lock(&self.state);
        if let Some(err) = &state.fail_topologies {
            return Err(err.clone());
        }
        Ok(state
            .topologies
            .iter()
            .filter(|record| record.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn find_occupants(&self, topology_id: &str) -> Result<Vec<OccupantRecord>, StoreError> {
        let state = lock(&self.state);
        if let Some(err) = &state.fail_occupants {
            return Err(err.clone());
        }
        Ok(state
            .occupants
            .get(topology_id)
            .map(|entries| entries.iter().filter(|entry| entry.present).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_connections(
        &self,
        topology_id: &str,
    ) -> Result<Vec<ConnectionRecord>, StoreError> {
        let state = lock(&self.state);
        if let Some(err) = &state.fail_connections {
            return Err(err.clone());
        }
        Ok(state
            .connections
            .get(topology_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Tracks chain ownership per scope and mirrors it into the topology store's
/// `monitoring_enabled` flag. Publishes `topology_changed` when a bus is set.
pub struct InMemoryMonitoringService {
    store: Arc<InMemoryTopologyStore>,
    bus: Option<InMemoryBus>,
    owners: Mutex<HashMap<String, GroupScope>>,
    refreshes: AtomicU64,
}

impl InMemoryMonitoringService {
    pub fn new(store: Arc<InMemoryTopologyStore>) -> Self {
        Self {
            store,
            bus: None,
            owners: Mutex::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn with_bus(mut self, bus: InMemoryBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn announce(&self, chain_id: &str) {
        if let Some(bus) = &self.bus {
            bus.publish(&ChainNotification::TopologyChanged {
                chain_id: chain_id.to_string(),
            });
        }
    }
}

#[async_trait]
impl MonitoringService for InMemoryMonitoringService {
    async fn start(&self, chain_id: &str, scope: GroupScope) -> Result<(), MonitorError> {
        {
            let mut owners = lock(&self.owners);
            if let Some(owner) = owners.get(chain_id) {
                return Err(MonitorError::AlreadyMonitored {
                    chain_id: chain_id.to_string(),
                    owner: *owner,
                });
            }
            let topologies = self.store.topologies_for(chain_id);
            if topologies.is_empty() {
                return Err(MonitorError::Rejected {
                    chain_id: chain_id.to_string(),
                    reason: "unknown chain".to_string(),
                });
            }
            if topologies.iter().all(|record| record.scope != scope) {
                return Err(MonitorError::Rejected {
                    chain_id: chain_id.to_string(),
                    reason: format!("chain is not visible to scope {scope}"),
                });
            }
            owners.insert(chain_id.to_string(), scope);
        }
        self.store.set_monitoring(chain_id, true);
        self.announce(chain_id);
        Ok(())
    }

    async fn stop(&self, chain_id: &str) -> Result<(), MonitorError> {
        if lock(&self.owners).remove(chain_id).is_none() {
            return Err(MonitorError::NotMonitored {
                chain_id: chain_id.to_string(),
            });
        }
        self.store.set_monitoring(chain_id, false);
        self.announce(chain_id);
        Ok(())
    }

    async fn force_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let owned = lock(&self.owners).keys().cloned().collect::<Vec<_>>();
        for chain_id in owned {
            self.announce(&chain_id);
        }
    }
}

/// Canned analysis results per character, optionally delayed.
#[derive(Default)]
pub struct StaticAnalysisService {
    results: Mutex<HashMap<CharacterId, AnalysisResult>>,
    delays: Mutex<HashMap<CharacterId, Duration>>,
    default_delay: Duration,
    calls: AtomicU64,
}

impl StaticAnalysisService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn set_result(&self, result: AnalysisResult) {
        lock(&self.results).insert(result.character_id, result);
    }

    pub fn set_delay_for(&self, character_id: CharacterId, delay: Duration) {
        lock(&self.delays).insert(character_id, delay);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for StaticAnalysisService {
    async fn analyze(&self, character_id: CharacterId) -> AnalysisResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = lock(&self.delays)
            .get(&character_id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.results)
            .get(&character_id)
            .cloned()
            .unwrap_or_else(|| AnalysisResult::failed(character_id, "no intel available"))
    }
}
