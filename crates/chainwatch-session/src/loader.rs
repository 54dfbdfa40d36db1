use crate::error::LookupError;
use crate::services::TopologyStore;
use chainwatch_core::{ChainSnapshot, GroupScope};
use std::sync::Arc;
use tracing::{debug, warn};

/// Assembles one consistent snapshot per call. Topologies outside the
/// session's scope are reported as not found.
#[derive(Clone)]
pub struct ChainLoader {
    store: Arc<dyn TopologyStore>,
    scope: GroupScope,
}

impl ChainLoader {
    pub fn new(store: Arc<dyn TopologyStore>, scope: GroupScope) -> Self {
        Self { store, scope }
    }

    pub async fn load_snapshot(&self, chain_id: &str) -> Result<ChainSnapshot, LookupError> {
        let topology = self.store.find_one(chain_id).await?;
        if topology.scope != self.scope {
            warn!(
                event = "chain_out_of_scope",
                chain_id,
                owner = %topology.scope,
                scope = %self.scope
            );
            return Err(LookupError::NotFound {
                chain_id: chain_id.to_string(),
            });
        }

        let (occupants, connections) = tokio::join!(
            self.store.find_occupants(&topology.id),
            self.store.find_connections(&topology.id)
        );
        let occupants = occupants.unwrap_or_else(|err| {
            warn!(event = "occupants_degraded", chain_id, topology_id = %topology.id, error = %err);
            Vec::new()
        });
        let connections = connections.unwrap_or_else(|err| {
            warn!(
                event = "connections_degraded",
                chain_id,
                topology_id = %topology.id,
                error = %err
            );
            Vec::new()
        });

        let snapshot = ChainSnapshot::assemble(topology, occupants, connections);
        debug!(
            event = "snapshot_assembled",
            chain_id,
            occupants = snapshot.occupants.len(),
            connections = snapshot.connections.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::InMemoryTopologyStore;
    use chainwatch_core::{ConnectionRecord, MassStatus, OccupantRecord, TimeStatus, TopologyRecord};

    fn topology(id: &str, chain_id: &str, scope: i64) -> TopologyRecord {
        TopologyRecord {
            id: id.to_string(),
            chain_id: chain_id.to_string(),
            name: format!("chain {chain_id}"),
            scope: GroupScope(scope),
            monitoring_enabled: true,
            updated_at: None,
        }
    }

    fn occupant(character_id: i64, present: bool) -> OccupantRecord {
        OccupantRecord {
            character_id,
            character_name: format!("pilot-{character_id}"),
            system_id: Some("J123450".to_string()),
            ship_type: Some("Tengu".to_string()),
            present,
            enrichment: None,
        }
    }

    fn seeded_store() -> Arc<InMemoryTopologyStore> {
        let store = Arc::new(InMemoryTopologyStore::new());
        store.insert_topology(topology("T1", "C1", 7));
        store.insert_occupant("T1", occupant(1, true));
        store.insert_occupant("T1", occupant(2, true));
        store.insert_occupant("T1", occupant(3, false));
        store.insert_connection(
            "T1",
            ConnectionRecord {
                id: "K1".to_string(),
                source_system: "J123450".to_string(),
                target_system: "Jita".to_string(),
                mass_status: MassStatus::Destabilized,
                time_status: TimeStatus::EndOfLife,
            },
        );
        store
    }

    #[tokio::test]
    async fn assembles_present_occupants_and_connections() {
        let loader = ChainLoader::new(seeded_store(), GroupScope(7));
        let snapshot = loader.load_snapshot("C1").await.expect("snapshot");

        assert_eq!(snapshot.chain_id(), "C1");
        assert_eq!(snapshot.topology.id, "T1");
        assert_eq!(snapshot.occupants.character_ids(), vec![1, 2]);
        assert_eq!(snapshot.connections.len(), 1);
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let loader = ChainLoader::new(seeded_store(), GroupScope(7));
        let err = loader.load_snapshot("C9").await.expect_err("missing chain");
        assert!(matches!(err, LookupError::NotFound { chain_id } if chain_id == "C9"));
    }

    #[tokio::test]
    async fn many_matches_is_ambiguous() {
        let store = seeded_store();
        store.insert_topology(topology("T1-dup", "C1", 7));
        let loader = ChainLoader::new(store, GroupScope(7));

        let err = loader.load_snapshot("C1").await.expect_err("ambiguous");
        assert!(matches!(err, LookupError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn other_scope_looks_like_not_found() {
        let loader = ChainLoader::new(seeded_store(), GroupScope(8));
        let err = loader.load_snapshot("C1").await.expect_err("out of scope");
        assert!(matches!(err, LookupError::NotFound { .. }));
    }

    #[tokio::test]
    async fn sub_collection_failures_degrade_to_empty() {
        let store = seeded_store();
        store.fail_connections(Some(StoreError::Unavailable("replica down".to_string())));
        let loader = ChainLoader::new(store.clone(), GroupScope(7));

        let snapshot = loader.load_snapshot("C1").await.expect("degraded snapshot");
        assert_eq!(snapshot.occupants.len(), 2);
        assert!(snapshot.connections.is_empty());

        store.fail_occupants(Some(StoreError::Query("timeout".to_string())));
        let snapshot = loader.load_snapshot("C1").await.expect("degraded snapshot");
        assert!(snapshot.occupants.is_empty());
        assert!(snapshot.connections.is_empty());
    }

    #[tokio::test]
    async fn topology_store_failure_is_an_error() {
        let store = seeded_store();
        store.fail_topologies(Some(StoreError::Unavailable("primary down".to_string())));
        let loader = ChainLoader::new(store, GroupScope(7));

        let err = loader.load_snapshot("C1").await.expect_err("store down");
        assert!(matches!(err, LookupError::Store(StoreError::Unavailable(_))));
    }
}
