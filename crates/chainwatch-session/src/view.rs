use chainwatch_core::{
    ChainSnapshot, GroupScope, Identity, MonitoredChainRef, OccupantRecord, TopicPattern,
};
use serde::Serialize;

/// Everything a session shows its user. Only the owning session writes to it;
/// callers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    identity: Identity,
    scope: GroupScope,
    topic_pattern: TopicPattern,
    monitored: Vec<MonitoredChainRef>,
    selected_chain_id: Option<String>,
    snapshot: Option<ChainSnapshot>,
    last_error: Option<String>,
    #[serde(skip)]
    error_from_reload: bool,
    status: Option<String>,
}

impl ViewModel {
    pub fn new(identity: Identity, scope: GroupScope, topic_pattern: TopicPattern) -> Self {
        Self {
            identity,
            scope,
            topic_pattern,
            monitored: Vec::new(),
            selected_chain_id: None,
            snapshot: None,
            last_error: None,
            error_from_reload: false,
            status: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn scope(&self) -> GroupScope {
        self.scope
    }

    pub fn topic_pattern(&self) -> &TopicPattern {
        &self.topic_pattern
    }

    pub fn monitored(&self) -> &[MonitoredChainRef] {
        &self.monitored
    }

    pub fn selected_chain_id(&self) -> Option<&str> {
        self.selected_chain_id.as_deref()
    }

    pub fn is_selected(&self, chain_id: &str) -> bool {
        self.selected_chain_id.as_deref() == Some(chain_id)
    }

    pub fn snapshot(&self) -> Option<&ChainSnapshot> {
        self.snapshot.as_ref()
    }

    /// Occupants of the current snapshot; empty when nothing is loaded.
    pub fn occupants(&self) -> impl Iterator<Item = &OccupantRecord> {
        self.snapshot
            .iter()
            .flat_map(|snapshot| snapshot.occupants.iter())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub(crate) fn snapshot_mut(&mut self) -> Option<&mut ChainSnapshot> {
        self.snapshot.as_mut()
    }

    pub(crate) fn set_monitored(&mut self, monitored: Vec<MonitoredChainRef>) {
        self.monitored = monitored;
    }

    /// Switching to another chain drops the old snapshot before anything is
    /// loaded for the new one.
    pub(crate) fn select(&mut self, chain_id: &str) {
        if !self.is_selected(chain_id) {
            self.snapshot = None;
        }
        self.selected_chain_id = Some(chain_id.to_string());
    }

    pub(crate) fn clear_selection(&mut self) {
        self.selected_chain_id = None;
        self.snapshot = None;
    }

    /// Replaces the snapshot wholesale if it belongs to the selected chain.
    pub(crate) fn commit_snapshot(&mut self, snapshot: ChainSnapshot) -> bool {
        if !self.is_selected(snapshot.chain_id()) {
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }

    /// Drops a snapshot that no longer matches the selection.
    pub(crate) fn discard_foreign_snapshot(&mut self) {
        let foreign = self
            .snapshot
            .as_ref()
            .map(|snapshot| !self.is_selected(snapshot.chain_id()))
            .unwrap_or(false);
        if foreign {
            self.snapshot = None;
        }
    }

    pub(crate) fn clear_snapshot(&mut self) {
        self.snapshot = None;
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.error_from_reload = false;
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
        self.error_from_reload = false;
    }

    /// An error a later successful reload of the selected chain may clear.
    pub(crate) fn set_reload_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.error_from_reload = true;
    }

    /// Leaves errors from commands or the subscription in place.
    pub(crate) fn clear_reload_error(&mut self) {
        if self.error_from_reload {
            self.clear_error();
        }
    }

    pub(crate) fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
    }
}
