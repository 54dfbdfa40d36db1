use chainwatch_core::GroupScope;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("monitoring service rejected chain {chain_id}: {reason}")]
    Rejected { chain_id: String, reason: String },
    #[error("chain {chain_id} is already monitored by scope {owner}")]
    AlreadyMonitored { chain_id: String, owner: GroupScope },
    #[error("chain {chain_id} is not monitored")]
    NotMonitored { chain_id: String },
    #[error("chain {chain_id} is not owned by scope {scope}")]
    OutOfScope { chain_id: String, scope: GroupScope },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("topology store unavailable: {0}")]
    Unavailable(String),
    #[error("topology store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("chain not found: {chain_id}")]
    NotFound { chain_id: String },
    #[error("chain lookup for {chain_id} matched {count} topologies")]
    Ambiguous { chain_id: String, count: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("identity {user_id} carries no group scope and no fallback scope is configured")]
    MissingScope { user_id: String },
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Text shown to the user in the view model's status line.
    pub fn status_message(&self) -> String {
        match self {
            SessionError::Lookup(LookupError::NotFound { .. }) => "chain not found".to_string(),
            SessionError::Lookup(LookupError::Ambiguous { count, .. }) => {
                format!("chain lookup ambiguous ({count} matches)")
            }
            SessionError::Monitor(MonitorError::AlreadyMonitored { chain_id, .. }) => {
                format!("chain {chain_id} is monitored by another group")
            }
            SessionError::Monitor(MonitorError::OutOfScope { chain_id, .. }) => {
                format!("chain {chain_id} belongs to another group")
            }
            SessionError::MissingScope { .. } => "no group scope available".to_string(),
            other => other.to_string(),
        }
    }
}
