//! Shared contracts for chainwatch: the chain-intelligence data model, change
//! notifications and topic patterns.

pub mod intel;

pub use intel::{
    chain_topic, AnalysisOutcome, AnalysisResult, ChainNotification, ChainSnapshot, CharacterId,
    ConnectionRecord, EnrichmentRequest, GroupScope, Identity, InboundNotification, MassStatus,
    MonitoredChainRef, OccupantRecord, Occupants, ThreatLevel, TimeStatus, TopicPattern,
    TopicPatternError, TopologyRecord,
};
