use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const CHAIN_TOPIC_PREFIX: &str = "chain_intel";

pub type CharacterId = i64;

pub fn chain_topic(chain_id: &str) -> String {
    format!("{CHAIN_TOPIC_PREFIX}:{chain_id}")
}

/// Group-level authorization boundary. Chains are only visible inside their scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GroupScope(pub i64);

impl fmt::Display for GroupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupScope {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .trim()
            .parse::<i64>()
            .map(GroupScope)
            .map_err(|err| format!("invalid group scope '{input}': {err}"))
    }
}

/// Already-authenticated identity handed to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub group_scope: Option<GroupScope>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, group_scope: Option<GroupScope>) -> Self {
        Self {
            user_id: user_id.into(),
            group_scope,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoredChainRef {
    pub chain_id: String,
    pub scope: GroupScope,
    pub monitoring_enabled: bool,
}

impl MonitoredChainRef {
    pub fn from_topology(record: &TopologyRecord) -> Self {
        Self {
            chain_id: record.chain_id.clone(),
            scope: record.scope,
            monitoring_enabled: record.monitoring_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyRecord {
    pub id: String,
    pub chain_id: String,
    pub name: String,
    pub scope: GroupScope,
    #[serde(default)]
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OccupantRecord {
    pub character_id: CharacterId,
    pub character_name: String,
    #[serde(default)]
    pub system_id: Option<String>,
    #[serde(default)]
    pub ship_type: Option<String>,
    pub present: bool,
    #[serde(default)]
    pub enrichment: Option<AnalysisResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MassStatus {
    #[default]
    Stable,
    Destabilized,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeStatus {
    #[default]
    Stable,
    EndOfLife,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: String,
    pub source_system: String,
    pub target_system: String,
    #[serde(default)]
    pub mass_status: MassStatus,
    #[serde(default)]
    pub time_status: TimeStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Moderate => "moderate",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "low" => Ok(ThreatLevel::Low),
            "moderate" | "medium" => Ok(ThreatLevel::Moderate),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            other => Err(format!("Unknown threat level: {other}")),
        }
    }
}

/// Outcome of an analysis run. Failures are ordinary results, not a separate event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Assessed {
        threat: ThreatLevel,
        score_bps: u16,
        #[serde(default)]
        notes: Vec<String>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub character_id: CharacterId,
    pub outcome: AnalysisOutcome,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn assessed(character_id: CharacterId, threat: ThreatLevel, score_bps: u16) -> Self {
        Self {
            character_id,
            outcome: AnalysisOutcome::Assessed {
                threat,
                score_bps,
                notes: Vec::new(),
            },
            analyzed_at: Utc::now(),
        }
    }

    pub fn failed(character_id: CharacterId, reason: impl Into<String>) -> Self {
        Self {
            character_id,
            outcome: AnalysisOutcome::Failed {
                reason: reason.into(),
            },
            analyzed_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::Failed { .. })
    }

    pub fn threat(&self) -> Option<ThreatLevel> {
        match &self.outcome {
            AnalysisOutcome::Assessed { threat, .. } => Some(*threat),
            AnalysisOutcome::Failed { .. } => None,
        }
    }
}

/// Correlates an in-flight analysis with the character it was dispatched for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub request_id: String,
    pub character_id: CharacterId,
    pub dispatched_at: DateTime<Utc>,
}

impl EnrichmentRequest {
    pub fn new(character_id: CharacterId) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            character_id,
            dispatched_at: Utc::now(),
        }
    }
}

/// Occupants of a snapshot in store order, keyed by character id.
///
/// Construction keeps the first record for a repeated character id. Keyed
/// updates never reorder or touch other entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<OccupantRecord>", into = "Vec<OccupantRecord>")]
pub struct Occupants {
    entries: Vec<OccupantRecord>,
    index: HashMap<CharacterId, usize>,
}

impl Occupants {
    pub fn from_records(records: impl IntoIterator<Item = OccupantRecord>) -> Self {
        let mut occupants = Self::default();
        for record in records {
            if occupants.index.contains_key(&record.character_id) {
                continue;
            }
            occupants
                .index
                .insert(record.character_id, occupants.entries.len());
            occupants.entries.push(record);
        }
        occupants
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, character_id: CharacterId) -> bool {
        self.index.contains_key(&character_id)
    }

    pub fn get(&self, character_id: CharacterId) -> Option<&OccupantRecord> {
        self.index
            .get(&character_id)
            .and_then(|idx| self.entries.get(*idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OccupantRecord> {
        self.entries.iter()
    }

    pub fn character_ids(&self) -> Vec<CharacterId> {
        self.entries.iter().map(|entry| entry.character_id).collect()
    }

    /// Attaches `result` to the occupant it was computed for. Returns false and
    /// leaves every entry untouched when no such occupant exists.
    pub fn attach_enrichment(&mut self, result: AnalysisResult) -> bool {
        let Some(idx) = self.index.get(&result.character_id).copied() else {
            return false;
        };
        match self.entries.get_mut(idx) {
            Some(entry) => {
                entry.enrichment = Some(result);
                true
            }
            None => false,
        }
    }
}

impl From<Vec<OccupantRecord>> for Occupants {
    fn from(records: Vec<OccupantRecord>) -> Self {
        Self::from_records(records)
    }
}

impl From<Occupants> for Vec<OccupantRecord> {
    fn from(occupants: Occupants) -> Self {
        occupants.entries
    }
}

/// Point-in-time view of one chain. Only valid for `topology.chain_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub topology: TopologyRecord,
    pub occupants: Occupants,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
    pub assembled_at: DateTime<Utc>,
}

impl ChainSnapshot {
    pub fn assemble(
        topology: TopologyRecord,
        occupants: Vec<OccupantRecord>,
        connections: Vec<ConnectionRecord>,
    ) -> Self {
        let occupants = Occupants::from_records(occupants.into_iter().filter(|o| o.present));
        Self {
            topology,
            occupants,
            connections,
            assembled_at: Utc::now(),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.topology.chain_id
    }
}

/// Change notifications published for a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainNotification {
    TopologyChanged {
        chain_id: String,
    },
    OccupantChanged {
        chain_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        present: Option<bool>,
    },
    ConnectionChanged {
        chain_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
    },
}

impl ChainNotification {
    pub fn chain_id(&self) -> &str {
        match self {
            ChainNotification::TopologyChanged { chain_id }
            | ChainNotification::OccupantChanged { chain_id, .. }
            | ChainNotification::ConnectionChanged { chain_id, .. } => chain_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainNotification::TopologyChanged { .. } => "topology_changed",
            ChainNotification::OccupantChanged { .. } => "occupant_changed",
            ChainNotification::ConnectionChanged { .. } => "connection_changed",
        }
    }

    pub fn topic(&self) -> String {
        chain_topic(self.chain_id())
    }
}

/// A notification as received from the bus. Kinds this build does not know
/// about are kept as `Unrecognized` instead of failing the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundNotification {
    Chain(ChainNotification),
    Unrecognized { kind: String },
}

impl InboundNotification {
    pub fn from_value(value: Value) -> Self {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("(missing)")
            .to_string();
        match serde_json::from_value::<ChainNotification>(value) {
            Ok(notification) => InboundNotification::Chain(notification),
            Err(_) => InboundNotification::Unrecognized { kind },
        }
    }
}

impl From<ChainNotification> for InboundNotification {
    fn from(notification: ChainNotification) -> Self {
        InboundNotification::Chain(notification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicPatternError {
    #[error("topic pattern is empty")]
    Empty,
    #[error("wildcard only allowed as the final character: {0}")]
    MisplacedWildcard(String),
}

/// Exact topic or a prefix terminated by `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern(String);

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, TopicPatternError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TopicPatternError::Empty);
        }
        if let Some(pos) = trimmed.find('*') {
            if pos != trimmed.len() - 1 {
                return Err(TopicPatternError::MisplacedWildcard(trimmed.to_string()));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn all_chains() -> Self {
        Self(format!("{CHAIN_TOPIC_PREFIX}:*"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => topic.starts_with(prefix),
            None => self.0 == topic,
        }
    }
}

impl Default for TopicPattern {
    fn default() -> Self {
        Self::all_chains()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicPattern {
    type Err = TopicPatternError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = TopicPatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> Self {
        pattern.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupant(character_id: CharacterId, name: &str) -> OccupantRecord {
        OccupantRecord {
            character_id,
            character_name: name.to_string(),
            system_id: Some("J100820".to_string()),
            ship_type: None,
            present: true,
            enrichment: None,
        }
    }

    #[test]
    fn occupants_keep_first_record_per_character() {
        let mut duplicate = occupant(1, "Alpha (stale)");
        duplicate.ship_type = Some("Loki".to_string());
        let occupants =
            Occupants::from_records(vec![occupant(1, "Alpha"), occupant(2, "Bravo"), duplicate]);

        assert_eq!(occupants.len(), 2);
        assert_eq!(occupants.character_ids(), vec![1, 2]);
        assert_eq!(
            occupants.get(1).map(|o| o.character_name.as_str()),
            Some("Alpha")
        );
    }

    #[test]
    fn attach_enrichment_only_touches_matching_occupant() {
        let mut occupants =
            Occupants::from_records(vec![occupant(1, "Alpha"), occupant(2, "Bravo")]);
        let result = AnalysisResult::assessed(2, ThreatLevel::High, 8_200);

        assert!(occupants.attach_enrichment(result.clone()));
        assert_eq!(occupants.get(2).and_then(|o| o.enrichment.clone()), Some(result));
        assert!(occupants.get(1).expect("alpha").enrichment.is_none());
        assert_eq!(occupants.character_ids(), vec![1, 2]);
    }

    #[test]
    fn attach_enrichment_for_absent_character_is_a_no_op() {
        let mut occupants = Occupants::from_records(vec![occupant(1, "Alpha")]);
        let before = occupants.clone();

        assert!(!occupants.attach_enrichment(AnalysisResult::failed(99, "timeout")));
        assert_eq!(occupants, before);
    }

    #[test]
    fn snapshot_drops_absent_occupants() {
        let topology = TopologyRecord {
            id: "T1".to_string(),
            chain_id: "C1".to_string(),
            name: "Home chain".to_string(),
            scope: GroupScope(7),
            monitoring_enabled: true,
            updated_at: None,
        };
        let mut gone = occupant(3, "Charlie");
        gone.present = false;
        let snapshot =
            ChainSnapshot::assemble(topology, vec![occupant(1, "Alpha"), gone], Vec::new());

        assert_eq!(snapshot.chain_id(), "C1");
        assert_eq!(snapshot.occupants.character_ids(), vec![1]);
    }

    #[test]
    fn topic_pattern_matches_prefix_and_exact() {
        let all = TopicPattern::all_chains();
        assert!(all.matches("chain_intel:C1"));
        assert!(!all.matches("system_status:C1"));

        let exact = TopicPattern::parse("chain_intel:C1").expect("exact pattern");
        assert!(exact.matches("chain_intel:C1"));
        assert!(!exact.matches("chain_intel:C10"));
    }

    #[test]
    fn topic_pattern_rejects_inner_wildcard_and_empty() {
        assert_eq!(TopicPattern::parse("  "), Err(TopicPatternError::Empty));
        assert!(matches!(
            TopicPattern::parse("chain_*:C1"),
            Err(TopicPatternError::MisplacedWildcard(_))
        ));
    }

    #[test]
    fn notification_wire_shape_is_kind_tagged() {
        let notification = ChainNotification::OccupantChanged {
            chain_id: "C1".to_string(),
            character_id: Some(42),
            present: None,
        };
        let value = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"kind": "occupant_changed", "chain_id": "C1", "character_id": 42})
        );
        assert_eq!(notification.topic(), "chain_intel:C1");
    }

    #[test]
    fn unknown_notification_kind_is_kept_as_unrecognized() {
        let inbound = InboundNotification::from_value(
            serde_json::json!({"kind": "signature_scanned", "chain_id": "C1"}),
        );
        assert_eq!(
            inbound,
            InboundNotification::Unrecognized {
                kind: "signature_scanned".to_string()
            }
        );

        let known = InboundNotification::from_value(
            serde_json::json!({"kind": "topology_changed", "chain_id": "C1"}),
        );
        assert!(matches!(known, InboundNotification::Chain(_)));
    }

    #[test]
    fn threat_level_parses_aliases() {
        assert_eq!("Medium".parse::<ThreatLevel>(), Ok(ThreatLevel::Moderate));
        assert!("severe".parse::<ThreatLevel>().is_err());
    }
}
