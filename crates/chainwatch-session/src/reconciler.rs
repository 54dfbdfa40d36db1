use crate::error::{LookupError, SessionError};
use crate::loader::ChainLoader;
use crate::services::BusDelivery;
use crate::view::ViewModel;
use chainwatch_core::{AnalysisResult, CharacterId, EnrichmentRequest, InboundNotification};
use tracing::{debug, info, warn};

/// Everything that reaches a session's single inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Notification(BusDelivery),
    EnrichmentCompleted {
        request: EnrichmentRequest,
        result: AnalysisResult,
    },
    SubscriptionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Reloaded { chain_id: String },
    ReloadFailed { chain_id: String },
    Merged { character_id: CharacterId },
    Disconnected,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotSelected,
    NoSnapshot,
    UnknownOccupant,
    MismatchedResult,
    Unrecognized,
    SelectionChanged,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::NotSelected => "not_selected",
            IgnoreReason::NoSnapshot => "no_snapshot",
            IgnoreReason::UnknownOccupant => "unknown_occupant",
            IgnoreReason::MismatchedResult => "mismatched_result",
            IgnoreReason::Unrecognized => "unrecognized",
            IgnoreReason::SelectionChanged => "selection_changed",
        }
    }
}

/// Decision for one event before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Reload(String),
    Done(Reconciliation),
}

/// Applies inbound events to a view, one at a time. Chain notifications for
/// the selected chain trigger a full reload; enrichment results are merged
/// into the matching occupant; everything else leaves the view untouched.
#[derive(Clone)]
pub struct Reconciler {
    loader: ChainLoader,
}

impl Reconciler {
    pub fn new(loader: ChainLoader) -> Self {
        Self { loader }
    }

    pub async fn apply(&self, view: &mut ViewModel, event: SessionEvent) -> Reconciliation {
        let outcome = match plan(view, event) {
            Plan::Reload(chain_id) => self.reload(view, &chain_id).await,
            Plan::Done(outcome) => outcome,
        };
        if let Reconciliation::Ignored(reason) = &outcome {
            debug!(event = "inbound_ignored", reason = reason.as_str());
        }
        outcome
    }

    /// Loads `chain_id` and commits the result if it is still the selection.
    ///
    /// `NotFound`/`Ambiguous` clear the snapshot. Store failures keep the
    /// last-known-good snapshot of the same chain.
    pub async fn reload(&self, view: &mut ViewModel, chain_id: &str) -> Reconciliation {
        match self.loader.load_snapshot(chain_id).await {
            Ok(snapshot) => {
                if view.commit_snapshot(snapshot) {
                    view.clear_reload_error();
                    info!(event = "snapshot_replaced", chain_id);
                    Reconciliation::Reloaded {
                        chain_id: chain_id.to_string(),
                    }
                } else {
                    Reconciliation::Ignored(IgnoreReason::SelectionChanged)
                }
            }
            Err(err) => {
                warn!(event = "snapshot_reload_failed", chain_id, error = %err);
                match &err {
                    LookupError::NotFound { .. } | LookupError::Ambiguous { .. } => {
                        if view.is_selected(chain_id) {
                            view.clear_snapshot();
                        }
                    }
                    LookupError::Store(_) => view.discard_foreign_snapshot(),
                }
                view.set_reload_error(SessionError::from(err).status_message());
                Reconciliation::ReloadFailed {
                    chain_id: chain_id.to_string(),
                }
            }
        }
    }
}

fn plan(view: &mut ViewModel, event: SessionEvent) -> Plan {
    match event {
        SessionEvent::Notification(delivery) => match delivery.notification {
            InboundNotification::Chain(notification) => {
                if view.is_selected(notification.chain_id()) {
                    debug!(
                        event = "chain_change_received",
                        kind = notification.kind(),
                        chain_id = notification.chain_id()
                    );
                    Plan::Reload(notification.chain_id().to_string())
                } else {
                    Plan::Done(Reconciliation::Ignored(IgnoreReason::NotSelected))
                }
            }
            InboundNotification::Unrecognized { kind } => {
                debug!(event = "notification_unrecognized", kind = %kind, topic = %delivery.topic);
                Plan::Done(Reconciliation::Ignored(IgnoreReason::Unrecognized))
            }
        },
        SessionEvent::EnrichmentCompleted { request, result } => {
            Plan::Done(merge_enrichment(view, &request, result))
        }
        SessionEvent::SubscriptionClosed => {
            view.set_error("notification stream disconnected");
            Plan::Done(Reconciliation::Disconnected)
        }
    }
}

fn merge_enrichment(
    view: &mut ViewModel,
    request: &EnrichmentRequest,
    result: AnalysisResult,
) -> Reconciliation {
    if result.character_id != request.character_id {
        warn!(
            event = "enrichment_mismatch",
            request_id = %request.request_id,
            requested = request.character_id,
            received = result.character_id
        );
        return Reconciliation::Ignored(IgnoreReason::MismatchedResult);
    }
    let Some(snapshot) = view.snapshot_mut() else {
        return Reconciliation::Ignored(IgnoreReason::NoSnapshot);
    };
    let character_id = result.character_id;
    if snapshot.occupants.attach_enrichment(result) {
        info!(
            event = "enrichment_merged",
            request_id = %request.request_id,
            character_id
        );
        Reconciliation::Merged { character_id }
    } else {
        Reconciliation::Ignored(IgnoreReason::UnknownOccupant)
    }
}
