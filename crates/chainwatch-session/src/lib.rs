//! Per-session chain surveillance controller.
//!
//! A session binds to the notification bus, tracks which chains its group
//! monitors, loads a snapshot of the selected chain and keeps that snapshot
//! current as change notifications and enrichment results arrive. All state
//! changes happen on the session's own task.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod reconciler;
pub mod services;
pub mod session;
pub mod subscription;
pub mod view;

pub use config::{ScopePolicy, SessionConfig};
pub use enrichment::EnrichmentDispatcher;
pub use error::{LookupError, MonitorError, SessionError, StoreError, TransportError};
pub use lifecycle::MonitorController;
pub use loader::ChainLoader;
pub use reconciler::{IgnoreReason, Reconciler, Reconciliation, SessionEvent};
pub use services::{
    AnalysisService, BroadcastBus, BusDelivery, BusSubscription, MonitoringService,
    SessionServices, TopologyStore,
};
pub use session::{ChainSession, Session, SessionCommand, SessionHandle};
pub use subscription::SubscriptionGuard;
pub use view::ViewModel;
