use crate::config::SessionConfig;
use crate::enrichment::EnrichmentDispatcher;
use crate::error::SessionError;
use crate::lifecycle::MonitorController;
use crate::loader::ChainLoader;
use crate::reconciler::{Reconciler, Reconciliation, SessionEvent};
use crate::services::SessionServices;
use crate::subscription::{self, SubscriptionGuard};
use crate::view::ViewModel;
use chainwatch_core::{CharacterId, GroupScope, Identity, TopicPattern};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// User-facing commands. Each one yields the view model as it stands after
/// the command was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Monitor { chain_id: String },
    Stop { chain_id: String },
    Refresh { chain_id: String },
    Select { chain_id: String },
    AnalyzeOccupant { character_id: CharacterId },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Monitor { .. } => "monitor",
            SessionCommand::Stop { .. } => "stop",
            SessionCommand::Refresh { .. } => "refresh",
            SessionCommand::Select { .. } => "select",
            SessionCommand::AnalyzeOccupant { .. } => "analyze_occupant",
        }
    }
}

/// Session state plus the components that act on it. Owned by exactly one
/// task; nothing else holds a mutable reference to the view.
pub struct Session {
    view: ViewModel,
    controller: MonitorController,
    reconciler: Reconciler,
    dispatcher: EnrichmentDispatcher,
}

impl Session {
    pub fn new(
        identity: Identity,
        scope: GroupScope,
        topic_pattern: TopicPattern,
        services: &SessionServices,
        inbound: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            view: ViewModel::new(identity, scope, topic_pattern),
            controller: MonitorController::new(
                services.monitoring.clone(),
                services.store.clone(),
            ),
            reconciler: Reconciler::new(ChainLoader::new(services.store.clone(), scope)),
            dispatcher: EnrichmentDispatcher::new(services.analysis.clone(), inbound),
        }
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    /// Applies one command. Failures end up in `last_error`, never in the
    /// caller.
    pub async fn handle_command(&mut self, command: SessionCommand) {
        let name = command.name();
        debug!(event = "session_command", command = name);
        self.view.clear_error();

        let result = match command {
            SessionCommand::Monitor { chain_id } => self.monitor(&chain_id).await,
            SessionCommand::Stop { chain_id } => self.stop(&chain_id).await,
            SessionCommand::Refresh { chain_id } => {
                self.refresh(&chain_id).await;
                Ok(())
            }
            SessionCommand::Select { chain_id } => {
                self.select(&chain_id).await;
                Ok(())
            }
            SessionCommand::AnalyzeOccupant { character_id } => {
                self.analyze_occupant(character_id);
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!(event = "session_command_failed", command = name, error = %err);
            self.view.set_error(err.status_message());
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> Reconciliation {
        self.reconciler.apply(&mut self.view, event).await
    }

    /// Re-reads the monitored-chain list; a store failure keeps the previous
    /// list and sets `last_error`.
    pub async fn reload_monitored(&mut self) {
        if let Err(err) = self.load_monitored_list().await {
            warn!(event = "monitored_list_failed", error = %err);
            self.view.set_error(err.status_message());
        }
    }

    async fn load_monitored_list(&mut self) -> Result<(), SessionError> {
        let monitored = self.controller.load_monitored(self.view.scope()).await?;
        debug!(event = "monitored_list_loaded", count = monitored.len());
        self.view.set_monitored(monitored);
        Ok(())
    }

    async fn monitor(&mut self, chain_id: &str) -> Result<(), SessionError> {
        self.controller
            .start_monitoring(chain_id, self.view.scope())
            .await?;
        self.load_monitored_list().await?;
        self.view.set_status(format!("monitoring {chain_id}"));
        Ok(())
    }

    async fn stop(&mut self, chain_id: &str) -> Result<(), SessionError> {
        self.controller
            .stop_monitoring(chain_id, self.view.scope())
            .await?;
        if self.view.is_selected(chain_id) {
            self.view.clear_selection();
        }
        self.load_monitored_list().await?;
        self.view.set_status(format!("stopped monitoring {chain_id}"));
        Ok(())
    }

    async fn refresh(&mut self, chain_id: &str) {
        self.controller.force_refresh().await;
        self.view.set_status("refresh requested");
        if self.view.is_selected(chain_id) {
            self.reconciler.reload(&mut self.view, chain_id).await;
        }
    }

    async fn select(&mut self, chain_id: &str) {
        self.view.select(chain_id);
        let outcome = self.reconciler.reload(&mut self.view, chain_id).await;
        if let Reconciliation::Reloaded { .. } = outcome {
            self.view.set_status(format!("viewing {chain_id}"));
        }
    }

    fn analyze_occupant(&mut self, character_id: CharacterId) {
        let present = self
            .view
            .snapshot()
            .map(|snapshot| snapshot.occupants.contains(character_id))
            .unwrap_or(false);
        if !present {
            debug!(event = "analysis_skipped", character_id, reason = "occupant_not_present");
            self.view.set_error("occupant not present");
            return;
        }
        let request = self.dispatcher.request_enrichment(character_id);
        self.view.set_status(format!(
            "analysis requested for {character_id} ({})",
            request.request_id
        ));
    }
}

enum ControlMessage {
    Command {
        command: SessionCommand,
        reply: oneshot::Sender<ViewModel>,
    },
    Shutdown,
}

/// Entry point for running a session on its own task.
pub struct ChainSession;

impl ChainSession {
    /// Resolves the scope, binds the bus subscription, loads the monitored
    /// list and spawns the session loop. A bus failure here is fatal.
    pub async fn start(
        identity: Identity,
        config: SessionConfig,
        services: SessionServices,
    ) -> Result<(SessionHandle, JoinHandle<()>), SessionError> {
        let scope = config.scope_policy.resolve(&identity)?;
        let user_id = identity.user_id.clone();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let guard = subscription::bind(
            services.bus.as_ref(),
            &config.topic_pattern,
            inbound_tx.clone(),
        )
        .await
        .map_err(|err| {
            error!(event = "session_start_failed", user_id = %user_id, error = %err);
            err
        })?;

        let mut session = Session::new(
            identity,
            scope,
            config.topic_pattern.clone(),
            &services,
            inbound_tx,
        );
        session.reload_monitored().await;

        let (view_tx, _) = watch::channel(session.view().clone());
        let view_tx = Arc::new(view_tx);
        let (control_tx, control_rx) = mpsc::channel(config.command_capacity.max(1));

        info!(
            event = "session_started",
            user_id = %user_id,
            scope = %scope,
            pattern = %config.topic_pattern
        );
        let task = tokio::spawn(run_session(
            session,
            guard,
            control_rx,
            inbound_rx,
            view_tx.clone(),
        ));

        Ok((
            SessionHandle {
                control: control_tx,
                view: view_tx,
            },
            task,
        ))
    }
}

async fn run_session(
    mut session: Session,
    subscription: SubscriptionGuard,
    mut control: mpsc::Receiver<ControlMessage>,
    mut inbound: mpsc::Receiver<SessionEvent>,
    view_tx: Arc<watch::Sender<ViewModel>>,
) {
    loop {
        tokio::select! {
            message = control.recv() => match message {
                Some(ControlMessage::Command { command, reply }) => {
                    session.handle_command(command).await;
                    publish_view(&view_tx, session.view());
                    let _ = reply.send(session.view().clone());
                }
                Some(ControlMessage::Shutdown) | None => break,
            },
            Some(event) = inbound.recv() => {
                session.handle_event(event).await;
                publish_view(&view_tx, session.view());
            }
        }
    }
    drop(subscription);
    info!(event = "session_stopped", user_id = %session.view().identity().user_id);
}

fn publish_view(view_tx: &watch::Sender<ViewModel>, view: &ViewModel) {
    view_tx.send_if_modified(|current| {
        if current == view {
            return false;
        }
        *current = view.clone();
        true
    });
}

/// Cloneable command surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<ControlMessage>,
    view: Arc<watch::Sender<ViewModel>>,
}

impl SessionHandle {
    pub async fn monitor(&self, chain_id: &str) -> Result<ViewModel, SessionError> {
        self.send(SessionCommand::Monitor {
            chain_id: chain_id.to_string(),
        })
        .await
    }

    pub async fn stop(&self, chain_id: &str) -> Result<ViewModel, SessionError> {
        self.send(SessionCommand::Stop {
            chain_id: chain_id.to_string(),
        })
        .await
    }

    pub async fn refresh(&self, chain_id: &str) -> Result<ViewModel, SessionError> {
        self.send(SessionCommand::Refresh {
            chain_id: chain_id.to_string(),
        })
        .await
    }

    pub async fn select(&self, chain_id: &str) -> Result<ViewModel, SessionError> {
        self.send(SessionCommand::Select {
            chain_id: chain_id.to_string(),
        })
        .await
    }

    pub async fn analyze_occupant(
        &self,
        character_id: CharacterId,
    ) -> Result<ViewModel, SessionError> {
        self.send(SessionCommand::AnalyzeOccupant { character_id })
            .await
    }

    pub async fn send(&self, command: SessionCommand) -> Result<ViewModel, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(ControlMessage::Command {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Latest published view.
    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewModel> {
        self.view.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.control.send(ControlMessage::Shutdown).await;
    }
}
