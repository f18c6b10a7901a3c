//! Host-side request router
//!
//! The `HostSyncController` runs next to canonical state. It keeps no state
//! of its own: each inbound request is decoded, routed to a collaborator,
//! and answered at most once.
//!
//! ## Routing
//!
//! ```text
//! requestButtons      -> ButtonStore::buttons      -> {buttons}
//! requestCurrentTime  -> TimeSource::current_time  -> {currentTime, isAbsolute}
//! captureEvent        -> EventSink::record_event   -> {success}
//! <unknown>                                        -> {error: "unknown action"}
//! <invalid payload>                                -> dropped, no reply
//! ```
//!
//! A `captureEvent` missing `buttonName` or `color` is dropped without a
//! reply while an unknown action gets an explicit error reply. Both
//! behaviors are intentional and tested.

pub mod collaborators;

pub use collaborators::{
    ButtonStore, EventSink, MemoryButtonStore, MemoryEventLog, SystemClock, TimeSource,
};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::codec::Payload;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    fields, Reply, Request, TimeUpdate, TIME_UNAVAILABLE_ERROR, UNKNOWN_ACTION_ERROR,
};
use crate::transport::{IncomingMessage, TransportSession};
use crate::types::{ButtonAction, Settings, SyncContext, TimeSnapshot};

/// Events marshaled from the session onto the host's actor task
enum HostEvent {
    Message(IncomingMessage),
    Activated,
}

/// Routes companion requests to host collaborators
pub struct HostSyncController {
    session: TransportSession,
    store: Arc<dyn ButtonStore>,
    clock: Arc<dyn TimeSource>,
    sink: Arc<dyn EventSink>,
}

impl HostSyncController {
    pub fn new(
        session: TransportSession,
        store: Arc<dyn ButtonStore>,
        clock: Arc<dyn TimeSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            session,
            store,
            clock,
            sink,
        }
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Produce the reply for a decoded request
    pub fn route(&self, request: Request) -> Reply {
        match request {
            Request::RequestButtons => match self.store.buttons() {
                Ok(buttons) => Reply::Buttons(buttons),
                Err(err) => {
                    warn!(error = %err, "Button store failed, replying with no buttons");
                    Reply::Buttons(Vec::new())
                }
            },
            Request::RequestCurrentTime => match self.clock.current_time() {
                Ok(snapshot) => Reply::CurrentTime(snapshot),
                Err(err) => {
                    warn!(error = %err, "Time source failed");
                    Reply::Error(TIME_UNAVAILABLE_ERROR.to_string())
                }
            },
            Request::CaptureEvent(event) => {
                let button = event.button_name.clone();
                match self.sink.record_event(event) {
                    Ok(()) => Reply::Captured { success: true },
                    Err(err) => {
                        warn!(%button, error = %err, "Event sink rejected event");
                        Reply::Captured { success: false }
                    }
                }
            }
            Request::Unknown(action) => {
                debug!(%action, "Unknown action");
                Reply::Error(UNKNOWN_ACTION_ERROR.to_string())
            }
        }
    }

    /// Decode, route and answer one inbound message.
    ///
    /// Invalid payloads and messages that expect no reply are dropped.
    pub fn handle_message(&self, message: IncomingMessage) {
        let (payload, reply) = message.into_parts();

        let request = match Request::decode(&payload) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "Dropping invalid request");
                return;
            }
        };

        let Some(reply) = reply else {
            debug!(action = request.action_name(), "Ignoring message without reply handle");
            return;
        };

        let action = request.action_name().to_string();
        let request_id = reply.request_id();
        let response = self.route(request);
        if let Err(err) = reply.send(response.encode()) {
            warn!(%action, request_id, error = %err, "Failed to send reply");
        }
    }

    /// Push a context snapshot with the given state
    pub fn publish_context(&self, buttons: Vec<ButtonAction>, settings: Settings) {
        info!(buttons = buttons.len(), "Publishing context");
        self.session.push_context(&SyncContext::new(buttons, settings));
    }

    /// Push a context snapshot read from the button store
    pub fn publish_from_store(&self) -> SyncResult<()> {
        let buttons = self.store.buttons()?;
        let settings = self.store.settings()?;
        self.publish_context(buttons, settings);
        Ok(())
    }

    /// Publish a context from loosely typed arguments supplied by the host
    /// application: `{buttons: [...], settings?: {...}}`.
    ///
    /// Malformed button entries are skipped; a missing or non-list
    /// `buttons` is rejected.
    pub fn publish_from_args(&self, args: &Payload) -> SyncResult<()> {
        let buttons = args
            .get(fields::BUTTONS)
            .and_then(ButtonAction::list_from_value)
            .ok_or_else(|| SyncError::InvalidArguments("buttons list required".to_string()))?;
        let settings = match args.get(fields::SETTINGS) {
            Some(Value::Object(settings)) => settings.clone(),
            _ => Settings::new(),
        };
        self.publish_context(buttons, settings);
        Ok(())
    }

    /// Send the store's buttons to the companion as a direct message.
    ///
    /// Unlike a context this is dropped when the companion is unreachable.
    pub fn push_buttons(&self) -> SyncResult<()> {
        let buttons = self.store.buttons()?;
        debug!(buttons = buttons.len(), "Pushing buttons");
        self.session.send_direct(Reply::Buttons(buttons).encode())
    }

    /// Send the time to the companion outside the request/reply cycle
    pub fn push_time(&self, snapshot: TimeSnapshot) -> SyncResult<()> {
        self.session
            .send_direct(TimeUpdate::from(snapshot).encode())
    }

    /// Register session handlers, activate the session and spawn the actor
    /// task that serves requests and republishes context.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, config: &SyncConfig) -> HostHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let message_tx = tx.clone();
        self.session.on_message(move |message| {
            let _ = message_tx.send(HostEvent::Message(message));
        });
        let activation_tx = tx;
        self.session.on_activation_changed(move |change| {
            if change.success {
                let _ = activation_tx.send(HostEvent::Activated);
            }
        });
        self.session.on_reachability_changed(|reachable| {
            debug!(reachable, "Host sees companion reachability change");
        });

        let controller = Arc::new(self);
        let republish = config.context_republish_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let changes = controller.store.subscribe_changes();

        let task = tokio::spawn(Self::run(controller.clone(), rx, republish, changes));
        controller.session.activate();

        HostHandle { controller, task }
    }

    async fn run(
        controller: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
        mut republish: Option<Interval>,
        mut changes: Option<watch::Receiver<u64>>,
    ) {
        debug!("Host actor started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HostEvent::Message(message)) => controller.handle_message(message),
                    Some(HostEvent::Activated) => {
                        if let Err(err) = controller.publish_from_store() {
                            warn!(error = %err, "Failed to publish context after activation");
                        }
                    }
                    None => break,
                },
                _ = next_tick(&mut republish) => {
                    if let Err(err) = controller.publish_from_store() {
                        warn!(error = %err, "Periodic context republish failed");
                    }
                }
                changed = next_change(&mut changes) => {
                    if !changed {
                        debug!("Button store dropped its change feed");
                        changes = None;
                    } else if let Err(err) = controller.publish_from_store() {
                        warn!(error = %err, "Failed to publish context after store change");
                    }
                }
            }
        }
        debug!("Host actor stopped");
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Resolves on the next store revision; `false` once the store is gone
async fn next_change(changes: &mut Option<watch::Receiver<u64>>) -> bool {
    match changes {
        Some(changes) => changes.changed().await.is_ok(),
        None => std::future::pending::<bool>().await,
    }
}

/// Running host controller
///
/// Dropping the handle stops the actor task.
pub struct HostHandle {
    controller: Arc<HostSyncController>,
    task: JoinHandle<()>,
}

impl HostHandle {
    pub fn controller(&self) -> &HostSyncController {
        &self.controller
    }

    pub fn publish_context(&self, buttons: Vec<ButtonAction>, settings: Settings) {
        self.controller.publish_context(buttons, settings);
    }

    pub fn publish_from_store(&self) -> SyncResult<()> {
        self.controller.publish_from_store()
    }

    pub fn push_buttons(&self) -> SyncResult<()> {
        self.controller.push_buttons()
    }

    pub fn push_time(&self, snapshot: TimeSnapshot) -> SyncResult<()> {
        self.controller.push_time(snapshot)
    }

    pub fn shutdown(self) {
        info!("Shutting down host controller");
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
