//! Companion-side cached view of host state
//!
//! The `PeerSyncClient` owns a [`CompanionState`] and mutates it only on its
//! own actor task. Session callbacks arrive on arbitrary threads and are
//! forwarded into the actor's channel before they touch the cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PeerSyncClient (actor task)                                    │
//! │  ├── state: CompanionState                                      │
//! │  │   ├── current_time / is_absolute_time (partial updates)      │
//! │  │   ├── buttons (replaced wholesale)                           │
//! │  │   └── is_connected                                           │
//! │  ├── events: mpsc::UnboundedReceiver<ClientEvent>               │
//! │  │   └── replies, pushes, lifecycle events, handle commands     │
//! │  ├── poll: Interval (requestCurrentTime every tick)             │
//! │  └── state_tx: watch::Sender<CompanionState>                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The poll is the only retry mechanism for time. A failed round trip is
//! simply corrected on the next tick.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::codec::Payload;
use crate::config::SyncConfig;
use crate::protocol::{reply_buttons, reply_error, reply_success, Request, TimeUpdate};
use crate::transport::{ActivationChange, TransportSession};
use crate::types::{ButtonAction, Settings, SyncContext};

/// Time shown before the first successful time update
pub const PLACEHOLDER_TIME: &str = "--:--:--";

/// Companion's cached view
#[derive(Debug, Clone, PartialEq)]
pub struct CompanionState {
    pub current_time: String,
    pub is_absolute_time: bool,
    pub buttons: Vec<ButtonAction>,
    /// Settings from the latest context; carried, not interpreted
    pub settings: Settings,
    pub is_connected: bool,
}

impl Default for CompanionState {
    fn default() -> Self {
        Self {
            current_time: PLACEHOLDER_TIME.to_string(),
            is_absolute_time: true,
            buttons: Vec::new(),
            settings: Settings::new(),
            is_connected: false,
        }
    }
}

impl CompanionState {
    /// Apply whichever time fields are present
    fn apply_time(&mut self, update: TimeUpdate) {
        if let Some(time) = update.current_time {
            self.current_time = time;
        }
        if let Some(is_absolute) = update.is_absolute {
            self.is_absolute_time = is_absolute;
        }
    }
}

type CaptureCallback = Box<dyn FnOnce(bool) + Send>;

/// Everything the actor reacts to
enum ClientEvent {
    ActivationChanged(ActivationChange),
    ReachabilityChanged(bool),
    DirectMessage(Payload),
    Context(Payload),
    ButtonsReply(Payload),
    TimeReply(Payload),
    CaptureCompleted {
        success: bool,
        on_complete: CaptureCallback,
    },
    RequestButtons,
    RequestCurrentTime,
    CaptureEvent {
        button_name: String,
        color: String,
        on_complete: CaptureCallback,
    },
}

/// Companion-side sync client
pub struct PeerSyncClient {
    session: TransportSession,
    state: CompanionState,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    state_tx: watch::Sender<CompanionState>,
}

impl PeerSyncClient {
    /// Create a client and register its session handlers.
    ///
    /// Events received before [`start`](Self::start) are queued.
    pub fn new(session: TransportSession) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CompanionState::default());

        let tx = events_tx.clone();
        session.on_activation_changed(move |change| {
            let _ = tx.send(ClientEvent::ActivationChanged(change));
        });
        let tx = events_tx.clone();
        session.on_reachability_changed(move |reachable| {
            let _ = tx.send(ClientEvent::ReachabilityChanged(reachable));
        });
        let tx = events_tx.clone();
        session.on_message(move |message| {
            let (payload, reply) = message.into_parts();
            if reply.is_some() {
                debug!("Companion does not serve requests, dropping");
                return;
            }
            let _ = tx.send(ClientEvent::DirectMessage(payload));
        });
        let tx = events_tx.clone();
        session.on_context(move |payload| {
            let _ = tx.send(ClientEvent::Context(payload));
        });

        Self {
            session,
            state: CompanionState::default(),
            events_tx,
            events_rx,
            state_tx,
        }
    }

    pub fn state(&self) -> &CompanionState {
        &self.state
    }

    /// Watch the cached state
    pub fn subscribe(&self) -> watch::Receiver<CompanionState> {
        self.state_tx.subscribe()
    }

    /// Ask the host for its buttons. No-op when unreachable.
    pub fn request_buttons(&self) {
        if !self.session.is_reachable() {
            debug!("Not reachable, skipping button request");
            return;
        }
        let tx = self.events_tx.clone();
        self.session
            .send_request_with(Request::RequestButtons.encode(), move |result| match result {
                Ok(reply) => {
                    let _ = tx.send(ClientEvent::ButtonsReply(reply));
                }
                Err(err) if err.is_unreachable() => debug!("Peer unreachable, buttons not requested"),
                Err(err) => warn!(error = %err, "Error requesting buttons"),
            });
    }

    /// Ask the host for the current time. No-op when unreachable.
    pub fn request_current_time(&self) {
        if !self.session.is_reachable() {
            return;
        }
        let tx = self.events_tx.clone();
        self.session
            .send_request_with(Request::RequestCurrentTime.encode(), move |result| match result {
                Ok(reply) => {
                    let _ = tx.send(ClientEvent::TimeReply(reply));
                }
                Err(err) => debug!(error = %err, "Error requesting time"),
            });
    }

    /// Report a button press to the host.
    ///
    /// `on_complete(false)` runs immediately when unreachable. Otherwise it
    /// runs on the actor with the reply's `success` flag, or `false` if the
    /// send failed.
    pub fn capture_event<F>(&self, button_name: impl Into<String>, color: impl Into<String>, on_complete: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.capture_boxed(button_name.into(), color.into(), Box::new(on_complete));
    }

    fn capture_boxed(&self, button_name: String, color: String, on_complete: CaptureCallback) {
        if !self.session.is_reachable() {
            debug!(button = %button_name, "Not reachable, capture failed");
            on_complete(false);
            return;
        }

        let tx = self.events_tx.clone();
        let request = Request::capture(button_name, color);
        self.session
            .send_request_with(request.encode(), move |result| {
                let success = match result {
                    Ok(reply) => reply_success(&reply),
                    Err(err) if err.is_unreachable() => {
                        debug!("Peer became unreachable before capture was sent");
                        false
                    }
                    Err(err) => {
                        warn!(error = %err, "Error capturing event");
                        false
                    }
                };
                let _ = tx.send(ClientEvent::CaptureCompleted {
                    success,
                    on_complete,
                });
            });
    }

    /// Apply every queued event without waiting. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::ActivationChanged(change) => {
                self.state.is_connected = change.success;
                self.publish();
                match change.result() {
                    Ok(()) => {
                        info!("Companion activated, requesting buttons");
                        self.request_buttons();
                    }
                    Err(err) => warn!(error = %err, "Companion activation failed"),
                }
            }
            ClientEvent::ReachabilityChanged(reachable) => {
                self.state.is_connected = reachable && self.session.is_activated();
                self.publish();
            }
            ClientEvent::DirectMessage(payload) => {
                let buttons = reply_buttons(&payload);
                let update = TimeUpdate::from_payload(&payload);
                if buttons.is_none() && update.is_empty() {
                    debug!("Direct message without buttons or time fields, ignoring");
                    return;
                }
                if let Some(buttons) = buttons {
                    debug!(buttons = buttons.len(), "Applying pushed buttons");
                    self.state.buttons = buttons;
                }
                self.state.apply_time(update);
                self.publish();
            }
            ClientEvent::Context(payload) => match SyncContext::decode(&payload) {
                Ok(context) => {
                    debug!(buttons = context.buttons.len(), "Applying context");
                    self.state.buttons = context.buttons;
                    self.state.settings = context.settings;
                    self.publish();
                }
                Err(err) => debug!(error = %err, "Dropping invalid context"),
            },
            ClientEvent::ButtonsReply(reply) => match reply_buttons(&reply) {
                Some(buttons) => {
                    self.state.buttons = buttons;
                    self.publish();
                }
                None => debug!("Button reply without buttons list, ignoring"),
            },
            ClientEvent::TimeReply(reply) => {
                if let Some(error) = reply_error(&reply) {
                    debug!(%error, "Host could not provide time");
                }
                self.state.apply_time(TimeUpdate::from_payload(&reply));
                self.publish();
            }
            ClientEvent::CaptureCompleted {
                success,
                on_complete,
            } => on_complete(success),
            ClientEvent::RequestButtons => self.request_buttons(),
            ClientEvent::RequestCurrentTime => self.request_current_time(),
            ClientEvent::CaptureEvent {
                button_name,
                color,
                on_complete,
            } => self.capture_boxed(button_name, color, on_complete),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    /// Activate the session, request buttons, and spawn the actor with its
    /// time poll.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, config: &SyncConfig) -> CompanionHandle {
        let events_tx = self.events_tx.clone();
        let state_rx = self.state_tx.subscribe();

        self.session.activate();
        self.request_buttons();

        let poll_interval = config.poll_interval();
        let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(?poll_interval, "Companion poll armed");

        let task = tokio::spawn(self.run(poll));
        CompanionHandle {
            events_tx,
            state_rx,
            task,
        }
    }

    async fn run(mut self, mut poll: Interval) {
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                _ = poll.tick() => self.request_current_time(),
            }
        }
    }
}

/// Running companion client
///
/// Dropping the handle stops the actor and its poll.
pub struct CompanionHandle {
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    state_rx: watch::Receiver<CompanionState>,
    task: JoinHandle<()>,
}

impl CompanionHandle {
    /// Snapshot of the cached state
    pub fn state(&self) -> CompanionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CompanionState> {
        self.state_rx.clone()
    }

    pub fn request_buttons(&self) {
        let _ = self.events_tx.send(ClientEvent::RequestButtons);
    }

    pub fn request_current_time(&self) {
        let _ = self.events_tx.send(ClientEvent::RequestCurrentTime);
    }

    /// Report a button press; `on_complete` runs on the client's actor
    pub fn capture_event<F>(&self, button_name: impl Into<String>, color: impl Into<String>, on_complete: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let event = ClientEvent::CaptureEvent {
            button_name: button_name.into(),
            color: color.into(),
            on_complete: Box::new(on_complete),
        };
        if let Err(mpsc::error::SendError(ClientEvent::CaptureEvent { on_complete, .. })) =
            self.events_tx.send(event)
        {
            on_complete(false);
        }
    }

    /// Report a button press and wait for the outcome.
    ///
    /// Waits indefinitely if the host never answers.
    pub async fn capture(&self, button_name: impl Into<String>, color: impl Into<String>) -> bool {
        let (tx, rx) = oneshot::channel();
        self.capture_event(button_name, color, move |success| {
            let _ = tx.send(success);
        });
        rx.await.unwrap_or(false)
    }

    pub fn shutdown(self) {
        info!("Shutting down companion client");
    }
}

impl Drop for CompanionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
