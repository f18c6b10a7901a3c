//! Session state, request/reply correlation and event subscription
//!
//! A [`TransportSession`] is constructed once by the process root and cloned
//! into whichever controller or client needs it.
//!
//! ## Delivery semantics
//!
//! - `send_request` is at-most-once: no retry, no timeout. Exactly one of
//!   the two callbacks fires per call. A request whose reply never arrives
//!   stays in the pending table until the platform deactivates the session,
//!   which fails every outstanding request with `TransmissionFailed`.
//!   Reachability flaps alone leave the table untouched.
//! - A reply is matched by id and its pending entry removed before the
//!   callback runs, so a second reply for the same id is ignored.
//! - Contexts are last-write-wins. While the session is not activated the
//!   newest context is held and flushed on activation.
//! - `Deactivated` always reactivates. After a failed activation, the next
//!   `BecameInactive` or `ReachabilityChanged` from the platform retries too.
//!   There is no timer-driven retry.
//!
//! Handlers run on whatever thread delivered the platform event. Consumers
//! that own state forward into their own actor channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PlatformEvent, Transport};
use crate::codec::{Payload, WireMessage};
use crate::error::{SyncError, SyncResult};
use crate::types::SyncContext;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    NotActivated,
    Activating,
    Activated,
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::NotActivated => write!(f, "NotActivated"),
            ActivationState::Activating => write!(f, "Activating"),
            ActivationState::Activated => write!(f, "Activated"),
        }
    }
}

/// Payload of an activation-changed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationChange {
    pub success: bool,
    /// Platform error description when `success` is false
    pub error: Option<String>,
}

impl ActivationChange {
    /// The change as a result, mapping failure to [`SyncError::ActivationFailed`]
    pub fn result(&self) -> SyncResult<()> {
        if self.success {
            return Ok(());
        }
        let reason = self.error.clone().unwrap_or_else(|| "unknown".to_string());
        Err(SyncError::ActivationFailed(reason))
    }
}

/// Sends the single reply for one inbound request
///
/// Consumed by [`ReplyHandle::send`]. Dropping it without sending means the
/// request is never answered.
pub struct ReplyHandle {
    request_id: u64,
    transport: Arc<dyn Transport>,
}

impl ReplyHandle {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn send(self, payload: Payload) -> SyncResult<()> {
        self.transport
            .send_message(WireMessage::reply(self.request_id, payload))
    }
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("request_id", &self.request_id)
            .field("transport", &"<Transport>")
            .finish()
    }
}

/// An inbound request or direct message
#[derive(Debug)]
pub struct IncomingMessage {
    pub payload: Payload,
    reply: Option<ReplyHandle>,
}

impl IncomingMessage {
    /// Whether the sender is waiting for a reply
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn into_parts(self) -> (Payload, Option<ReplyHandle>) {
        (self.payload, self.reply)
    }
}

type Completion = Box<dyn FnOnce(SyncResult<Payload>) + Send>;
type ActivationHandler = Arc<dyn Fn(ActivationChange) + Send + Sync>;
type ReachabilityHandler = Arc<dyn Fn(bool) + Send + Sync>;
type MessageHandler = Arc<dyn Fn(IncomingMessage) + Send + Sync>;
type ContextHandler = Arc<dyn Fn(Payload) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    activation: Option<ActivationHandler>,
    reachability: Option<ReachabilityHandler>,
    message: Option<MessageHandler>,
    context: Option<ContextHandler>,
}

#[derive(Default)]
struct LinkState {
    activation: ActivationState,
    reachable: bool,
    /// Last activation attempt failed; the next lifecycle event retries
    activation_failed: bool,
    /// Newest context pushed while not activated
    unsent_context: Option<Payload>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    state: Mutex<LinkState>,
    pending: Mutex<HashMap<u64, Completion>>,
    next_request_id: AtomicU64,
    handlers: Mutex<Handlers>,
}

/// Handle to the single channel between this process and its peer
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransportSession")
            .field("activation", &state.activation)
            .field("reachable", &state.reachable)
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

impl TransportSession {
    /// Create a session over a transport. Nothing happens until
    /// [`activate`](Self::activate) is called.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                state: Mutex::new(LinkState::default()),
                pending: Mutex::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
                handlers: Mutex::new(Handlers::default()),
            }),
        }
    }

    /// Spawn a task feeding platform events into this session
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<PlatformEvent>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_platform_event(event);
            }
            debug!("Platform event stream closed");
        })
    }

    pub fn activation_state(&self) -> ActivationState {
        self.inner.state.lock().activation
    }

    pub fn is_activated(&self) -> bool {
        self.activation_state() == ActivationState::Activated
    }

    /// Activated and the peer is currently reachable
    pub fn is_reachable(&self) -> bool {
        let state = self.inner.state.lock();
        state.activation == ActivationState::Activated && state.reachable
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Start activation. No-op unless currently `NotActivated`.
    pub fn activate(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.activation != ActivationState::NotActivated {
                debug!(state = %state.activation, "Activation already in progress or done");
                return;
            }
            state.activation = ActivationState::Activating;
        }
        debug!("Activating session");
        self.inner.transport.activate();
    }

    /// Send a request expecting one reply.
    ///
    /// When the session is not activated and reachable, `on_failure` runs
    /// synchronously with [`SyncError::Unreachable`] and nothing is
    /// transmitted. Otherwise exactly one of `on_reply` or `on_failure` runs
    /// later, or neither if the transport never completes.
    pub fn send_request<R, F>(&self, payload: Payload, on_reply: R, on_failure: F)
    where
        R: FnOnce(Payload) + Send + 'static,
        F: FnOnce(SyncError) + Send + 'static,
    {
        self.dispatch_request(
            payload,
            Box::new(move |result| match result {
                Ok(reply) => on_reply(reply),
                Err(err) => on_failure(err),
            }),
        );
    }

    /// Send a request and wait for its reply.
    ///
    /// There is no timeout; wrap in `tokio::time::timeout` if needed.
    pub async fn request(&self, payload: Payload) -> SyncResult<Payload> {
        let (tx, rx) = oneshot::channel();
        self.dispatch_request(
            payload,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Send a request with a single completion receiving either the reply
    /// or the failure. Same delivery rules as
    /// [`send_request`](Self::send_request).
    pub fn send_request_with<C>(&self, payload: Payload, completion: C)
    where
        C: FnOnce(SyncResult<Payload>) + Send + 'static,
    {
        self.dispatch_request(payload, Box::new(completion));
    }

    fn dispatch_request(&self, payload: Payload, completion: Completion) {
        if !self.is_reachable() {
            debug!("Request not sent, peer unreachable");
            completion(Err(SyncError::Unreachable));
            return;
        }

        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.lock().insert(request_id, completion);

        if let Err(err) = self
            .inner
            .transport
            .send_message(WireMessage::request(request_id, payload))
        {
            warn!(request_id, error = %err, "Failed to send request");
            let err = match err {
                SyncError::TransmissionFailed(reason) => SyncError::TransmissionFailed(reason),
                other => SyncError::TransmissionFailed(other.to_string()),
            };
            self.complete(request_id, Err(err));
        }
    }

    /// Send a message that expects no reply
    pub fn send_direct(&self, payload: Payload) -> SyncResult<()> {
        if !self.is_reachable() {
            return Err(SyncError::Unreachable);
        }
        self.inner.transport.send_message(WireMessage::direct(payload))
    }

    /// Push a context snapshot, replacing any undelivered one.
    ///
    /// Best-effort: failures are logged, never surfaced.
    pub fn push_context(&self, context: &SyncContext) {
        let payload = context.encode();
        {
            let mut state = self.inner.state.lock();
            if state.activation != ActivationState::Activated {
                debug!("Session not activated, holding context until activation");
                state.unsent_context = Some(payload);
                return;
            }
        }
        self.deliver_context(payload);
    }

    fn deliver_context(&self, payload: Payload) {
        match self.inner.transport.update_context(payload) {
            Ok(()) => debug!("Context updated"),
            Err(err) => warn!(error = %err, "Failed to update context"),
        }
    }

    /// Register the activation-changed handler, replacing any previous one
    pub fn on_activation_changed<H>(&self, handler: H)
    where
        H: Fn(ActivationChange) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().activation = Some(Arc::new(handler));
    }

    /// Register the reachability-changed handler, replacing any previous one
    pub fn on_reachability_changed<H>(&self, handler: H)
    where
        H: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().reachability = Some(Arc::new(handler));
    }

    /// Register the handler for inbound requests and direct messages,
    /// replacing any previous one
    pub fn on_message<H>(&self, handler: H)
    where
        H: Fn(IncomingMessage) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().message = Some(Arc::new(handler));
    }

    /// Register the context handler, replacing any previous one
    pub fn on_context<H>(&self, handler: H)
    where
        H: Fn(Payload) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().context = Some(Arc::new(handler));
    }

    /// Apply one platform event. Called by the [`attach`](Self::attach)
    /// pump, or directly by tests.
    pub fn handle_platform_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::ActivationCompleted(Ok(())) => {
                let unsent = {
                    let mut state = self.inner.state.lock();
                    state.activation = ActivationState::Activated;
                    state.activation_failed = false;
                    state.unsent_context.take()
                };
                info!("Session activated");
                self.emit_activation(ActivationChange {
                    success: true,
                    error: None,
                });
                if let Some(payload) = unsent {
                    self.deliver_context(payload);
                }
            }
            PlatformEvent::ActivationCompleted(Err(reason)) => {
                {
                    let mut state = self.inner.state.lock();
                    state.activation = ActivationState::NotActivated;
                    state.reachable = false;
                    state.activation_failed = true;
                }
                warn!(%reason, "Session activation failed");
                self.emit_activation(ActivationChange {
                    success: false,
                    error: Some(reason),
                });
            }
            PlatformEvent::BecameInactive => {
                info!("Session became inactive");
                self.retry_failed_activation();
            }
            PlatformEvent::Deactivated => {
                let was_reachable = {
                    let mut state = self.inner.state.lock();
                    let was_reachable = state.reachable;
                    state.activation = ActivationState::NotActivated;
                    state.reachable = false;
                    was_reachable
                };
                if was_reachable {
                    self.emit_reachability(false);
                }
                self.fail_pending("session deactivated");
                info!("Session deactivated, reactivating");
                self.activate();
            }
            PlatformEvent::ReachabilityChanged(reachable) => {
                self.inner.state.lock().reachable = reachable;
                info!(reachable, "Reachability changed");
                self.emit_reachability(reachable);
                self.retry_failed_activation();
            }
            PlatformEvent::Message(message) => self.handle_message(message),
            PlatformEvent::Context(payload) => {
                let handler = self.inner.handlers.lock().context.clone();
                match handler {
                    Some(handler) => handler(payload),
                    None => debug!("No context handler registered, dropping context"),
                }
            }
            PlatformEvent::DeliveryFailed { request_id, reason } => {
                warn!(request_id, %reason, "Request delivery failed");
                self.complete(request_id, Err(SyncError::TransmissionFailed(reason)));
            }
        }
    }

    fn handle_message(&self, message: WireMessage) {
        if let Some(reply_to) = message.reply_to {
            self.complete(reply_to, Ok(message.payload));
            return;
        }

        let reply = message.request_id.map(|request_id| ReplyHandle {
            request_id,
            transport: self.inner.transport.clone(),
        });
        let incoming = IncomingMessage {
            payload: message.payload,
            reply,
        };

        let handler = self.inner.handlers.lock().message.clone();
        match handler {
            Some(handler) => handler(incoming),
            None => debug!("No message handler registered, dropping message"),
        }
    }

    fn retry_failed_activation(&self) {
        let retry = {
            let state = self.inner.state.lock();
            state.activation_failed && state.activation == ActivationState::NotActivated
        };
        if retry {
            info!("Retrying failed activation");
            self.activate();
        }
    }

    /// Complete every outstanding request with `TransmissionFailed`
    fn fail_pending(&self, reason: &str) {
        let outstanding: Vec<Completion> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, completion)| completion)
            .collect();
        if outstanding.is_empty() {
            return;
        }
        warn!(count = outstanding.len(), %reason, "Failing outstanding requests");
        for completion in outstanding {
            completion(Err(SyncError::TransmissionFailed(reason.to_string())));
        }
    }

    /// Run and forget the completion for `request_id`, if still pending
    fn complete(&self, request_id: u64, result: SyncResult<Payload>) {
        let completion = self.inner.pending.lock().remove(&request_id);
        match completion {
            Some(completion) => completion(result),
            None => debug!(request_id, "No pending request for reply, ignoring"),
        }
    }

    fn emit_activation(&self, change: ActivationChange) {
        let handler = self.inner.handlers.lock().activation.clone();
        if let Some(handler) = handler {
            handler(change);
        }
    }

    fn emit_reachability(&self, reachable: bool) {
        let handler = self.inner.handlers.lock().reachability.clone();
        if let Some(handler) = handler {
            handler(reachable);
        }
    }
}
