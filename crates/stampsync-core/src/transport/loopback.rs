//! In-process transport pair
//!
//! Connects a host endpoint and a companion endpoint inside one process.
//! Frames cross the link as JSON bytes, reachability can be toggled, and
//! each direction keeps only the newest undelivered context.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::session::TransportSession;
use super::{PlatformEvent, Transport};
use crate::codec::{Payload, WireMessage};
use crate::error::{SyncError, SyncResult};

/// Which end of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Companion,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Host => 0,
            Side::Companion => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::Host => Side::Companion,
            Side::Companion => Side::Host,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Host => write!(f, "host"),
            Side::Companion => write!(f, "companion"),
        }
    }
}

struct LinkState {
    /// Whether the radio path between the two sides is up
    link_up: bool,
    activated: [bool; 2],
    /// Next activation attempt on a side fails with this reason
    activation_failure: [Option<String>; 2],
    /// Newest undelivered context, indexed by destination side
    pending_context: [Option<Payload>; 2],
}

impl LinkState {
    fn reachable(&self) -> bool {
        self.link_up && self.activated[0] && self.activated[1]
    }
}

struct LinkInner {
    state: Mutex<LinkState>,
    events: [mpsc::UnboundedSender<PlatformEvent>; 2],
}

impl LinkInner {
    fn emit(&self, side: Side, event: PlatformEvent) -> bool {
        self.events[side.index()].send(event).is_ok()
    }

    fn emit_reachability(&self, reachable: bool) {
        self.emit(Side::Host, PlatformEvent::ReachabilityChanged(reachable));
        self.emit(Side::Companion, PlatformEvent::ReachabilityChanged(reachable));
    }

    /// Deliver held contexts; caller holds the state lock and has checked
    /// reachability
    fn flush_contexts(&self, state: &mut LinkState) {
        for side in [Side::Host, Side::Companion] {
            if let Some(context) = state.pending_context[side.index()].take() {
                debug!(to = %side, "Delivering held context");
                self.emit(side, PlatformEvent::Context(context));
            }
        }
    }

    /// Run a state change and emit reachability/context events if the
    /// effective reachability flipped
    fn transition(&self, change: impl FnOnce(&mut LinkState)) {
        let mut state = self.state.lock();
        let before = state.reachable();
        change(&mut *state);
        let after = state.reachable();
        if before != after {
            info!(reachable = after, "Loopback reachability changed");
            self.emit_reachability(after);
            if after {
                self.flush_contexts(&mut *state);
            }
        }
    }
}

/// Control handle for a loopback link
#[derive(Clone)]
pub struct LoopbackLink {
    inner: Arc<LinkInner>,
}

/// One end of a loopback link: its transport and the event stream to feed
/// into a [`TransportSession`]
pub struct LoopbackEndpoint {
    pub transport: Arc<LoopbackTransport>,
    pub events: mpsc::UnboundedReceiver<PlatformEvent>,
}

impl LoopbackEndpoint {
    /// Build a session over this endpoint and spawn its event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn into_session(self) -> TransportSession {
        let session = TransportSession::new(self.transport);
        session.attach(self.events);
        session
    }
}

impl LoopbackLink {
    /// Create a link with the radio path up; both sides still need to
    /// activate before they are reachable
    pub fn pair() -> (LoopbackLink, LoopbackEndpoint, LoopbackEndpoint) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (companion_tx, companion_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(LinkInner {
            state: Mutex::new(LinkState {
                link_up: true,
                activated: [false, false],
                activation_failure: [None, None],
                pending_context: [None, None],
            }),
            events: [host_tx, companion_tx],
        });

        let endpoint = |side: Side, events| LoopbackEndpoint {
            transport: Arc::new(LoopbackTransport {
                side,
                link: inner.clone(),
            }),
            events,
        };
        let host = endpoint(Side::Host, host_rx);
        let companion = endpoint(Side::Companion, companion_rx);

        (LoopbackLink { inner }, host, companion)
    }

    /// Bring the radio path up or down
    pub fn set_link_up(&self, up: bool) {
        self.inner.transition(|state| state.link_up = up);
    }

    /// Whether both sides are activated and the path is up
    pub fn is_reachable(&self) -> bool {
        self.inner.state.lock().reachable()
    }

    /// Make the next activation attempt on `side` fail
    pub fn fail_next_activation(&self, side: Side, reason: impl Into<String>) {
        self.inner.state.lock().activation_failure[side.index()] = Some(reason.into());
    }

    /// Simulate the platform deactivating one side
    pub fn deactivate(&self, side: Side) {
        self.inner.emit(side, PlatformEvent::BecameInactive);
        self.inner
            .transition(|state| state.activated[side.index()] = false);
        self.inner.emit(side, PlatformEvent::Deactivated);
    }
}

/// [`Transport`] implementation for one side of a [`LoopbackLink`]
pub struct LoopbackTransport {
    side: Side,
    link: Arc<LinkInner>,
}

impl Transport for LoopbackTransport {
    fn activate(&self) {
        let failure = self.link.state.lock().activation_failure[self.side.index()].take();
        if let Some(reason) = failure {
            self.link
                .emit(self.side, PlatformEvent::ActivationCompleted(Err(reason)));
            return;
        }

        self.link
            .emit(self.side, PlatformEvent::ActivationCompleted(Ok(())));
        let index = self.side.index();
        self.link.transition(|state| state.activated[index] = true);
    }

    fn send_message(&self, message: WireMessage) -> SyncResult<()> {
        if !self.link.state.lock().reachable() {
            return Err(SyncError::TransmissionFailed(
                "peer not reachable".to_string(),
            ));
        }

        let bytes = message.to_bytes()?;
        let message = match WireMessage::from_bytes(&bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "Dropping undecodable frame");
                return Ok(());
            }
        };

        if self.link.emit(self.side.other(), PlatformEvent::Message(message)) {
            Ok(())
        } else {
            Err(SyncError::TransmissionFailed("peer session closed".to_string()))
        }
    }

    fn update_context(&self, context: Payload) -> SyncResult<()> {
        let to = self.side.other();
        let mut state = self.link.state.lock();
        if state.reachable() {
            self.link.emit(to, PlatformEvent::Context(context));
        } else {
            debug!(%to, "Peer unreachable, holding context");
            state.pending_context[to.index()] = Some(context);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlatformEvent>) -> Vec<PlatformEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn context(n: i64) -> Payload {
        json!({"buttons": [], "settings": {}, "timestamp": n})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_reachable_after_both_sides_activate() {
        let (link, mut host, mut companion) = LoopbackLink::pair();

        host.transport.activate();
        assert!(!link.is_reachable());
        assert_eq!(
            drain(&mut host.events),
            vec![PlatformEvent::ActivationCompleted(Ok(()))]
        );

        companion.transport.activate();
        assert!(link.is_reachable());
        assert_eq!(
            drain(&mut host.events),
            vec![PlatformEvent::ReachabilityChanged(true)]
        );
        assert_eq!(
            drain(&mut companion.events),
            vec![
                PlatformEvent::ActivationCompleted(Ok(())),
                PlatformEvent::ReachabilityChanged(true)
            ]
        );
    }

    #[test]
    fn test_send_fails_when_link_down() {
        let (link, host, companion) = LoopbackLink::pair();
        host.transport.activate();
        companion.transport.activate();
        link.set_link_up(false);

        let err = companion
            .transport
            .send_message(WireMessage::direct(Payload::new()))
            .unwrap_err();
        assert!(matches!(err, SyncError::TransmissionFailed(_)));
    }

    #[test]
    fn test_message_crosses_link() {
        let (_link, mut host, companion) = LoopbackLink::pair();
        host.transport.activate();
        companion.transport.activate();
        drain(&mut host.events);

        let payload = json!({"action": "requestButtons"}).as_object().cloned().unwrap();
        let msg = WireMessage::request(1, payload);
        companion.transport.send_message(msg.clone()).unwrap();
        assert_eq!(drain(&mut host.events), vec![PlatformEvent::Message(msg)]);
    }

    #[test]
    fn test_context_last_write_wins_while_unreachable() {
        let (link, host, mut companion) = LoopbackLink::pair();
        host.transport.activate();
        companion.transport.activate();
        link.set_link_up(false);
        drain(&mut companion.events);

        host.transport.update_context(context(1)).unwrap();
        host.transport.update_context(context(2)).unwrap();
        assert!(drain(&mut companion.events).is_empty());

        link.set_link_up(true);
        assert_eq!(
            drain(&mut companion.events),
            vec![
                PlatformEvent::ReachabilityChanged(true),
                PlatformEvent::Context(context(2))
            ]
        );
    }

    #[test]
    fn test_failed_activation_then_retry() {
        let (link, mut host, _companion) = LoopbackLink::pair();
        link.fail_next_activation(Side::Host, "not paired");

        host.transport.activate();
        assert_eq!(
            drain(&mut host.events),
            vec![PlatformEvent::ActivationCompleted(Err("not paired".into()))]
        );

        host.transport.activate();
        assert_eq!(
            drain(&mut host.events),
            vec![PlatformEvent::ActivationCompleted(Ok(()))]
        );
    }

    #[test]
    fn test_deactivate_emits_lifecycle_events() {
        let (link, mut host, mut companion) = LoopbackLink::pair();
        host.transport.activate();
        companion.transport.activate();
        drain(&mut host.events);
        drain(&mut companion.events);

        link.deactivate(Side::Host);
        assert!(!link.is_reachable());
        assert_eq!(
            drain(&mut host.events),
            vec![
                PlatformEvent::BecameInactive,
                PlatformEvent::ReachabilityChanged(false),
                PlatformEvent::Deactivated
            ]
        );
        assert_eq!(
            drain(&mut companion.events),
            vec![PlatformEvent::ReachabilityChanged(false)]
        );
    }
}
