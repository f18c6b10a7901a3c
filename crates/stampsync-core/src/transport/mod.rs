//! Transport layer between host and companion
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Transport (trait)                                              │
//! │  └── platform primitive: activate, send_message, update_context │
//! │          │                                                      │
//! │          │ PlatformEvent (mpsc, any thread)                     │
//! │          ▼                                                      │
//! │  TransportSession                                               │
//! │  ├── activation + reachability state                            │
//! │  ├── pending: HashMap<request_id, completion>                   │
//! │  ├── latest unsent context (last-write-wins)                    │
//! │  └── one handler per event kind                                 │
//! │      (activation, reachability, message, context)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`loopback`] provides an in-process transport pair used by tests and
//! the CLI demo.

pub mod loopback;
pub mod session;

pub use loopback::{LoopbackEndpoint, LoopbackLink, LoopbackTransport, Side};
pub use session::{
    ActivationChange, ActivationState, IncomingMessage, ReplyHandle, TransportSession,
};

use crate::codec::{Payload, WireMessage};
use crate::error::SyncResult;

/// The underlying pub/sub + RPC primitive a session runs on
///
/// Implementations report completions and inbound traffic back to the
/// session as [`PlatformEvent`]s, from whatever thread they like.
pub trait Transport: Send + Sync + 'static {
    /// Begin activation; completion is reported as
    /// [`PlatformEvent::ActivationCompleted`]
    fn activate(&self);

    /// Hand a framed message to the platform.
    ///
    /// An `Err` means the message never left; asynchronous delivery failures
    /// are reported as [`PlatformEvent::DeliveryFailed`].
    fn send_message(&self, message: WireMessage) -> SyncResult<()>;

    /// Replace the pending context for the peer. Delivered once the peer is
    /// reachable; an undelivered earlier context is discarded.
    fn update_context(&self, context: Payload) -> SyncResult<()>;
}

/// Notifications from the platform to a [`TransportSession`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Activation finished, with an error description on failure
    ActivationCompleted(Result<(), String>),
    /// Session is winding down; a `Deactivated` follows
    BecameInactive,
    /// Session was deactivated by the platform
    Deactivated,
    /// Peer reachability flipped
    ReachabilityChanged(bool),
    /// A request, reply or direct message arrived
    Message(WireMessage),
    /// A context snapshot arrived
    Context(Payload),
    /// A previously sent request could not be delivered
    DeliveryFailed { request_id: u64, reason: String },
}
