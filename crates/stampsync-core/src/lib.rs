//! StampSync Core Library
//!
//! Host/companion synchronization of buttons, settings and display time.
//!
//! ## Overview
//!
//! A host application owns the canonical list of timestamp buttons and a
//! time source. A companion device keeps a cached copy of both, shows the
//! buttons, and reports presses back to the host. Everything travels over
//! a [`TransportSession`] as action-tagged JSON maps.
//!
//! ## Core Principles
//!
//! - **Host is canonical**: the companion never edits buttons, it only caches
//! - **Best-effort delivery**: no retries, no timeouts; the time poll corrects drift
//! - **One execution context per side**: callbacks are marshalled onto an actor
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stampsync_core::{
//!     ButtonAction, HostSyncController, LoopbackLink, MemoryButtonStore, MemoryEventLog,
//!     PeerSyncClient, SyncConfig, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig::default();
//!     let (_link, host_end, companion_end) = LoopbackLink::pair();
//!
//!     let store = Arc::new(MemoryButtonStore::new(vec![ButtonAction::new("Coffee", "red")]));
//!     let host = HostSyncController::new(
//!         host_end.into_session(),
//!         store,
//!         Arc::new(SystemClock::Absolute),
//!         Arc::new(MemoryEventLog::new()),
//!     )
//!     .start(&config);
//!
//!     let companion = PeerSyncClient::new(companion_end.into_session()).start(&config);
//!     assert!(companion.capture("Coffee", "red").await);
//!
//!     host.shutdown();
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports
pub use client::{CompanionHandle, CompanionState, PeerSyncClient, PLACEHOLDER_TIME};
pub use codec::{Payload, WireMessage};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use host::{
    ButtonStore, EventSink, HostHandle, HostSyncController, MemoryButtonStore, MemoryEventLog,
    SystemClock, TimeSource,
};
pub use protocol::{Action, Reply, Request, TimeUpdate};
pub use transport::{
    ActivationChange, ActivationState, LoopbackLink, PlatformEvent, Side, Transport,
    TransportSession,
};
pub use types::*;
