//! Host-side collaborator interfaces and in-memory implementations
//!
//! The controller never owns canonical state. It asks a [`ButtonStore`] for
//! buttons and settings, a [`TimeSource`] for the display time, and hands
//! captured events to an [`EventSink`]. A store that reports its changes
//! gets every mutation pushed to the companion as a fresh context.

use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::types::{ButtonAction, CapturedEvent, Settings, TimeSnapshot};

/// Canonical button and settings state
pub trait ButtonStore: Send + Sync {
    fn buttons(&self) -> SyncResult<Vec<ButtonAction>>;

    fn settings(&self) -> SyncResult<Settings> {
        Ok(Settings::new())
    }

    /// Revision counter bumped after every mutation of buttons or settings.
    ///
    /// `None` means the store cannot report changes; the host then relies
    /// on explicit publishes and the periodic republish.
    fn subscribe_changes(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Produces the time value shown on the companion
pub trait TimeSource: Send + Sync {
    fn current_time(&self) -> SyncResult<TimeSnapshot>;
}

/// Receives each captured event exactly once
pub trait EventSink: Send + Sync {
    fn record_event(&self, event: CapturedEvent) -> SyncResult<()>;
}

/// Button store backed by memory
///
/// Every mutation bumps the revision seen by [`ButtonStore::subscribe_changes`].
#[derive(Debug)]
pub struct MemoryButtonStore {
    buttons: RwLock<Vec<ButtonAction>>,
    settings: RwLock<Settings>,
    revision: watch::Sender<u64>,
}

impl Default for MemoryButtonStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MemoryButtonStore {
    pub fn new(buttons: Vec<ButtonAction>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            buttons: RwLock::new(buttons),
            settings: RwLock::new(Settings::new()),
            revision,
        }
    }

    pub fn set_buttons(&self, buttons: Vec<ButtonAction>) {
        *self.buttons.write() = buttons;
        self.bump();
    }

    pub fn add_button(&self, button: ButtonAction) {
        self.buttons.write().push(button);
        self.bump();
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
        self.bump();
    }

    /// Current revision; starts at 0
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
        debug!(revision = self.revision(), "Button store changed");
    }
}

impl ButtonStore for MemoryButtonStore {
    fn buttons(&self) -> SyncResult<Vec<ButtonAction>> {
        Ok(self.buttons.read().clone())
    }

    fn settings(&self) -> SyncResult<Settings> {
        Ok(self.settings.read().clone())
    }

    fn subscribe_changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.revision.subscribe())
    }
}

/// Clock-backed time source
#[derive(Debug, Clone)]
pub enum SystemClock {
    /// Local wall-clock time, `HH:MM:SS`
    Absolute,
    /// Time elapsed since a reference instant, `HH:MM:SS`
    ElapsedSince(DateTime<Utc>),
}

impl SystemClock {
    /// Format a non-negative number of seconds as `HH:MM:SS`
    pub fn format_elapsed(total_secs: i64) -> String {
        let total = total_secs.max(0);
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total / 60) % 60,
            total % 60
        )
    }
}

impl TimeSource for SystemClock {
    fn current_time(&self) -> SyncResult<TimeSnapshot> {
        Ok(match self {
            SystemClock::Absolute => {
                TimeSnapshot::new(Local::now().format("%H:%M:%S").to_string(), true)
            }
            SystemClock::ElapsedSince(start) => {
                let elapsed = (Utc::now() - *start).num_seconds();
                TimeSnapshot::new(Self::format_elapsed(elapsed), false)
            }
        })
    }
}

/// Event sink that keeps captured events in memory and logs them
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<CapturedEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemoryEventLog {
    fn record_event(&self, event: CapturedEvent) -> SyncResult<()> {
        info!(button = %event.button_name, color = %event.color, "Event captured");
        self.events.lock().push(event);
        Ok(())
    }
}
