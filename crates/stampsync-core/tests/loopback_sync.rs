//! End-to-End Loopback Sync Tests
//!
//! A host and a companion wired through an in-process `LoopbackLink`, each
//! running its own actor. These cover the full round trip: activation,
//! context delivery, request/reply correlation, and link flaps.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stampsync_core::{
    ButtonAction, CapturedEvent, CompanionHandle, CompanionState, HostHandle, HostSyncController,
    LoopbackLink, MemoryButtonStore, MemoryEventLog, PeerSyncClient, Settings, Side, SyncConfig,
    SystemClock, TimeSnapshot, PLACEHOLDER_TIME,
};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Utilities
// ============================================================================

struct Harness {
    link: LoopbackLink,
    store: Arc<MemoryButtonStore>,
    log: Arc<MemoryEventLog>,
    host: HostHandle,
    companion: CompanionHandle,
}

fn harness(buttons: Vec<ButtonAction>, config: SyncConfig) -> Harness {
    let (link, host_end, companion_end) = LoopbackLink::pair();
    let store = Arc::new(MemoryButtonStore::new(buttons));
    let log = Arc::new(MemoryEventLog::new());

    let host = HostSyncController::new(
        host_end.into_session(),
        store.clone(),
        Arc::new(SystemClock::ElapsedSince(chrono::Utc::now())),
        log.clone(),
    )
    .start(&config);
    let companion = PeerSyncClient::new(companion_end.into_session()).start(&config);

    Harness {
        link,
        store,
        log,
        host,
        companion,
    }
}

/// Config whose timers stay out of the way of the assertions
fn quiet_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 60_000,
        context_republish_secs: None,
    }
}

async fn wait_for_state(
    companion: &CompanionHandle,
    mut predicate: impl FnMut(&CompanionState) -> bool,
) -> CompanionState {
    let mut rx = companion.subscribe();
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("companion state channel closed");
        }
    })
    .await
    .expect("companion state never matched")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held")
}

/// Retry a capture until the companion's session has caught up with the link
async fn capture_eventually(companion: &CompanionHandle, name: &str, color: &str) -> bool {
    tokio::time::timeout(WAIT, async {
        loop {
            if companion.capture(name, color).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_companion_receives_host_buttons() {
    let h = harness(
        vec![ButtonAction::with_id("1", "Coffee", "red")],
        quiet_config(),
    );

    let state = wait_for_state(&h.companion, |s| s.is_connected && !s.buttons.is_empty()).await;
    assert_eq!(state.buttons, vec![ButtonAction::with_id("1", "Coffee", "red")]);
    assert_eq!(state.current_time, PLACEHOLDER_TIME);
}

#[tokio::test]
async fn test_capture_round_trip_records_once() {
    let h = harness(vec![], quiet_config());
    wait_for_state(&h.companion, |s| s.is_connected).await;

    assert!(capture_eventually(&h.companion, "Generic Event", "Default").await);
    assert_eq!(
        h.log.events(),
        vec![CapturedEvent::new("Generic Event", "Default")]
    );
}

#[tokio::test]
async fn test_empty_context_clears_companion_buttons() {
    let h = harness(
        vec![ButtonAction::with_id("1", "Coffee", "red")],
        quiet_config(),
    );
    wait_for_state(&h.companion, |s| s.buttons.len() == 1).await;

    let mut settings = Settings::new();
    settings.insert("theme".to_string(), json!("dark"));
    h.host.publish_context(vec![], settings);

    let state = wait_for_state(&h.companion, |s| s.buttons.is_empty()).await;
    assert_eq!(state.settings.get("theme"), Some(&json!("dark")));
}

#[tokio::test]
async fn test_store_change_reaches_companion() {
    let h = harness(vec![], quiet_config());
    wait_for_state(&h.companion, |s| s.is_connected).await;

    h.store.set_buttons(vec![ButtonAction::with_id("1", "Coffee", "red")]);

    let state = wait_for_state(&h.companion, |s| !s.buttons.is_empty()).await;
    assert_eq!(state.buttons, vec![ButtonAction::with_id("1", "Coffee", "red")]);
}

#[tokio::test]
async fn test_settings_change_reaches_companion() {
    let h = harness(
        vec![ButtonAction::with_id("1", "Coffee", "red")],
        quiet_config(),
    );
    wait_for_state(&h.companion, |s| s.buttons.len() == 1).await;

    let mut settings = Settings::new();
    settings.insert("theme".to_string(), json!("dark"));
    h.store.set_settings(settings);

    let state = wait_for_state(&h.companion, |s| s.settings.contains_key("theme")).await;
    assert_eq!(state.settings.get("theme"), Some(&json!("dark")));
    assert_eq!(state.buttons.len(), 1);
}

#[tokio::test]
async fn test_pushed_buttons_replace_companion_cache() {
    let h = harness(
        vec![ButtonAction::with_id("1", "Coffee", "red")],
        quiet_config(),
    );
    wait_for_state(&h.companion, |s| s.is_connected && s.buttons.len() == 1).await;

    h.host.publish_context(vec![], Settings::new());
    wait_for_state(&h.companion, |s| s.buttons.is_empty()).await;

    wait_until(|| h.host.push_buttons().is_ok()).await;
    let state = wait_for_state(&h.companion, |s| !s.buttons.is_empty()).await;
    assert_eq!(state.buttons, vec![ButtonAction::with_id("1", "Coffee", "red")]);
}

#[tokio::test]
async fn test_time_poll_updates_companion() {
    let config = SyncConfig {
        poll_interval_ms: 20,
        context_republish_secs: None,
    };
    let h = harness(vec![], config);

    let state = wait_for_state(&h.companion, |s| s.current_time != PLACEHOLDER_TIME).await;
    assert!(!state.is_absolute_time);
    assert_eq!(state.current_time.len(), 8);
}

#[tokio::test]
async fn test_pushed_time_applies_without_polling() {
    let h = harness(vec![], quiet_config());
    wait_for_state(&h.companion, |s| s.is_connected).await;

    wait_until(|| h.host.push_time(TimeSnapshot::new("12:00:00", true)).is_ok()).await;
    let state = wait_for_state(&h.companion, |s| s.current_time == "12:00:00").await;
    assert!(state.is_absolute_time);
}

#[tokio::test]
async fn test_flaky_link_disconnects_and_recovers() {
    let h = harness(vec![], quiet_config());
    wait_for_state(&h.companion, |s| s.is_connected).await;

    h.link.set_link_up(false);
    wait_for_state(&h.companion, |s| !s.is_connected).await;
    assert!(!h.companion.capture("Offline", "grey").await);

    h.link.set_link_up(true);
    wait_for_state(&h.companion, |s| s.is_connected).await;
    assert!(capture_eventually(&h.companion, "Online", "green").await);

    assert_eq!(h.log.events(), vec![CapturedEvent::new("Online", "green")]);
}

#[tokio::test]
async fn test_deactivated_companion_reactivates() {
    let h = harness(vec![], quiet_config());
    wait_for_state(&h.companion, |s| s.is_connected).await;

    h.link.deactivate(Side::Companion);
    wait_until(|| h.link.is_reachable()).await;

    assert!(capture_eventually(&h.companion, "After", "blue").await);
}

#[tokio::test]
async fn test_failed_activation_leaves_companion_disconnected() {
    let (link, host_end, companion_end) = LoopbackLink::pair();
    link.fail_next_activation(Side::Companion, "not paired");

    let config = quiet_config();
    let _host = HostSyncController::new(
        host_end.into_session(),
        Arc::new(MemoryButtonStore::default()),
        Arc::new(SystemClock::Absolute),
        Arc::new(MemoryEventLog::new()),
    )
    .start(&config);
    let companion = PeerSyncClient::new(companion_end.into_session()).start(&config);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!link.is_reachable());
    assert!(!companion.state().is_connected);
    assert!(!companion.capture("Coffee", "red").await);
}

#[tokio::test]
async fn test_failed_activation_recovers_on_deactivation() {
    let (link, host_end, companion_end) = LoopbackLink::pair();
    link.fail_next_activation(Side::Companion, "not paired");

    let config = quiet_config();
    let _host = HostSyncController::new(
        host_end.into_session(),
        Arc::new(MemoryButtonStore::new(vec![ButtonAction::with_id(
            "1", "Coffee", "red",
        )])),
        Arc::new(SystemClock::Absolute),
        Arc::new(MemoryEventLog::new()),
    )
    .start(&config);
    let companion = PeerSyncClient::new(companion_end.into_session()).start(&config);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!companion.state().is_connected);

    link.deactivate(Side::Companion);
    link.set_link_up(false);
    link.set_link_up(true);

    let state = wait_for_state(&companion, |s| s.is_connected && s.buttons.len() == 1).await;
    assert_eq!(state.buttons[0].name, "Coffee");
    assert!(capture_eventually(&companion, "Coffee", "red").await);
}
