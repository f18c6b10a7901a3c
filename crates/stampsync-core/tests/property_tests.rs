//! Property-based tests for the wire vocabulary
//!
//! Uses proptest to check that values survive the trip through payload maps
//! and JSON frames, and that the action discriminator is authoritative.

use proptest::prelude::*;
use serde_json::Value;
use stampsync_core::codec::{self, Payload};
use stampsync_core::{ButtonAction, Request, Settings, SyncContext, WireMessage};

// ============================================================================
// Strategy Generators
// ============================================================================

fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 #_-]{0,40}").expect("valid regex")
}

fn button_strategy() -> impl Strategy<Value = ButtonAction> {
    (label_strategy(), label_strategy(), label_strategy())
        .prop_map(|(id, name, color)| ButtonAction::with_id(id, name, color))
}

fn buttons_strategy() -> impl Strategy<Value = Vec<ButtonAction>> {
    prop::collection::vec(button_strategy(), 0..20)
}

fn settings_strategy() -> impl Strategy<Value = Settings> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..5).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect()
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_button_list_survives_wire(buttons in buttons_strategy()) {
        let value = ButtonAction::list_to_value(&buttons);
        let bytes = serde_json::to_vec(&value).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        prop_assert_eq!(ButtonAction::list_from_value(&parsed), Some(buttons));
    }

    #[test]
    fn prop_context_survives_frame(buttons in buttons_strategy(), settings in settings_strategy()) {
        let context = SyncContext::new(buttons, settings);
        let frame = WireMessage::direct(context.encode()).to_bytes().unwrap();
        let received = WireMessage::from_bytes(&frame).unwrap();

        let decoded = SyncContext::decode(&received.payload).unwrap();
        prop_assert_eq!(decoded.buttons, context.buttons);
        prop_assert_eq!(decoded.settings, context.settings);
    }

    #[test]
    fn prop_capture_request_round_trips(name in label_strategy(), color in label_strategy()) {
        let request = Request::capture(name, color);
        prop_assert_eq!(Request::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn prop_action_discriminator_wins(action in "[a-zA-Z]{1,20}", spoofed in "[a-zA-Z]{1,20}") {
        let mut extra = Payload::new();
        extra.insert("action".to_string(), Value::String(spoofed));
        extra.insert("other".to_string(), Value::Bool(true));

        let (decoded, rest) = codec::decode(&codec::encode(&action, extra)).unwrap();
        prop_assert_eq!(decoded, action);
        prop_assert_eq!(rest.get("other"), Some(&Value::Bool(true)));
    }

    #[test]
    fn prop_request_ids_correlate(id in any::<u64>(), buttons in buttons_strategy()) {
        let mut payload = Payload::new();
        payload.insert("buttons".to_string(), ButtonAction::list_to_value(&buttons));

        let reply = WireMessage::reply(id, payload);
        let received = WireMessage::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(received.reply_to, Some(id));
        prop_assert_eq!(received.request_id, None);
    }
}
