//! Property-based tests for the event codec and message routing.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in `decode_client` (returns `Err` gracefully).
//! 2. Client events survive encode → decode with their payload untouched.
//! 3. Scalar room ids map to channel names by their text.
//! 4. Message recipients never include the sender and keep list order.

use chatwire_proto::ChannelName;
use chatwire_proto::event::{self, ClientEvent, ServerEvent};
use chatwire_proto::payload::MessageRouting;
use proptest::prelude::*;
use serde_json::{Value, json};

// --- Strategies ---

/// Strategy for small JSON payloads: scalars, flat arrays, and flat objects.
fn arb_payload() -> impl Strategy<Value = Value> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,32}".prop_map(Value::from),
    ];
    prop_oneof![
        scalar.clone(),
        prop::collection::vec(scalar.clone(), 0..4).prop_map(Value::Array),
        prop::collection::btree_map("[a-z_]{1,8}", scalar, 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect())),
    ]
}

/// Strategy for every client event variant.
fn arb_client_event() -> impl Strategy<Value = ClientEvent> {
    arb_payload().prop_flat_map(|data| {
        prop_oneof![
            Just(ClientEvent::Setup(data.clone())),
            Just(ClientEvent::JoinChat(data.clone())),
            Just(ClientEvent::Typing(data.clone())),
            Just(ClientEvent::StopTyping(data.clone())),
            Just(ClientEvent::NewMessage(data)),
        ]
    })
}

/// Strategy for user ids drawn from a small pool so that collisions with the
/// sender happen often.
fn arb_user_id() -> impl Strategy<Value = String> {
    "u[0-4]"
}

proptest! {
    /// Arbitrary bytes never panic the decoder.
    #[test]
    fn decode_client_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = event::decode_client(&bytes);
    }

    /// Arbitrary bytes never panic the server-side decoder either.
    #[test]
    fn decode_server_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = event::decode_server(&bytes);
    }

    #[test]
    fn client_event_round_trip(ev in arb_client_event()) {
        let text = event::encode_client(&ev).unwrap();
        let decoded = event::decode_client(text.as_bytes()).unwrap();
        prop_assert_eq!(decoded, ev);
    }

    #[test]
    fn message_received_keeps_payload(data in arb_payload()) {
        let ev = ServerEvent::MessageReceived(data);
        let text = event::encode_server(&ev).unwrap();
        prop_assert_eq!(event::decode_server(text.as_bytes()).unwrap(), ev);
    }

    #[test]
    fn string_room_names_are_verbatim(name in ".{0,64}") {
        let channel = ChannelName::from_scalar(&Value::from(name.clone())).unwrap();
        prop_assert_eq!(channel.as_str(), name.as_str());
    }

    #[test]
    fn numeric_room_names_use_decimal_text(n in any::<i64>()) {
        let channel = ChannelName::from_scalar(&json!(n)).unwrap();
        prop_assert_eq!(channel, ChannelName::new(n.to_string()));
    }

    #[test]
    fn recipients_exclude_sender(
        sender in arb_user_id(),
        users in prop::collection::vec(arb_user_id(), 0..12)
    ) {
        let payload = json!({
            "sender": { "_id": sender },
            "chat": {
                "users": users.iter().map(|u| json!({ "_id": u })).collect::<Vec<_>>()
            }
        });
        let routing = MessageRouting::from_payload(&payload).unwrap();
        let recipients: Vec<ChannelName> = routing.recipients().flatten().collect();

        let expected: Vec<ChannelName> = users
            .iter()
            .filter(|u| **u != sender)
            .map(|u| ChannelName::new(u.as_str()))
            .collect();
        prop_assert_eq!(recipients, expected);
    }
}
