//! Property-based tests for chat pairings and the store value tree.
//!
//! Uses proptest to verify:
//! 1. For any pairing `A_B`, the recipient of A is B and of B is A.
//! 2. Any third user is never given a recipient.
//! 3. A value written at a path reads back unchanged, and `Null` removes it.
//! 4. Random bytes never cause a panic in `wire::decode`.

use proptest::prelude::*;
use pairchat_proto::chat_id::{ChatId, ChatIdError};
use pairchat_proto::path::Path;
use pairchat_proto::value::Value;
use pairchat_proto::wire;

/// Strategy for user identifiers (no separator, no reserved characters).
fn arb_user() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,16}"
}

/// Strategy for two distinct users.
fn arb_pair() -> impl Strategy<Value = (String, String)> {
    (arb_user(), arb_user()).prop_filter("participants must differ", |(a, b)| a != b)
}

/// Strategy for leaf values.
fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        ".{0,32}".prop_map(Value::Text),
    ]
}

proptest! {
    #[test]
    fn recipient_is_always_the_other_side((a, b) in arb_pair()) {
        let chat = ChatId::pair(&a, &b).unwrap();
        prop_assert_eq!(chat.recipient_for(&a).unwrap(), b.as_str());
        prop_assert_eq!(chat.recipient_for(&b).unwrap(), a.as_str());
    }

    #[test]
    fn outsiders_have_no_recipient((a, b) in arb_pair(), c in arb_user()) {
        prop_assume!(c != a && c != b);
        let chat = ChatId::pair(&a, &b).unwrap();
        let is_not_participant = matches!(
            chat.recipient_for(&c),
            Err(ChatIdError::NotAParticipant { .. })
        );
        prop_assert!(is_not_participant);
    }

    #[test]
    fn parse_accepts_exactly_what_pair_builds((a, b) in arb_pair()) {
        let raw = format!("{a}_{b}");
        let parsed = ChatId::parse(&raw).unwrap();
        prop_assert_eq!(parsed, ChatId::pair(&a, &b).unwrap());
    }

    #[test]
    fn set_then_get_returns_value(
        segments in prop::collection::vec(arb_user(), 1..5),
        leaf in arb_leaf(),
    ) {
        let path = Path::parse(&segments.join("/")).unwrap();
        let mut root = Value::Null;
        root.set(&path, leaf.clone());
        prop_assert_eq!(root.get(&path), &leaf);
        root.set(&path, Value::Null);
        prop_assert!(root.is_null());
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = wire::decode(&bytes);
    }
}
