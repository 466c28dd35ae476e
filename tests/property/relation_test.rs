// tests/property/relation_test.rs

//! Property-based tests for relation vector updates.

use chatrelay::core::relation::{RelationState, capacity, decode, encode, friends, state_of};
use proptest::prelude::*;

fn vector_and_peer() -> impl Strategy<Value = (Vec<u8>, usize)> {
    prop::collection::vec(any::<u8>(), 1..32)
        .prop_flat_map(|v| {
            let max_peer = capacity(v.len());
            (Just(v), 1..=max_peer)
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_encode_then_read_back((vector, peer) in vector_and_peer(), state in 0u8..4) {
        let updated = encode(&vector, peer, state).unwrap();
        prop_assert_eq!(updated.len(), vector.len());
        prop_assert_eq!(state_of(&updated, peer).as_u8(), state);
    }

    #[test]
    fn test_encode_only_touches_one_peer((vector, peer) in vector_and_peer(), state in 0u8..4) {
        let updated = encode(&vector, peer, state).unwrap();
        for (other, before) in decode(&vector) {
            if other != peer {
                prop_assert_eq!(state_of(&updated, other), before);
            }
        }
    }

    #[test]
    fn test_encode_is_idempotent((vector, peer) in vector_and_peer(), state in 0u8..4) {
        let once = encode(&vector, peer, state).unwrap();
        let twice = encode(&once, peer, state).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_out_of_range_peers_are_rejected(len in 1usize..32, extra in 1usize..100) {
        let vector = vec![0u8; len];
        prop_assert!(encode(&vector, capacity(len) + extra, 1).is_err());
    }

    #[test]
    fn test_friends_matches_decode(vector in prop::collection::vec(any::<u8>(), 0..32)) {
        let expected: Vec<usize> = decode(&vector)
            .into_iter()
            .filter(|(_, state)| *state == RelationState::Friend)
            .map(|(peer, _)| peer)
            .collect();
        prop_assert_eq!(friends(&vector), expected);
    }
}
