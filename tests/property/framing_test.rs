// tests/property/framing_test.rs

//! Property-based tests for the brace-matching stream framer.

use bytes::BytesMut;
use chatrelay::core::protocol::{JsonFrameCodec, extract_first_frame};
use proptest::prelude::*;
use serde_json::json;
use tokio_util::codec::Decoder;

fn chat_frame(content: &str) -> Vec<u8> {
    json!({"type": "message", "receiveid": "9", "content": content})
        .to_string()
        .into_bytes()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_noise_around_a_frame_is_ignored(
        prefix in "[^{]{0,40}",
        content in ".{0,200}",
        suffix in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let frame = chat_frame(&content);
        let mut buf = prefix.into_bytes();
        buf.extend_from_slice(&frame);
        buf.extend_from_slice(&suffix);

        let extracted = extract_first_frame(&buf).unwrap();
        prop_assert_eq!(&extracted[..], &frame[..]);
    }

    #[test]
    fn test_any_split_point_yields_the_same_frames(
        contents in prop::collection::vec(".{0,50}", 1..5),
        split in any::<prop::sample::Index>(),
    ) {
        let frames: Vec<Vec<u8>> = contents.iter().map(|c| chat_frame(c)).collect();
        let wire: Vec<u8> = frames.concat();
        let cut = split.index(wire.len() + 1);

        let mut codec = JsonFrameCodec::new(usize::MAX);
        let mut buf = BytesMut::from(&wire[..cut]);
        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            decoded.push(frame.to_vec());
        }
        buf.extend_from_slice(&wire[cut..]);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            decoded.push(frame.to_vec());
        }

        prop_assert_eq!(decoded, frames);
    }
}
