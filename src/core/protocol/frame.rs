// src/core/protocol/frame.rs

//! Splits the inbound byte stream into brace-delimited JSON frames and
//! serializes outbound messages as newline-terminated JSON.

use super::message::ServerMessage;
use crate::core::RelayError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default cap on the size of a single inbound frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// A streaming decoder that yields one balanced `{...}` span per frame.
///
/// Bytes before the first opening brace are discarded. Braces inside JSON
/// string literals do not count toward the depth. Anything after the closing
/// brace stays in the buffer, so coalesced messages come out one by one and a
/// message split across reads is reassembled. Binary payloads that follow a
/// `file_transfer` header are read straight out of the remaining buffer by the
/// caller before the next `decode`.
#[derive(Debug)]
pub struct JsonFrameCodec {
    max_frame_size: usize,
    scan: ScanState,
}

/// Progress through a partially received frame, kept between reads so the
/// buffer is only scanned once.
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    started: bool,
    position: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonFrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scan: ScanState::default(),
        }
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for JsonFrameCodec {
    type Item = Bytes;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.scan.started {
            match src.iter().position(|&b| b == b'{') {
                Some(start) => {
                    let _ = src.split_to(start);
                    self.scan = ScanState {
                        started: true,
                        ..ScanState::default()
                    };
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
        }

        let mut state = self.scan;
        let mut frame_end = None;
        for (offset, &byte) in src[state.position..].iter().enumerate() {
            if state.in_string {
                if state.escaped {
                    state.escaped = false;
                } else if byte == b'\\' {
                    state.escaped = true;
                } else if byte == b'"' {
                    state.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => state.in_string = true,
                b'{' => state.depth += 1,
                b'}' => {
                    state.depth -= 1;
                    if state.depth == 0 {
                        frame_end = Some(state.position + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = frame_end {
            self.scan = ScanState::default();
            return Ok(Some(src.split_to(end).freeze()));
        }

        state.position = src.len();
        self.scan = state;
        if src.len() > self.max_frame_size {
            return Err(RelayError::FrameTooLarge(self.max_frame_size));
        }
        Ok(None)
    }
}

impl Encoder<ServerMessage> for JsonFrameCodec {
    type Error = RelayError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| RelayError::Internal(format!("failed to serialize message: {e}")))?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

impl ServerMessage {
    /// Encodes the message as one newline-terminated JSON line.
    pub fn encode_to_bytes(&self) -> Result<Bytes, RelayError> {
        let mut buf = BytesMut::new();
        JsonFrameCodec::default().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Extracts the first balanced brace span from a single buffer, discarding
/// everything around it. Returns `None` if the buffer holds no complete span.
pub fn extract_first_frame(buf: &[u8]) -> Option<Bytes> {
    let mut codec = JsonFrameCodec::new(usize::MAX);
    let mut src = BytesMut::from(buf);
    codec.decode(&mut src).ok().flatten()
}
