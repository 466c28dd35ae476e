// src/core/relation.rs

//! The bit-packed relationship vector stored with every account.
//!
//! Each peer id `p >= 1` owns a 2-bit field. Peer `p` lives in byte
//! `len - 1 - (p - 1) / 4`, at bit offset `((p - 1) % 4) * 2`, so the first
//! four peers occupy the last byte, least-significant pair first. Peer id 0 is
//! the account itself and is never packed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of 2-bit peer fields held by one byte.
const PEERS_PER_BYTE: usize = 4;
const FIELD_MASK: u8 = 0b11;

/// Default vector length in bytes, addressing 32 peers.
pub const DEFAULT_RELATION_BYTES: usize = 8;

/// Errors raised when a relation update is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationError {
    #[error("peer id must be at least 1, got {0}")]
    PeerIdTooSmall(usize),

    #[error("peer id {peer} exceeds the vector capacity of {capacity} peers")]
    PeerIdOutOfRange { peer: usize, capacity: usize },

    #[error("relation state must be between 0 and 3, got {0}")]
    InvalidState(u8),
}

/// The relationship an account holds toward one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelationState {
    #[default]
    None = 0,
    Friend = 1,
    Pending = 2,
    Blocked = 3,
}

impl RelationState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_bits(bits: u8) -> Self {
        match bits & FIELD_MASK {
            0 => RelationState::None,
            1 => RelationState::Friend,
            2 => RelationState::Pending,
            _ => RelationState::Blocked,
        }
    }
}

impl TryFrom<u8> for RelationState {
    type Error = RelationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > FIELD_MASK {
            return Err(RelationError::InvalidState(value));
        }
        Ok(Self::from_bits(value))
    }
}

impl fmt::Display for RelationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationState::None => "none",
            RelationState::Friend => "friend",
            RelationState::Pending => "pending",
            RelationState::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// Returns how many peers a vector of `len` bytes can address.
pub fn capacity(len: usize) -> usize {
    len * PEERS_PER_BYTE
}

/// Maps a peer id to the byte holding its field and the field's bit offset.
fn locate(len: usize, peer: usize) -> (usize, u32) {
    let slot = peer - 1;
    let byte_index = len - 1 - slot / PEERS_PER_BYTE;
    let bit_offset = ((slot % PEERS_PER_BYTE) * 2) as u32;
    (byte_index, bit_offset)
}

/// Returns a copy of `vector` with `peer`'s field set to `state`.
///
/// The input is never modified; on error nothing is returned.
pub fn encode(vector: &[u8], peer: usize, state: u8) -> Result<Vec<u8>, RelationError> {
    if peer < 1 {
        return Err(RelationError::PeerIdTooSmall(peer));
    }
    let state = RelationState::try_from(state)?;
    let capacity = capacity(vector.len());
    if peer > capacity {
        return Err(RelationError::PeerIdOutOfRange { peer, capacity });
    }

    let mut result = vector.to_vec();
    let (byte_index, bit_offset) = locate(result.len(), peer);
    result[byte_index] &= !(FIELD_MASK << bit_offset);
    result[byte_index] |= state.as_u8() << bit_offset;
    Ok(result)
}

/// Reads the state of a single peer. Out-of-range peers read as `None`.
pub fn state_of(vector: &[u8], peer: usize) -> RelationState {
    if peer < 1 || peer > capacity(vector.len()) {
        return RelationState::None;
    }
    let (byte_index, bit_offset) = locate(vector.len(), peer);
    RelationState::from_bits(vector[byte_index] >> bit_offset)
}

/// Produces every peer id from 1 to the vector's capacity with its state.
pub fn decode(vector: &[u8]) -> Vec<(usize, RelationState)> {
    (1..=capacity(vector.len()))
        .map(|peer| (peer, state_of(vector, peer)))
        .collect()
}

/// The peers currently in the `Friend` state, in ascending id order.
pub fn friends(vector: &[u8]) -> Vec<usize> {
    decode(vector)
        .into_iter()
        .filter(|(_, state)| *state == RelationState::Friend)
        .map(|(peer, _)| peer)
        .collect()
}

/// An owned relation vector with a fixed length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationVector(Vec<u8>);

impl RelationVector {
    /// Creates an all-`None` vector of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn capacity(&self) -> usize {
        capacity(self.0.len())
    }

    /// Returns the updated vector, leaving `self` untouched.
    pub fn with(&self, peer: usize, state: RelationState) -> Result<Self, RelationError> {
        encode(&self.0, peer, state.as_u8()).map(Self)
    }

    pub fn get(&self, peer: usize) -> RelationState {
        state_of(&self.0, peer)
    }

    pub fn decode(&self) -> Vec<(usize, RelationState)> {
        decode(&self.0)
    }

    pub fn friends(&self) -> Vec<usize> {
        friends(&self.0)
    }
}

impl Default for RelationVector {
    fn default() -> Self {
        Self::zeroed(DEFAULT_RELATION_BYTES)
    }
}
