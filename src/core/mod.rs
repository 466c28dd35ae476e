// src/core/mod.rs

//! The central module containing the core logic and data structures of the relay.

pub mod auth;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod relation;
pub mod state;
pub mod transfer;

pub use errors::RelayError;
