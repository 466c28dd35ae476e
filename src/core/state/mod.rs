// src/core/state/mod.rs

//! Defines the central `RelayState` struct and the client registry it owns.

mod client;
mod core;

pub use client::*;
pub use core::RelayState;
