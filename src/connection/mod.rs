// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: login, friend-list
//! sync, offline replay, the message loop and teardown.

mod guard;
mod handler;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::{Phase, SessionState};
