// src/core/handler/actions/mod.rs

// The router reaches these as `actions::module::function`.
pub mod account;
pub mod chat;
pub mod file;
