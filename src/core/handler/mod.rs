// src/core/handler/mod.rs

mod actions;

pub mod router;

pub use actions::chat::Delivery;
pub use actions::file::FileOutcome;
pub use router::{RouteResponse, Router};
