// src/core/transfer/pending.rs

//! Records for files stashed on disk until their receiver reconnects.

use crate::core::RelayError;
use chrono::{DateTime, Local};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

/// A file waiting on disk for its receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub received: u64,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Local>,
}

/// Reduces an offered filename to its final path component.
///
/// Clients name files freely; only the last normal component is ever joined
/// onto the storage directory so a name cannot escape it.
pub fn sanitize_filename(filename: &str) -> Result<String, RelayError> {
    let last = Path::new(filename.trim())
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .next_back()
        .map(str::to_string);

    match last {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(RelayError::Validation(format!(
            "invalid filename '{filename}'"
        ))),
    }
}

/// Hands out strictly increasing nanosecond stamps, so two files stashed in
/// the same nanosecond still get distinct storage keys.
#[derive(Debug, Default)]
pub struct UniqueClock {
    last: AtomicI64,
}

impl UniqueClock {
    pub fn next(&self) -> i64 {
        let now = Local::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Local::now().timestamp_micros() * 1_000);
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Builds the globally unique key a stashed file is stored under.
pub fn storage_key(
    clock: &UniqueClock,
    sender_id: &str,
    receiver_id: &str,
    filename: &str,
) -> Result<String, RelayError> {
    let filename = sanitize_filename(filename)?;
    Ok(format!(
        "{}_{}_{}_{}",
        sender_id,
        receiver_id,
        clock.next(),
        filename
    ))
}
