// src/core/transfer/mod.rs

//! The file transfer engine: live relay between two connected clients, or
//! store-and-forward through the local disk when the receiver is offline.

use crate::core::metrics;
use crate::core::persistence::{FILE_SENTINEL_PREFIX, Persistence, StorageError};
use crate::core::protocol::{FileHeader, ServerMessage};
use crate::core::state::Client;
use crate::core::RelayError;
use chrono::Local;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod pending;

pub use pending::{PendingFile, UniqueClock, sanitize_filename, storage_key};

/// Default size of one transfer chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FileTransferEngine {
    storage_path: PathBuf,
    chunk_size: usize,
    max_file_size: u64,
    clock: UniqueClock,
    /// The pending-file table. The same lock is held for the disk side of a
    /// store or a retrieval, so a slow transfer delays other table lookups.
    pending: Mutex<HashMap<String, PendingFile>>,
}

impl FileTransferEngine {
    pub fn new(storage_path: impl Into<PathBuf>, chunk_size: usize, max_file_size: u64) -> Self {
        Self {
            storage_path: storage_path.into(),
            chunk_size: chunk_size.max(1),
            max_file_size,
            clock: UniqueClock::default(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Rejects offers above the configured limit. `0` means unlimited.
    pub fn check_size(&self, size: u64) -> Result<(), RelayError> {
        if self.max_file_size > 0 && size > self.max_file_size {
            return Err(RelayError::Validation(format!(
                "file of {} bytes exceeds the limit of {} bytes",
                size, self.max_file_size
            )));
        }
        Ok(())
    }

    /// Streams `header.size` bytes from `source` straight to a connected receiver.
    ///
    /// The receiver's write half is held for the whole transfer so nothing
    /// else gets written into the middle of the payload.
    pub async fn relay_live<R>(
        &self,
        header: &FileHeader,
        source: &mut R,
        receiver: &Client,
    ) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let notify = ServerMessage::file_notify(&header.filename, header.size, &header.sender_id)
            .encode_to_bytes()?;

        let mut writer = receiver.lock_writer().await;
        writer.write_all(&notify).await?;

        let transferred = copy_exact(
            source,
            &mut *writer,
            header.size,
            self.chunk_size,
            &header.filename,
        )
        .await?;
        writer.flush().await?;

        metrics::FILES_TOTAL.with_label_values(&["relayed"]).inc();
        info!(
            "File '{}' relayed from {} to {} ({} bytes).",
            header.filename, header.sender_id, header.receiver_id, transferred
        );
        Ok(transferred)
    }

    /// Writes `header.size` bytes from `source` to disk, records the pending
    /// file and queues a sentinel message for the receiver. Returns the key.
    ///
    /// A partial file is deleted on any failure.
    pub async fn store<R>(
        &self,
        header: &FileHeader,
        source: &mut R,
        store: &dyn Persistence,
    ) -> Result<String, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let key = storage_key(
            &self.clock,
            &header.sender_id,
            &header.receiver_id,
            &header.filename,
        )?;
        let path = self.storage_path.join(&key);

        let mut pending = self.pending.lock().await;

        fs::create_dir_all(&self.storage_path).await?;
        let received = match write_payload(&path, source, header.size, self.chunk_size).await {
            Ok(received) => received,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e);
            }
        };

        pending.insert(
            key.clone(),
            PendingFile {
                filename: header.filename.clone(),
                path: path.clone(),
                size: header.size,
                received,
                sender_id: header.sender_id.clone(),
                receiver_id: header.receiver_id.clone(),
                created_at: Local::now(),
            },
        );

        let sentinel = format!("{FILE_SENTINEL_PREFIX}{key}");
        if let Err(e) = store
            .enqueue_offline_message(&header.sender_id, &header.receiver_id, &sentinel)
            .await
        {
            pending.remove(&key);
            remove_quietly(&path).await;
            return Err(e.into());
        }

        metrics::FILES_TOTAL.with_label_values(&["stored"]).inc();
        metrics::PENDING_FILES.set(pending.len() as f64);
        info!(
            "File '{}' stashed at {}, waiting for receiver {}.",
            header.filename,
            path.display(),
            header.receiver_id
        );
        Ok(key)
    }

    /// Sends a stashed file to its now-connected receiver, then deletes both
    /// the backing file and the pending record.
    pub async fn retrieve(&self, key: &str, receiver: &Client) -> Result<u64, RelayError> {
        let receiver_id = receiver.id();
        let mut pending = self.pending.lock().await;

        let file = match pending.get(key) {
            Some(file) if file.receiver_id == receiver_id => file.clone(),
            Some(_) => {
                return Err(RelayError::Validation(format!(
                    "pending file '{key}' is not addressed to {receiver_id}"
                )));
            }
            None => {
                return Err(StorageError::NotFound(format!("pending file '{key}'")).into());
            }
        };

        let notify =
            ServerMessage::file_notify(&file.filename, file.size, &file.sender_id).encode_to_bytes()?;
        let mut source = File::open(&file.path).await?;

        let mut writer = receiver.lock_writer().await;
        writer.write_all(&notify).await?;
        let sent = copy_exact(
            &mut source,
            &mut *writer,
            file.size,
            self.chunk_size,
            &file.filename,
        )
        .await?;
        writer.flush().await?;
        drop(writer);
        drop(source);

        remove_quietly(&file.path).await;
        pending.remove(key);

        metrics::FILES_TOTAL.with_label_values(&["retrieved"]).inc();
        metrics::PENDING_FILES.set(pending.len() as f64);
        info!("Offline file '{}' delivered to {}.", file.filename, receiver_id);
        Ok(sent)
    }

    /// Reads and throws away a payload that will not be delivered, keeping the
    /// stream aligned on the next message.
    pub async fn discard<R>(&self, source: &mut R, size: u64) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        copy_exact(source, &mut tokio::io::sink(), size, self.chunk_size, "<discarded>").await
    }

    pub async fn pending_file(&self, key: &str) -> Option<PendingFile> {
        self.pending.lock().await.get(key).cloned()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

async fn write_payload<R>(
    path: &Path,
    source: &mut R,
    size: u64,
    chunk_size: usize,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::create(path).await?;
    let name = path.display().to_string();
    let received = copy_exact(source, &mut file, size, chunk_size, &name).await?;
    file.sync_all().await?;
    Ok(received)
}

/// Copies exactly `size` bytes in chunks of at most `chunk_size`.
async fn copy_exact<R, W>(
    source: &mut R,
    sink: &mut W,
    size: u64,
    chunk_size: usize,
    label: &str,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.min(size.max(1) as usize)];
    let mut transferred: u64 = 0;

    while transferred < size {
        let want = buf.len().min((size - transferred) as usize);
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended after {transferred} of {size} bytes"),
            )
            .into());
        }
        sink.write_all(&buf[..n]).await?;
        transferred += n as u64;
        metrics::FILE_BYTES_TRANSFERRED_TOTAL.inc_by(n as f64);
        debug!(
            "Transfer progress for '{}': {}/{} ({:.2}%)",
            label,
            transferred,
            size,
            transferred as f64 * 100.0 / size as f64
        );
    }
    Ok(transferred)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!("Failed to remove file {}: {}", path.display(), e);
    }
}
