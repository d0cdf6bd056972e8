//! Stream persistence seam.
//!
//! The engine keeps its authoritative state in memory. A [`StreamStore`]
//! receives a snapshot after every mutation through a single ordered
//! write-behind task, so a slow store never adds latency to a tick and
//! snapshots of the same stream land in the order they were taken.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::stream::{Stream, StreamId};

/// Where stream snapshots go.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Insert or replace the snapshot for `stream.id`.
    async fn save(&self, stream: &Stream) -> Result<()>;

    async fn load(&self, id: StreamId) -> Result<Option<Stream>>;

    async fn list(&self) -> Result<Vec<Stream>>;
}

/// Sender half of the write-behind queue.
#[derive(Clone)]
pub(crate) struct Persister {
    tx: mpsc::UnboundedSender<Stream>,
}

impl Persister {
    /// Spawn the writer task for `store`. Must be called inside a runtime.
    pub(crate) fn spawn(store: Arc<dyn StreamStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Stream>();
        tokio::spawn(async move {
            while let Some(stream) = rx.recv().await {
                if let Err(e) = store.save(&stream).await {
                    warn!(stream_id = %stream.id, error = %e, "Failed to persist stream snapshot");
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn persist(&self, stream: &Stream) {
        if self.tx.send(stream.clone()).is_err() {
            warn!(stream_id = %stream.id, "Stream store writer has shut down");
        }
    }
}
