//! Stream snapshot stores for SevaStream.
//!
//! Two implementations of [`StreamStore`]:
//!
//! - [`MemoryStreamStore`]: a concurrent map, handy for tests and for
//!   processes that want history beyond the scheduler's lifetime.
//! - [`JsonFileStreamStore`]: one pretty-printed JSON file per stream under
//!   a directory, written via a temp file and rename.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sevastream_persistence::JsonFileStreamStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(JsonFileStreamStore::open("./streams").await?);
//! let scheduler = SchedulerBuilder::new(wallet).with_store(store).build();
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use sevastream_core::{Stream, StreamId, StreamStore};
use tokio::fs;
use tracing::warn;

/// In-memory store.
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: DashMap<StreamId, Stream>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn save(&self, stream: &Stream) -> Result<()> {
        self.streams.insert(stream.id, stream.clone());
        Ok(())
    }

    async fn load(&self, id: StreamId) -> Result<Option<Stream>> {
        Ok(self.streams.get(&id).map(|s| s.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Stream>> {
        let mut streams: Vec<Stream> = self.streams.iter().map(|e| e.value().clone()).collect();
        streams.sort_by_key(|s| (s.started_at, s.id));
        Ok(streams)
    }
}

/// Directory of `<stream-id>.json` files.
#[derive(Debug, Clone)]
pub struct JsonFileStreamStore {
    dir: PathBuf,
}

impl JsonFileStreamStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating stream store directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: StreamId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl StreamStore for JsonFileStreamStore {
    async fn save(&self, stream: &Stream) -> Result<()> {
        let path = self.path_for(stream.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(stream)?;

        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, id: StreamId) -> Result<Option<Stream>> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn list(&self) -> Result<Vec<Stream>> {
        let mut streams = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Stream>(&bytes) {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable stream file")
                }
            }
        }

        streams.sort_by_key(|s| (s.started_at, s.id));
        Ok(streams)
    }
}
