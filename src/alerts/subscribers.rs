//! Subscriber registry persisted as an append-only id list

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

/// Ordered set of recipient ids.
///
/// The lock only guards the in-memory list; file writes happen after it is
/// released.
pub struct SubscriberStore {
    subscribers: Mutex<Vec<String>>,
    path: Option<PathBuf>,
}

impl SubscriberStore {
    /// Store that is never persisted
    pub fn in_memory() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Load every id from `path`. A missing file means no subscribers yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut subscribers: Vec<String> = Vec::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                for id in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    if !subscribers.iter().any(|s| s == id) {
                        subscribers.push(id.to_string());
                    }
                }
                for id in &subscribers {
                    tracing::info!(subscriber = %id, "Loaded subscriber");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No subscribers yet");
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        }

        Ok(Self {
            subscribers: Mutex::new(subscribers),
            path: Some(path),
        })
    }

    /// Add `id`, returning `false` if it was already subscribed.
    ///
    /// A new id is kept in memory even if appending it to the file fails.
    pub async fn add(&self, id: &str) -> Result<bool, StoreError> {
        {
            let mut subscribers = self.subscribers.lock();
            if subscribers.iter().any(|s| s == id) {
                return Ok(false);
            }
            subscribers.push(id.to_string());
        }

        if let Some(path) = &self.path {
            append_line(path, id)
                .await
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(true)
    }

    /// Copy of the current subscribers in insertion order
    pub fn snapshot(&self) -> Vec<String> {
        self.subscribers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

async fn append_line(path: &Path, id: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", id).as_bytes()).await?;
    file.flush().await
}

/// Subscriber store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Subscriber file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
