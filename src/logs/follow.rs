//! Tail-style reader for a growing log file

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Default delay between polls when the file has no new data
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8192;

/// Follows a file from its end, yielding complete lines as they are appended.
///
/// The file is reopened from the start when it is replaced (new inode on
/// unix) or truncated below the current read position.
pub struct FileFollower {
    path: PathBuf,
    file: File,
    position: u64,
    identity: Option<u64>,
    partial: Vec<u8>,
    pending: VecDeque<String>,
    poll_interval: Duration,
}

impl FileFollower {
    /// Open `path` and position at end-of-file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FollowError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|source| FollowError::Open {
            path: path.clone(),
            source,
        })?;
        let metadata = file.metadata().await.map_err(|source| FollowError::Io {
            path: path.clone(),
            source,
        })?;
        let position = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|source| FollowError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            position,
            identity: file_identity(&metadata),
            partial: Vec::new(),
            pending: VecDeque::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next complete line, without its line terminator
    pub async fn next_line(&mut self) -> Result<String, FollowError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(line);
            }
            if self.read_available().await? > 0 {
                continue;
            }
            if self.reopen_if_replaced().await? {
                continue;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn read_available(&mut self) -> Result<usize, FollowError> {
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let n = self.file.read(&mut buf).await.map_err(|source| FollowError::Io {
                path: self.path.clone(),
                source,
            })?;
            if n == 0 {
                break;
            }
            total += n;
            self.position += n as u64;
            self.partial.extend_from_slice(&buf[..n]);
        }

        while let Some(end) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(end + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.pending
                .push_back(String::from_utf8_lossy(&line).into_owned());
        }
        Ok(total)
    }

    /// Reopen from the start if the path now points at a different or
    /// shorter file. A temporarily missing file is waited on.
    async fn reopen_if_replaced(&mut self) -> Result<bool, FollowError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(FollowError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let identity = file_identity(&metadata);
        let replaced = identity != self.identity;
        let truncated = metadata.len() < self.position;
        if !replaced && !truncated {
            return Ok(false);
        }

        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(FollowError::Open {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        tracing::info!(
            path = %self.path.display(),
            replaced,
            truncated,
            "Log file rotated, reading from start"
        );
        self.file = file;
        self.position = 0;
        self.identity = identity;
        self.partial.clear();
        Ok(true)
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// File following errors
#[derive(Debug, thiserror::Error)]
pub enum FollowError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
