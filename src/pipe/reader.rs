use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::debug;

use super::{PipeError, ReadMode};

/// Reads the event pipe after a change notification.
///
/// In [`ReadMode::WholeFile`] every read returns the full current content, so overlapping writes
/// can be seen twice or merged. [`ReadMode::Tail`] tracks the read offset, holds back an
/// incomplete trailing line until its newline arrives, and starts over when the file shrinks.
#[derive(Debug)]
pub struct PipeReader {
    path: PathBuf,
    mode: ReadMode,
    position: u64,
    pending: Vec<u8>,
}

impl PipeReader {
    /// Reader positioned at the start of `path`.
    pub fn new(path: PathBuf, mode: ReadMode) -> Self {
        Self {
            path,
            mode,
            position: 0,
            pending: Vec::new(),
        }
    }

    /// File being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next payload to forward, or `None` when there is nothing new.
    pub async fn read(&mut self) -> Result<Option<String>, PipeError> {
        let result = match self.mode {
            ReadMode::WholeFile => self.read_whole().await,
            ReadMode::Tail => self.read_tail().await,
        };
        result.map_err(|source| PipeError::Read {
            path: self.path.clone(),
            source,
        })
    }

    async fn read_whole(&self) -> std::io::Result<Option<String>> {
        let bytes = tokio::fs::read(&self.path).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn read_tail(&mut self) -> std::io::Result<Option<String>> {
        let mut file = File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        if len < self.position {
            debug!(path = %self.path.display(), "event pipe truncated; reading from the start");
            self.position = 0;
            self.pending.clear();
        }

        file.seek(SeekFrom::Start(self.position)).await?;
        let mut appended = Vec::new();
        let read = file.read_to_end(&mut appended).await?;
        self.position += read as u64;
        self.pending.extend_from_slice(&appended);

        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(None);
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        Ok(Some(String::from_utf8_lossy(&complete).into_owned()))
    }
}
