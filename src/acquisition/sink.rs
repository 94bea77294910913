//! Raw waveform dump.
//!
//! Successful block payloads are appended back to back, without headers or
//! separators, in the order they were read. The file is truncated when the
//! sink is created.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Append-only file of raw payload bytes.
pub struct RawSink {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl RawSink {
    /// Create (or truncate) the dump file.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        tracing::info!(path = %path.display(), "Raw dump file created");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Dump file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one payload.
    pub async fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        self.writer.write_all(payload).await?;
        self.bytes_written += payload.len() as u64;
        Ok(())
    }

    /// Flush and close the file, returning the total bytes written.
    pub async fn close(mut self) -> io::Result<u64> {
        self.writer.flush().await?;
        self.writer.into_inner().sync_all().await?;
        tracing::info!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            "Raw dump file closed"
        );
        Ok(self.bytes_written)
    }
}
