//! FileSink - appends published frames to a JSON-lines file

use contracts::{ContractError, DataSink, PublishedFrame};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

const DEFAULT_FLUSH_EVERY: u64 = 30;

/// Configuration for FileSink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    /// Output file, one JSON document per line
    pub path: PathBuf,
    /// Keep existing content instead of truncating
    pub append: bool,
    /// Flush the buffer after this many frames (0 = only on flush/close)
    pub flush_every: u64,
}

impl FileSinkConfig {
    /// Read `path`, `append` and `flush_every` from sink params.
    pub fn from_params(params: &HashMap<String, String>) -> std::io::Result<Self> {
        let path = params.get("path").map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing 'path' param")
        })?;
        let append = match params.get("append").map(|v| v.to_lowercase()) {
            None => false,
            Some(v) => matches!(v.as_str(), "true" | "yes" | "1" | "on"),
        };
        let flush_every = match params.get("flush_every") {
            None => DEFAULT_FLUSH_EVERY,
            Some(v) => v.parse().map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid 'flush_every' param '{v}': {e}"),
                )
            })?,
        };

        Ok(Self {
            path,
            append,
            flush_every,
        })
    }
}

/// Sink that writes frames to a JSON-lines file
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: BufWriter<File>,
    pending: u64,
}

impl FileSink {
    /// Open (or create) the output file; parent directories are created.
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: BufWriter::new(file),
            pending: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params)?)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }

    fn append_line(&mut self, frame: &PublishedFrame) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")?;

        self.pending += 1;
        if self.config.flush_every > 0 && self.pending >= self.config.flush_every {
            self.writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    fn persist_frame(&mut self, frame: &PublishedFrame) -> Result<(), ContractError> {
        self.append_line(frame).map_err(|e| {
            error!(sink = %self.name, sequence = frame.sequence, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }

    fn flush_writer(&mut self) -> Result<(), ContractError> {
        self.pending = 0;
        self.writer
            .flush()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, frame),
        fields(sink = %self.name, sequence = frame.sequence)
    )]
    async fn write(&mut self, frame: &PublishedFrame) -> Result<(), ContractError> {
        self.persist_frame(frame)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.flush_writer()
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush_writer()?;
        debug!(sink = %self.name, path = %self.config.path.display(), "FileSink closed");
        Ok(())
    }
}
