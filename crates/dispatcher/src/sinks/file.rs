//! FileSink - appends events to a JSON Lines history file

use chrono::{DateTime, Utc};
use contracts::{ContractError, EventSink, PipelineEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// History file, one JSON object per line
    pub path: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map; `path` is required
    pub fn from_params(params: &HashMap<String, String>) -> io::Result<Self> {
        let path = params.get("path").filter(|p| !p.trim().is_empty()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "file sink requires a 'path' param")
        })?;

        Ok(Self {
            path: PathBuf::from(path),
        })
    }
}

/// One line of the history file
#[derive(Serialize)]
struct Record<'a> {
    recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a PipelineEvent,
}

/// Sink that appends every event to a file
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create a new FileSink, creating parent directories as needed
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: BufWriter::new(file),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let config = FileSinkConfig::from_params(params)?;
        Self::new(name, config)
    }

    fn append(&mut self, event: &PipelineEvent) -> io::Result<()> {
        let record = Record {
            recorded_at: Utc::now(),
            event,
        };
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")
    }

    fn io_error(&self, e: io::Error) -> ContractError {
        error!(sink = %self.name, path = %self.config.path.display(), error = %e, "I/O failed");
        ContractError::sink_write(&self.name, e.to_string())
    }
}

impl EventSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, event),
        fields(sink = %self.name, kind = event.kind())
    )]
    async fn write(&mut self, event: &PipelineEvent) -> Result<(), ContractError> {
        self.append(event).map_err(|e| self.io_error(e))
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.writer.flush().map_err(|e| self.io_error(e))?;
        debug!(sink = %self.name, path = %self.config.path.display(), "FileSink closed");
        Ok(())
    }
}
