//! Record sinks
//!
//! A [`Sink`] is owned by a single writer task (see [`write_buffer`]); handlers
//! only ever talk to it through a cloneable [`SinkHandle`].

mod line;
mod table;
mod write_buffer;

use std::io;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{CollectorConfig, SinkKind};
use crate::record::Record;

pub use line::LineSink;
pub use table::TableSink;
pub use write_buffer::{start_writer, SinkHandle};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sink is closed")]
    Closed,
}

/// Destination for records
pub enum Sink {
    /// One human-readable line per record
    Line(LineSink),
    /// Header row followed by one CSV row per record
    Table(TableSink),
}

impl Sink {
    pub fn from_config(config: &CollectorConfig) -> Result<Self, SinkError> {
        match config.kind {
            SinkKind::Line => Ok(Sink::Line(LineSink::stdout())),
            SinkKind::Table => {
                let filename = config.table.as_ref().map(|t| t.filename.as_str()).unwrap_or_default();
                Ok(Sink::Table(TableSink::create(filename)?))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Sink::Line(_) => "line",
            Sink::Table(_) => "table",
        }
    }

    /// One-time setup before the first record; repeated calls do nothing
    pub fn prepare(&mut self) -> Result<(), SinkError> {
        match self {
            Sink::Line(_) => Ok(()),
            Sink::Table(sink) => sink.prepare(),
        }
    }

    /// Append a record. Failures are logged here and never reach the caller.
    pub fn add_record(&mut self, record: &Record) {
        let result = match self {
            Sink::Line(sink) => sink.add_record(record),
            Sink::Table(sink) => sink.add_record(record),
        };

        match result {
            Ok(()) => debug!(client = %record.client_id, "Record added to {} sink", self.kind()),
            Err(e) => error!(client = %record.client_id, "Failed to add record to {} sink: {}", self.kind(), e),
        }
    }

    pub fn close(&mut self) {
        let result = match self {
            Sink::Line(sink) => sink.close(),
            Sink::Table(sink) => sink.close(),
        };

        if let Err(e) = result {
            error!("Failed to close {} sink: {}", self.kind(), e);
        }
    }
}
