//! CSV sink: one header row, then one row per record

use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

use super::SinkError;
use crate::record::{Record, FIELDS};

pub struct TableSink {
    out: Box<dyn Write + Send>,
    header_written: bool,
}

/// Encode one CSV row in memory so the output only ever sees complete rows
fn encode_row<F>(write: F) -> Result<Vec<u8>, SinkError>
where
    F: FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    write(&mut writer)?;
    writer
        .into_inner()
        .map_err(|e| SinkError::Io(e.into_error()))
}

impl TableSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            header_written: false,
        }
    }

    /// Create (or truncate) the output file
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        info!("Writing records to {}", path.display());
        Ok(Self::new(file))
    }

    pub fn prepare(&mut self) -> Result<(), SinkError> {
        if self.header_written {
            return Ok(());
        }
        let header = encode_row(|w| w.write_record(FIELDS))?;
        self.out.write_all(&header)?;
        self.out.flush()?;
        self.header_written = true;
        Ok(())
    }

    /// Write one row and flush it. A row that fails to encode or write is
    /// dropped whole; later rows are unaffected.
    pub fn add_record(&mut self, record: &Record) -> Result<(), SinkError> {
        let row = encode_row(|w| w.serialize(record))?;
        let written = self.out.write_all(&row);
        let flushed = self.out.flush();
        written?;
        flushed?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
