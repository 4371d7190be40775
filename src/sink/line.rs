//! Human-readable sink

use std::io::{self, Write};

use super::SinkError;
use crate::record::Record;

pub struct LineSink {
    out: Box<dyn Write + Send>,
}

impl LineSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn add_record(&mut self, record: &Record) -> Result<(), SinkError> {
        writeln!(self.out, "record added: {}", record)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
