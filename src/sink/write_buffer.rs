//! Single-writer queue in front of the sink
//!
//! Connection handlers run on any worker thread, so records are sent over a
//! channel to one consumer that owns the [`Sink`]. Sink output is blocking
//! file or stdout I/O, so the consumer runs on the blocking pool. Each record
//! is fully written before the next one is taken off the queue.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Sink, SinkError};
use crate::record::Record;

enum Message {
    Record(Record),
    Shutdown,
}

/// Cloneable sender used by connection handlers
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SinkHandle {
    /// Queue a record. Only fails once the writer has shut down.
    pub fn add_record(&self, record: Record) -> Result<(), SinkError> {
        self.tx
            .send(Message::Record(record))
            .map_err(|_| SinkError::Closed)
    }

    /// Handle whose records are delivered straight to the returned receiver
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, RecordReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, RecordReceiver(rx))
    }
}

#[cfg(test)]
pub(crate) struct RecordReceiver(mpsc::UnboundedReceiver<Message>);

#[cfg(test)]
impl RecordReceiver {
    pub async fn recv(&mut self) -> Option<Record> {
        loop {
            if let Message::Record(record) = self.0.recv().await? {
                return Some(record);
            }
        }
    }
}

/// Owner side of the writer
pub struct SinkWriter {
    handle: SinkHandle,
    task: JoinHandle<()>,
}

impl SinkWriter {
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Write everything already queued, close the sink and wait for the writer.
    /// Records submitted afterwards are rejected with [`SinkError::Closed`].
    pub async fn shutdown(self) {
        if self.handle.tx.send(Message::Shutdown).is_err() {
            debug!("Sink writer already stopped");
        }
        if let Err(e) = self.task.await {
            error!("Sink writer task failed: {}", e);
        }
    }
}

/// Prepare the sink and start the writer
pub fn start_writer(mut sink: Sink) -> Result<SinkWriter, SinkError> {
    sink.prepare()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::task::spawn_blocking(move || write_buffer_task(sink, rx));

    Ok(SinkWriter {
        handle: SinkHandle { tx },
        task,
    })
}

fn write_buffer_task(mut sink: Sink, mut rx: mpsc::UnboundedReceiver<Message>) {
    info!("Sink writer started ({} sink)", sink.kind());

    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Record(record) => sink.add_record(&record),
            Message::Shutdown => {
                rx.close();
                let mut drained = 0;
                while let Some(message) = rx.blocking_recv() {
                    if let Message::Record(record) = message {
                        sink.add_record(&record);
                        drained += 1;
                    }
                }
                debug!("Drained {} queued records", drained);
                break;
            }
        }
    }

    sink.close();
    info!("Sink writer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::SharedBuffer;
    use crate::sink::TableSink;
    use std::time::{Duration, Instant};

    fn record(n: u16) -> Record {
        Record::build("127.0.0.1:5000", &[n as u8], "0.0.0.0", 9000 + n, Some(1))
    }

    #[tokio::test]
    async fn test_queued_records_written_on_shutdown() {
        let buffer = SharedBuffer::new();
        let writer = start_writer(Sink::Table(TableSink::new(buffer.clone()))).unwrap();
        let handle = writer.handle();

        for n in 0..10 {
            handle.add_record(record(n)).unwrap();
        }
        writer.shutdown().await;

        assert_eq!(buffer.contents().lines().count(), 11);
    }

    #[tokio::test]
    async fn test_header_written_before_any_record() {
        let buffer = SharedBuffer::new();
        let writer = start_writer(Sink::Table(TableSink::new(buffer.clone()))).unwrap();

        assert_eq!(buffer.contents().lines().count(), 1);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_after_shutdown_is_rejected() {
        let buffer = SharedBuffer::new();
        let writer = start_writer(Sink::Table(TableSink::new(buffer.clone()))).unwrap();
        let handle = writer.handle();
        writer.shutdown().await;

        assert!(matches!(handle.add_record(record(1)), Err(SinkError::Closed)));
        assert_eq!(buffer.contents().lines().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_produce_whole_rows() {
        let buffer = SharedBuffer::new();
        let writer = start_writer(Sink::Table(TableSink::new(buffer.clone()))).unwrap();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let handle = writer.handle();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    handle.add_record(record(n)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        writer.shutdown().await;

        let contents = buffer.contents();
        let mut reader = csv::Reader::from_reader(contents.as_bytes());
        let rows: Vec<Record> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 400);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_block_runtime() {
        let buffer = SharedBuffer::new();
        let writer = start_writer(Sink::Table(TableSink::new(buffer.clone()))).unwrap();
        buffer.slow_writes(Duration::from_millis(500));

        writer.handle().add_record(record(1)).unwrap();
        tokio::task::yield_now().await;

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(400));

        writer.shutdown().await;
        assert_eq!(buffer.contents().lines().count(), 2);
    }
}
