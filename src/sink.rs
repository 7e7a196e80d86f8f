use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use shared::models::{CSV_HEADER, NetworkEvent};

/// Append-only CSV store. A new store is initialized with the header row;
/// every later write appends records in arrival order.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if !path.exists() {
            let mut file = fs::File::create(&path)?;
            writeln!(file, "{}", CSV_HEADER.join(","))?;
        }
        Ok(Self { path })
    }

    pub fn append_all(&self, events: &[NetworkEvent]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        for event in events {
            writeln!(file, "{}", event.csv_row())?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Bounded FIFO buffer in front of the sink. The oldest event is dropped at
/// capacity; a flush drains the whole buffer in original order.
pub struct BufferedSink {
    sink: CsvSink,
    buffer: VecDeque<NetworkEvent>,
    capacity: usize,
    flush_threshold: usize,
}

impl BufferedSink {
    pub fn new(sink: CsvSink, capacity: usize, flush_threshold: usize) -> Self {
        Self {
            sink,
            buffer: VecDeque::with_capacity(capacity.min(flush_threshold * 2)),
            capacity,
            flush_threshold,
        }
    }

    pub fn append(&mut self, event: NetworkEvent) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn flush_if_due(&mut self) {
        if self.buffer.len() >= self.flush_threshold {
            self.flush();
        }
    }

    /// Write everything buffered in one append. The buffer is cleared after
    /// a successful write; on failure the batch is logged and discarded so
    /// the capture loop keeps running.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = self.buffer.make_contiguous();
        match self.sink.append_all(batch) {
            Ok(()) => {
                log::debug!("Flushed {} events to {}", self.buffer.len(), self.sink.path().display());
                self.buffer.clear();
            }
            Err(e) => {
                log::error!("Failed to write {} buffered events: {}", self.buffer.len(), e);
                self.buffer.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
