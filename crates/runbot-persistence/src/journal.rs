//! Daily JSON Lines journal files.
//!
//! Each journal message becomes one line in `journal_YYYY-MM-DD.jsonl`. The
//! file is opened in append mode, so restarts extend the day's file and an
//! interrupted write damages at most one line.

use chrono::{DateTime, Utc};
use runbot_core::JournalMessage;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    lines_written: usize,
}

/// Append-only journal writer with daily rotation.
pub struct JournalWriter {
    base_dir: PathBuf,
    buffer: Vec<JournalMessage>,
    max_buffer_size: usize,
    active: Option<ActiveFile>,
}

impl JournalWriter {
    pub fn new(base_dir: impl Into<PathBuf>, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create journal directory");
        }
        Self {
            base_dir,
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active: None,
        }
    }

    /// Queue a message; flushes once the buffer is full.
    pub fn append(&mut self, message: JournalMessage) -> PersistenceResult<()> {
        self.buffer.push(message);
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    fn date_of(message: &JournalMessage) -> String {
        let ts = i64::try_from(message.timestamp_ms).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp_millis(ts)
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string()
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                date = %active.date,
                lines = active.lines_written,
                "Closed journal file"
            );
        }
    }

    fn writer_for(&mut self, date: &str) -> PersistenceResult<&mut ActiveFile> {
        if self.active.as_ref().is_some_and(|a| a.date != date) {
            self.close_active();
        }
        if self.active.is_none() {
            let path = self.base_dir.join(format!("journal_{date}.jsonl"));
            debug!(path = %path.display(), "Opening journal file (append mode)");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.active = Some(ActiveFile {
                writer: BufWriter::new(file),
                date: date.to_string(),
                lines_written: 0,
            });
        }
        self.active
            .as_mut()
            .ok_or_else(|| std::io::Error::other("journal file not open").into())
    }

    /// Write buffered messages to their day's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.buffer);
        let count = pending.len();
        for message in &pending {
            let date = Self::date_of(message);
            let line = serde_json::to_string(message)?;
            let active = self.writer_for(&date)?;
            writeln!(active.writer, "{line}")?;
            active.lines_written += 1;
        }
        if let Some(active) = self.active.as_mut() {
            active.writer.flush()?;
        }
        debug!(lines = count, "Flushed journal");
        Ok(())
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active();
        Ok(())
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush journal on drop");
        }
        self.close_active();
    }
}
