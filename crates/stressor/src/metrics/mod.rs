//! Per-round results and the durable sink they are appended to.

use std::fs::OpenOptions;
use std::path::Path;

/// Outcome of one round, keyed by its target height.
///
/// Immutable once constructed; appended to the sink as soon as the round is
/// fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub height: u64,
    /// Transactions the round intended to broadcast.
    pub planned: usize,
    /// Transactions actually accepted by the mempool.
    pub broadcast: usize,
    /// Transactions observed committed.
    pub committed: usize,
    /// Transactions that missed the next block: committed more than one
    /// block after broadcast, or never observed committed at all.
    pub missing: usize,
    /// Average inclusion delay in blocks.
    pub avg_delay: f64,
    /// Timestamp of the round's block, unix milliseconds.
    pub block_time_ms: u64,
    /// Time since the previous block, milliseconds.
    pub block_duration_ms: u64,
    /// Wall-clock time from first broadcast to full resolution, milliseconds.
    pub duration_ms: u64,
}

/// Errors from emitting round results.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only sink for round results.
pub trait RoundSink: Send {
    fn emit(&mut self, result: &RoundResult) -> Result<(), SinkError>;
}

const HEADER: [&str; 9] = [
    "height",
    "planned",
    "broadcast",
    "committed",
    "missing",
    "avg_delay",
    "block_time_ms",
    "block_duration_ms",
    "duration_ms",
];

/// CSV file sink.
///
/// Opens in append mode, writes the header exactly once (only when the file
/// is empty) and flushes after every row so a crashed run retains all
/// completed rounds.
pub struct CsvSink {
    writer: csv::Writer<std::fs::File>,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let write_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if write_header {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(Self { writer })
    }
}

impl RoundSink for CsvSink {
    fn emit(&mut self, r: &RoundResult) -> Result<(), SinkError> {
        self.writer.write_record(&[
            r.height.to_string(),
            r.planned.to_string(),
            r.broadcast.to_string(),
            r.committed.to_string(),
            r.missing.to_string(),
            format!("{:.3}", r.avg_delay),
            r.block_time_ms.to_string(),
            r.block_duration_ms.to_string(),
            r.duration_ms.to_string(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<RoundResult>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundSink for VecSink {
    fn emit(&mut self, result: &RoundResult) -> Result<(), SinkError> {
        self.rows.push(result.clone());
        Ok(())
    }
}
