//! Durable dataset sink and fault log
//!
//! Two independent sinks exist per experiment: a fault-free baseline sink
//! (label 0) and a fault-campaign sink (label 1). Sinks are write-once
//! per run: creating one truncates any previous file and writes the fixed
//! header. The fault log is the append-only audit trail, one entry per
//! fault trial regardless of how many records that trial yielded.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::campaign::TrialOutcome;
use crate::fault::FaultDescriptor;
use crate::telemetry::HpcSample;

/// Fixed column order consumed by the external trainer.
pub const DATASET_HEADER: &str = "cycles,instructions,cache_misses,branch_misses,label";

/// The unit persisted to a sink: one sample and its class label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledRecord {
    pub sample: HpcSample,
    /// 0 = fault-free, 1 = faulty.
    pub label: u8,
}

/// Truncate-and-rewrite CSV sink with the fixed five-column layout.
pub struct DatasetSink {
    writer: BufWriter<File>,
    rows: usize,
}

impl DatasetSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create dataset {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{DATASET_HEADER}").context("failed to write dataset header")?;
        writer.flush().context("failed to flush dataset header")?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append(&mut self, record: &LabeledRecord) -> Result<()> {
        let [cycles, instructions, cache_misses, branch_misses] = record.sample.as_row();
        writeln!(
            self.writer,
            "{cycles},{instructions},{cache_misses},{branch_misses},{}",
            record.label
        )
        .context("failed to append dataset row")?;
        self.rows += 1;
        Ok(())
    }

    /// Called at trial boundaries so an interrupt leaves only whole
    /// trials on disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush dataset")
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Fault log writer: two lines per trial, descriptor then outcome.
pub struct FaultLog {
    writer: BufWriter<File>,
    entries: usize,
}

impl FaultLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create fault log {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            entries: 0,
        })
    }

    pub fn append(
        &mut self,
        fault_id: u64,
        fault: &FaultDescriptor,
        outcome: TrialOutcome,
    ) -> Result<()> {
        writeln!(
            self.writer,
            "{fault_id}: reg: {} pos: {}",
            fault.register, fault.bit_position
        )
        .context("failed to append fault log entry")?;
        writeln!(self.writer, "{}", outcome.as_str())
            .context("failed to append fault log outcome")?;
        self.writer.flush().context("failed to flush fault log")?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

/// Load a sink file back for the consumer side. Strict: a wrong header,
/// wrong arity, non-integer field or label outside {0,1} is an error.
pub fn load(path: &Path) -> Result<Vec<LabeledRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let mut lines = text.lines();

    match lines.next() {
        Some(header) if header == DATASET_HEADER => {}
        Some(header) => anyhow::bail!("unexpected dataset header: {header}"),
        None => anyhow::bail!("dataset {} is empty", path.display()),
    }

    let mut records = Vec::new();
    for (index, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            anyhow::bail!("row {}: expected 5 fields, found {}", index + 2, fields.len());
        }
        let mut values = [0u64; 4];
        for (slot, field) in values.iter_mut().zip(&fields[..4]) {
            *slot = field
                .parse()
                .with_context(|| format!("row {}: non-integer field `{field}`", index + 2))?;
        }
        let label: u8 = fields[4]
            .parse()
            .with_context(|| format!("row {}: bad label `{}`", index + 2, fields[4]))?;
        if label > 1 {
            anyhow::bail!("row {}: label must be 0 or 1, found {label}", index + 2);
        }
        records.push(LabeledRecord {
            sample: HpcSample::from_row(values),
            label,
        });
    }
    Ok(records)
}
