//! Fault-injection campaign controller
//!
//! A campaign is N independent trials; each trial replays one fault
//! descriptor up to R times, stops at the first failed replay, and is
//! classified purely by how many replays produced a valid sample:
//! all R benign, none crash, anything in between SDC.
//!
//! Every sample a fault trial produced is persisted with label 1 - the
//! outcome class is informational, never a filter on what gets recorded.

use anyhow::Result;
use rand::Rng;
use serde::Serialize;

use crate::dataset::{DatasetSink, FaultLog, LabeledRecord};
use crate::fault::FaultSelector;
use crate::injector::TrialRunner;
use crate::telemetry::{Collector, HpcSample, Invocation};

/// Replays per fault descriptor in the original campaigns.
pub const DEFAULT_REPLAYS: usize = 7;

const PROGRESS_EVERY: usize = 100;

/// Terminal classification of one fault trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialOutcome {
    Benign,
    Sdc,
    Crash,
}

impl TrialOutcome {
    /// Pure function of collected-sample count vs the expected replays.
    pub fn classify(collected: usize, replays: usize) -> Self {
        if collected == 0 {
            TrialOutcome::Crash
        } else if collected == replays {
            TrialOutcome::Benign
        } else {
            TrialOutcome::Sdc
        }
    }

    /// Fault log spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialOutcome::Benign => "benign",
            TrialOutcome::Sdc => "SDC",
            TrialOutcome::Crash => "crash",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CampaignConfig {
    pub trials: usize,
    pub replays: usize,
}

/// Running counts threaded through the trial loop; no shared globals, so
/// cancellation and tests both see a consistent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub trials: usize,
    pub benign: usize,
    pub sdc: usize,
    pub crash: usize,
    /// Total labeled records emitted across all trials.
    pub records: usize,
}

impl CampaignSummary {
    fn record_trial(&mut self, outcome: TrialOutcome, collected: usize) {
        self.trials += 1;
        match outcome {
            TrialOutcome::Benign => self.benign += 1,
            TrialOutcome::Sdc => self.sdc += 1,
            TrialOutcome::Crash => self.crash += 1,
        }
        self.records += collected;
    }
}

impl std::fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "trials:  {}", self.trials)?;
        writeln!(f, "  benign: {}", self.benign)?;
        writeln!(f, "  SDC:    {}", self.sdc)?;
        writeln!(f, "  crash:  {}", self.crash)?;
        write!(f, "records: {}", self.records)
    }
}

/// Run N trials, emitting one fault-log entry per trial and one label=1
/// record per collected sample. Trial failures never abort the campaign;
/// only configuration problems surface as errors here.
pub fn run_campaign<T: TrialRunner, G: Rng>(
    config: &CampaignConfig,
    selector: &FaultSelector,
    rng: &mut G,
    runner: &mut T,
    sink: &mut DatasetSink,
    log: &mut FaultLog,
) -> Result<CampaignSummary> {
    anyhow::ensure!(config.replays > 0, "campaign needs at least one replay per trial");

    let mut summary = CampaignSummary::default();

    for fault_id in 0..config.trials {
        let fault = selector.draw(rng);
        let mut buffer: Vec<HpcSample> = Vec::with_capacity(config.replays);

        for replay in 0..config.replays {
            match runner.replay(&fault) {
                Ok(sample) => buffer.push(sample),
                Err(err) => {
                    // First failed replay is terminal for this trial.
                    tracing::debug!(fault_id, replay, error = %err, "replay failed");
                    break;
                }
            }
        }

        let outcome = TrialOutcome::classify(buffer.len(), config.replays);
        log.append(fault_id as u64, &fault, outcome)?;
        for sample in &buffer {
            sink.append(&LabeledRecord {
                sample: *sample,
                label: 1,
            })?;
        }
        sink.flush()?;
        summary.record_trial(outcome, buffer.len());

        if (fault_id + 1) % PROGRESS_EVERY == 0 {
            tracing::info!(
                completed = fault_id + 1,
                total = config.trials,
                benign = summary.benign,
                sdc = summary.sdc,
                crash = summary.crash,
                records = summary.records,
                "campaign progress"
            );
        }
    }

    Ok(summary)
}

/// Fault-free baseline counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BaselineSummary {
    pub runs: usize,
    pub collected: usize,
    pub failed: usize,
}

impl std::fmt::Display for BaselineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "runs:      {}", self.runs)?;
        writeln!(f, "collected: {}", self.collected)?;
        write!(f, "failed:    {}", self.failed)
    }
}

/// Collect N fault-free runs of the same invocation, label 0, no fault
/// log. Individual collection failures are counted and skipped; the
/// baseline never emits a partial or label=1 record.
pub fn run_baseline(
    runs: usize,
    invocation: &Invocation,
    collector: &Collector,
    sink: &mut DatasetSink,
) -> Result<BaselineSummary> {
    run_baseline_with(runs, || collector.collect(invocation), sink)
}

/// Baseline loop over any sample source; the production path closes over
/// the collector, tests script the source directly.
pub fn run_baseline_with<F>(
    runs: usize,
    mut collect: F,
    sink: &mut DatasetSink,
) -> Result<BaselineSummary>
where
    F: FnMut() -> std::result::Result<HpcSample, crate::telemetry::CollectionError>,
{
    let mut summary = BaselineSummary::default();

    for run in 0..runs {
        summary.runs += 1;
        match collect() {
            Ok(sample) => {
                sink.append(&LabeledRecord { sample, label: 0 })?;
                sink.flush()?;
                summary.collected += 1;
            }
            Err(err) => {
                tracing::debug!(run, error = %err, "baseline run failed");
                summary.failed += 1;
            }
        }

        if (run + 1) % PROGRESS_EVERY == 0 {
            tracing::info!(
                completed = run + 1,
                total = runs,
                collected = summary.collected,
                "baseline progress"
            );
        }
    }

    Ok(summary)
}
