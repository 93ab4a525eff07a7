//! End-to-end campaign and baseline scenarios over a scripted runner
//!
//! The runner seam replaces real perf/gdb executions with scripted replay
//! outcomes, so these tests pin down the trial state machine, the sink
//! contents and the fault log exactly.

use std::collections::VecDeque;
use std::path::Path;

use faultprobe::campaign::{
    run_baseline_with, run_campaign, CampaignConfig, TrialOutcome,
};
use faultprobe::dataset::{self, DatasetSink, FaultLog};
use faultprobe::fault::{FaultDescriptor, FaultSelector};
use faultprobe::injector::TrialRunner;
use faultprobe::telemetry::{CollectionError, HpcSample};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn sample(seed: u64) -> HpcSample {
    HpcSample::from_row([1000 + seed, 2000 + seed, 30 + seed, 40 + seed])
}

/// Replays succeed or fail according to a fixed script, one entry per
/// `replay` call.
struct ScriptedRunner {
    script: VecDeque<Option<HpcSample>>,
    calls: u64,
}

impl ScriptedRunner {
    fn new(script: Vec<Option<HpcSample>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }
}

impl TrialRunner for ScriptedRunner {
    fn replay(&mut self, _fault: &FaultDescriptor) -> Result<HpcSample, CollectionError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Some(sample)) => Ok(sample),
            Some(None) => Err(CollectionError::Crash(139)),
            None => panic!("runner called more times than scripted"),
        }
    }
}

fn fixtures(dir: &Path) -> (DatasetSink, FaultLog) {
    let sink = DatasetSink::create(&dir.join("faulty.csv")).unwrap();
    let log = FaultLog::create(&dir.join("fault_log.txt")).unwrap();
    (sink, log)
}

#[test]
fn baseline_runs_emit_only_label_zero_and_no_fault_log() {
    // Scenario A: 10 fault-free runs yield 10 label=0 records.
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("normal.csv");
    let mut sink = DatasetSink::create(&csv).unwrap();

    let mut next = 0u64;
    let summary = run_baseline_with(
        10,
        || {
            next += 1;
            Ok(sample(next))
        },
        &mut sink,
    )
    .unwrap();

    assert_eq!(summary.runs, 10);
    assert_eq!(summary.collected, 10);
    assert_eq!(summary.failed, 0);

    let records = dataset::load(&csv).unwrap();
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.label == 0));
    assert!(!dir.path().join("fault_log.txt").exists());
}

#[test]
fn baseline_failures_are_counted_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("normal.csv");
    let mut sink = DatasetSink::create(&csv).unwrap();

    let mut run = 0u64;
    let summary = run_baseline_with(
        6,
        || {
            run += 1;
            if run % 3 == 0 {
                Err(CollectionError::Crash(1))
            } else {
                Ok(sample(run))
            }
        },
        &mut sink,
    )
    .unwrap();

    assert_eq!(summary.collected, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(dataset::load(&csv).unwrap().len(), 4);
}

#[test]
fn all_successful_replays_classify_every_trial_benign() {
    // Scenario B: 5 trials, R=3, injector always succeeds.
    let dir = tempfile::tempdir().unwrap();
    let (mut sink, mut log) = fixtures(dir.path());
    let mut runner = ScriptedRunner::new((0..15).map(|i| Some(sample(i))).collect());

    let selector = FaultSelector::with_defaults();
    let mut rng = StdRng::seed_from_u64(1);
    let config = CampaignConfig {
        trials: 5,
        replays: 3,
    };
    let summary =
        run_campaign(&config, &selector, &mut rng, &mut runner, &mut sink, &mut log).unwrap();

    assert_eq!(summary.trials, 5);
    assert_eq!(summary.benign, 5);
    assert_eq!(summary.sdc, 0);
    assert_eq!(summary.crash, 0);
    assert_eq!(summary.records, 15);
    assert_eq!(runner.calls, 15);

    let records = dataset::load(&dir.path().join("faulty.csv")).unwrap();
    assert_eq!(records.len(), 15);
    assert!(records.iter().all(|r| r.label == 1));

    let log_text = std::fs::read_to_string(dir.path().join("fault_log.txt")).unwrap();
    assert_eq!(log_text.matches("benign").count(), 5);
    assert_eq!(log_text.lines().count(), 10);
}

#[test]
fn first_failed_replay_ends_the_trial_as_sdc() {
    // Scenario C: trial #3 fails on its 2nd replay, everything else succeeds.
    let dir = tempfile::tempdir().unwrap();
    let (mut sink, mut log) = fixtures(dir.path());

    let mut script: Vec<Option<HpcSample>> = Vec::new();
    for trial in 0..5 {
        if trial == 2 {
            // One success, then the terminal failure; replay 3 never runs.
            script.push(Some(sample(100)));
            script.push(None);
        } else {
            for i in 0..3 {
                script.push(Some(sample(trial * 10 + i)));
            }
        }
    }
    let mut runner = ScriptedRunner::new(script);

    let selector = FaultSelector::with_defaults();
    let mut rng = StdRng::seed_from_u64(2);
    let config = CampaignConfig {
        trials: 5,
        replays: 3,
    };
    let summary =
        run_campaign(&config, &selector, &mut rng, &mut runner, &mut sink, &mut log).unwrap();

    assert_eq!(summary.benign, 4);
    assert_eq!(summary.sdc, 1);
    assert_eq!(summary.crash, 0);
    assert_eq!(summary.records, 13);
    // 4 benign trials * 3 + 1 success + 1 failure = 14 calls in total.
    assert_eq!(runner.calls, 14);

    let records = dataset::load(&dir.path().join("faulty.csv")).unwrap();
    assert_eq!(records.len(), 13);
    assert!(records.iter().all(|r| r.label == 1));

    let log_text = std::fs::read_to_string(dir.path().join("fault_log.txt")).unwrap();
    assert_eq!(log_text.matches("benign").count(), 4);
    assert_eq!(log_text.matches("SDC").count(), 1);
}

#[test]
fn immediate_failures_classify_every_trial_crash() {
    // Scenario D: every trial fails on replay 1; N log entries, no records.
    let dir = tempfile::tempdir().unwrap();
    let (mut sink, mut log) = fixtures(dir.path());
    let mut runner = ScriptedRunner::new(vec![None; 5]);

    let selector = FaultSelector::with_defaults();
    let mut rng = StdRng::seed_from_u64(3);
    let config = CampaignConfig {
        trials: 5,
        replays: 3,
    };
    let summary =
        run_campaign(&config, &selector, &mut rng, &mut runner, &mut sink, &mut log).unwrap();

    assert_eq!(summary.crash, 5);
    assert_eq!(summary.benign, 0);
    assert_eq!(summary.sdc, 0);
    assert_eq!(summary.records, 0);
    assert_eq!(runner.calls, 5);
    assert_eq!(log.entries(), 5);

    let records = dataset::load(&dir.path().join("faulty.csv")).unwrap();
    assert!(records.is_empty());

    let log_text = std::fs::read_to_string(dir.path().join("fault_log.txt")).unwrap();
    assert_eq!(log_text.matches("crash").count(), 5);
}

#[test]
fn fault_log_lines_carry_descriptor_and_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sink, mut log) = fixtures(dir.path());
    let mut runner = ScriptedRunner::new(vec![Some(sample(1)), Some(sample(2))]);

    let selector = FaultSelector::new(vec!["rdi".to_string()]).unwrap();
    let mut rng = StdRng::seed_from_u64(4);
    let config = CampaignConfig {
        trials: 1,
        replays: 2,
    };
    run_campaign(&config, &selector, &mut rng, &mut runner, &mut sink, &mut log).unwrap();

    let log_text = std::fs::read_to_string(dir.path().join("fault_log.txt")).unwrap();
    let mut lines = log_text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("0: reg: rdi pos: "), "got: {header}");
    assert_eq!(lines.next().unwrap(), "benign");
}

#[test]
fn zero_replay_campaign_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sink, mut log) = fixtures(dir.path());
    let mut runner = ScriptedRunner::new(Vec::new());

    let selector = FaultSelector::with_defaults();
    let mut rng = StdRng::seed_from_u64(5);
    let config = CampaignConfig {
        trials: 3,
        replays: 0,
    };
    assert!(
        run_campaign(&config, &selector, &mut rng, &mut runner, &mut sink, &mut log).is_err()
    );
}

#[test]
fn record_count_per_trial_matches_outcome_rule() {
    // 0 records for crash, R for benign, strictly between for SDC.
    for (collected, replays, expected) in [
        (0usize, 3usize, TrialOutcome::Crash),
        (3, 3, TrialOutcome::Benign),
        (1, 3, TrialOutcome::Sdc),
        (2, 3, TrialOutcome::Sdc),
    ] {
        assert_eq!(TrialOutcome::classify(collected, replays), expected);
    }
}
