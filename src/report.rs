//! Dataset diagnostics for the classifier consumer contract
//!
//! The external trainer reads the two sink files, concatenates them,
//! standardizes the four features and fits a model. This module performs
//! the load/concatenate/standardize portion and adds a per-feature
//! class-separability check (Welch's t-test between the label 0 and
//! label 1 populations), the sanity pass run before handing the files
//! over. Model fitting itself stays external and swappable.

use anyhow::Result;
use aprender::preprocessing::StandardScaler;
use aprender::primitives::Matrix;
use aprender::traits::Transformer;
use serde::Serialize;

use crate::dataset::LabeledRecord;

pub const FEATURE_NAMES: [&str; 4] = ["cycles", "instructions", "cache_misses", "branch_misses"];

/// How well one feature separates the two classes.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureSeparation {
    pub feature: String,
    pub baseline_mean: f64,
    pub fault_mean: f64,
    /// Class-mean gap in standardized units.
    pub standardized_gap: f32,
    /// Welch t-statistic between the two populations.
    pub statistic: f32,
    pub pvalue: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub baseline_rows: usize,
    pub fault_rows: usize,
    pub feature_means: Vec<f32>,
    pub feature_stds: Vec<f32>,
    pub features: Vec<FeatureSeparation>,
}

/// Analyze a baseline (all label 0) and a fault (all label 1) dataset.
pub fn analyze(baseline: &[LabeledRecord], fault: &[LabeledRecord]) -> Result<DatasetReport> {
    anyhow::ensure!(
        baseline.len() >= 2 && fault.len() >= 2,
        "need at least 2 records per class, got {} baseline / {} fault",
        baseline.len(),
        fault.len()
    );
    anyhow::ensure!(
        baseline.iter().all(|r| r.label == 0),
        "baseline dataset contains label=1 records"
    );
    anyhow::ensure!(
        fault.iter().all(|r| r.label == 1),
        "fault dataset contains label=0 records"
    );

    let n_rows = baseline.len() + fault.len();
    let mut data = Vec::with_capacity(n_rows * 4);
    for record in baseline.iter().chain(fault) {
        for value in record.sample.as_row() {
            data.push(value as f32);
        }
    }
    let matrix = Matrix::from_vec(n_rows, 4, data)
        .map_err(|e| anyhow::anyhow!("failed to build feature matrix: {e}"))?;

    let mut scaler = StandardScaler::new().with_mean(true).with_std(true);
    scaler
        .fit(&matrix)
        .map_err(|e| anyhow::anyhow!("failed to fit scaler: {e}"))?;
    let scaled = scaler
        .transform(&matrix)
        .map_err(|e| anyhow::anyhow!("failed to standardize features: {e}"))?;

    let mut features = Vec::with_capacity(4);
    for (column, name) in FEATURE_NAMES.iter().enumerate() {
        let base_raw: Vec<f32> = (0..baseline.len()).map(|i| matrix.get(i, column)).collect();
        let fault_raw: Vec<f32> = (baseline.len()..n_rows)
            .map(|i| matrix.get(i, column))
            .collect();

        let ttest = aprender::stats::hypothesis::ttest_ind(&base_raw, &fault_raw, false)
            .map_err(|e| anyhow::anyhow!("t-test failed for {name}: {e}"))?;

        let base_scaled_mean = column_mean(&scaled, 0..baseline.len(), column);
        let fault_scaled_mean = column_mean(&scaled, baseline.len()..n_rows, column);

        features.push(FeatureSeparation {
            feature: name.to_string(),
            baseline_mean: mean_f64(&base_raw),
            fault_mean: mean_f64(&fault_raw),
            standardized_gap: fault_scaled_mean - base_scaled_mean,
            statistic: ttest.statistic,
            pvalue: ttest.pvalue,
        });
    }

    Ok(DatasetReport {
        baseline_rows: baseline.len(),
        fault_rows: fault.len(),
        feature_means: scaler.mean().to_vec(),
        feature_stds: scaler.std().to_vec(),
        features,
    })
}

fn column_mean(matrix: &Matrix<f32>, rows: std::ops::Range<usize>, column: usize) -> f32 {
    let len = rows.len().max(1) as f32;
    rows.map(|i| matrix.get(i, column)).sum::<f32>() / len
}

fn mean_f64(values: &[f32]) -> f64 {
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len().max(1) as f64
}

/// Human-readable rendering used by the CLI's text format.
pub fn render_text(report: &DatasetReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "baseline rows: {}\nfault rows:    {}\n\n",
        report.baseline_rows, report.fault_rows
    ));
    out.push_str("feature          baseline mean      fault mean  std gap  t-stat   p-value\n");
    for f in &report.features {
        out.push_str(&format!(
            "{:<16} {:>14.1} {:>15.1} {:>8.3} {:>7.2} {:>9.4}\n",
            f.feature, f.baseline_mean, f.fault_mean, f.standardized_gap, f.statistic, f.pvalue
        ));
    }
    out
}
