//! Hardware performance counter collection via `perf stat`
//!
//! Wraps a single execution of a target invocation under the counter
//! sampler and parses its machine-readable (`-x,`) output into a fixed
//! four-counter sample. The collector is label-agnostic: callers decide
//! whether a sample belongs to the baseline or the fault dataset.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// Counter events requested from the sampler, in the order the sample
/// fields are laid out. Order is significant: it is the feature-vector
/// order consumed downstream.
pub const HPC_EVENTS: [&str; 4] = ["cycles", "instructions", "cache-misses", "branch-misses"];

/// Default wall-clock bound for one controlled execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One complete counter reading for one finished execution.
///
/// Immutable once produced; `as_row` yields the fields in the fixed
/// dataset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpcSample {
    pub cycles: u64,
    pub instructions: u64,
    pub cache_misses: u64,
    pub branch_misses: u64,
}

impl HpcSample {
    pub fn as_row(&self) -> [u64; 4] {
        [
            self.cycles,
            self.instructions,
            self.cache_misses,
            self.branch_misses,
        ]
    }

    pub fn from_row(row: [u64; 4]) -> Self {
        Self {
            cycles: row[0],
            instructions: row[1],
            cache_misses: row[2],
            branch_misses: row[3],
        }
    }
}

/// Why a single execution produced no usable sample.
///
/// All variants are recoverable at the trial level: they end the current
/// replay and fold into the trial outcome, never the campaign result.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("target exited with status {0}")]
    Crash(i32),

    #[error("target exceeded wall-clock timeout of {0:?}")]
    Timeout(Duration),

    #[error("malformed counter output: {0}")]
    Malformed(String),

    #[error("replay setup failed: {0}")]
    Setup(String),

    #[error("failed to run sampler: {0}")]
    Io(#[from] std::io::Error),
}

/// The command (plus environment) the sampler wraps for one execution:
/// either the bare target or a controlling process driving the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Runs invocations under `perf stat` with a bounded wait.
#[derive(Debug, Clone)]
pub struct Collector {
    timeout: Duration,
}

impl Collector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Execute the invocation to completion under the sampler and parse
    /// its counter output. A hung child is killed and reaped before this
    /// returns, so the next trial never inherits a zombie.
    pub fn collect(&self, invocation: &Invocation) -> Result<HpcSample, CollectionError> {
        if invocation.argv.is_empty() {
            return Err(CollectionError::Setup("empty invocation".to_string()));
        }

        let mut cmd = Command::new("perf");
        cmd.arg("stat")
            .arg("-e")
            .arg(HPC_EVENTS.join(","))
            .arg("-x")
            .arg(",")
            .arg("--")
            .args(&invocation.argv);
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }
        // The target's own stdout is noise; perf writes counters to stderr.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group, so a timeout can take down the whole
        // sampler/controller/target tree, not just perf.
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let mut stderr = match child.stderr.take() {
            Some(pipe) => pipe,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CollectionError::Setup("sampler stderr not captured".to_string()));
            }
        };

        // Drain stderr on a separate thread so a chatty child can never
        // deadlock against a full pipe while we poll for exit.
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(CollectionError::Timeout(self.timeout));
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let output = reader.join().unwrap_or_default();

        if !status.success() {
            use std::os::unix::process::ExitStatusExt;
            let code = status
                .code()
                .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
            return Err(CollectionError::Crash(code));
        }

        parse_counter_lines(&output)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Parse the sampler's `-x,` protocol: one line per requested counter,
/// first comma-delimited field is the unsigned count or a not-available
/// sentinel (`<not counted>` / `<not supported>`).
///
/// Sentinel and junk lines are skipped rather than misaligned into the
/// result; exactly four numeric leading fields, in request order, make a
/// sample. Anything else is a failure, never a partial record.
pub fn parse_counter_lines(output: &str) -> Result<HpcSample, CollectionError> {
    let mut values: Vec<u64> = Vec::with_capacity(4);

    for line in output.lines() {
        let lead = line.split(',').next().unwrap_or("").trim();
        if lead.is_empty() {
            continue;
        }
        if let Ok(value) = lead.parse::<u64>() {
            values.push(value);
        }
    }

    if values.len() != 4 {
        return Err(CollectionError::Malformed(format!(
            "expected 4 counter values, found {}",
            values.len()
        )));
    }

    Ok(HpcSample {
        cycles: values[0],
        instructions: values[1],
        cache_misses: values[2],
        branch_misses: values[3],
    })
}
