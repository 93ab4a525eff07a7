//! CLI argument parsing for Faultprobe

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::target::{Checkpoint, TargetSpec};

/// Summary output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    Text,
    /// JSON for machine parsing
    Json,
}

/// Injection mechanism for campaign runs
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyKind {
    /// Debugger batch-script bit flip
    Gdb,
    /// Native ptrace bit flip (this binary as controlling process)
    Ptrace,
    /// In-process software fault hook toggled via environment variable
    Hook,
}

/// Control-process wrapping for overhead-matched baselines
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BaselineWrap {
    /// Bare target, no control process
    None,
    /// Run under the debugger with no register mutation
    Gdb,
    /// Run under the native ptrace controller with no register mutation
    Ptrace,
}

/// Target program, checkpoint and timing options shared by subcommands.
#[derive(Args, Debug, Clone)]
pub struct TargetOpts {
    /// Target binary to execute
    #[arg(long = "target", value_name = "BIN")]
    pub target: PathBuf,

    /// Argument passed to the target (repeatable)
    #[arg(long = "target-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub target_args: Vec<String>,

    /// Checkpoint: named function entry to halt at
    #[arg(long = "checkpoint", value_name = "SYMBOL", default_value = "main")]
    pub checkpoint: String,

    /// Checkpoint: instruction offset from program start (overrides --checkpoint)
    #[arg(long = "checkpoint-offset", value_name = "N", conflicts_with = "checkpoint")]
    pub checkpoint_offset: Option<u64>,

    /// Single-steps past the checkpoint before the register is touched
    #[arg(long = "steps", value_name = "N", default_value = "3")]
    pub steps: u32,

    /// Wall-clock timeout per execution, in seconds
    #[arg(long = "timeout-secs", value_name = "SECS", default_value = "5")]
    pub timeout_secs: u64,
}

impl TargetOpts {
    pub fn to_spec(&self) -> TargetSpec {
        let checkpoint = match self.checkpoint_offset {
            Some(offset) => Checkpoint::Offset(offset),
            None => Checkpoint::Symbol(self.checkpoint.clone()),
        };
        TargetSpec {
            program: self.target.clone(),
            args: self.target_args.clone(),
            checkpoint,
            steps: self.steps,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Parser, Debug)]
#[command(name = "faultprobe")]
#[command(version)]
#[command(
    about = "Fault-injection campaign runner collecting hardware performance counter datasets",
    long_about = None
)]
pub struct Cli {
    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect fault-free baseline telemetry (label 0)
    Baseline {
        #[command(flatten)]
        target: TargetOpts,

        /// Number of runs to collect
        #[arg(long, value_name = "N", default_value = "3000")]
        runs: usize,

        /// Control-process wrapping, so baseline overhead matches the
        /// campaign's injection mechanism
        #[arg(long, value_enum, default_value = "none")]
        wrap: BaselineWrap,

        /// Baseline dataset file (truncated and rewritten)
        #[arg(long, value_name = "CSV")]
        output: PathBuf,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a fault-injection campaign (label 1)
    Campaign {
        #[command(flatten)]
        target: TargetOpts,

        /// Number of fault descriptors to trial
        #[arg(long, value_name = "N", default_value = "1000")]
        trials: usize,

        /// Replays per fault descriptor
        #[arg(long, value_name = "R", default_value = "7")]
        replays: usize,

        /// Injection mechanism
        #[arg(long, value_enum, default_value = "gdb")]
        strategy: StrategyKind,

        /// Registers faults are drawn from, comma separated
        #[arg(
            long,
            value_name = "LIST",
            value_delimiter = ',',
            default_value = "rax,rbx,rcx,rdx,rsi,rdi,r8,r9"
        )]
        registers: Vec<String>,

        /// Environment variable toggling the in-process fault hook
        #[arg(long = "fault-env", value_name = "VAR", default_value = "ENABLE_FAULT")]
        fault_env: String,

        /// Campaign dataset file (truncated and rewritten)
        #[arg(long, value_name = "CSV")]
        output: PathBuf,

        /// Fault audit log, one descriptor + outcome per trial
        #[arg(long = "fault-log", value_name = "TXT")]
        fault_log: PathBuf,

        /// Seed for the fault selector (entropy-seeded when absent)
        #[arg(long, value_name = "U64")]
        seed: Option<u64>,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Sanity-check the two dataset files before handing them to a trainer
    Report {
        /// Baseline dataset (all label 0)
        #[arg(long, value_name = "CSV")]
        baseline: PathBuf,

        /// Fault dataset (all label 1)
        #[arg(long, value_name = "CSV")]
        faulty: PathBuf,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Internal: controlling process for the native ptrace strategy.
    /// Spawns the target under ptrace, drives it to the checkpoint,
    /// optionally flips one register bit, and exits with the target's
    /// exit code.
    #[command(hide = true)]
    Inject {
        #[command(flatten)]
        target: TargetOpts,

        /// Register to perturb (passthrough run when absent)
        #[arg(long, value_name = "REG", requires = "bit")]
        register: Option<String>,

        /// Bit position to flip, 0-63
        #[arg(long, value_name = "BIT", requires = "register")]
        bit: Option<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_campaign() {
        let cli = Cli::parse_from([
            "faultprobe",
            "campaign",
            "--target",
            "./bench",
            "--trials",
            "50",
            "--replays",
            "3",
            "--output",
            "faulty.csv",
            "--fault-log",
            "log.txt",
        ]);
        match cli.command {
            Command::Campaign {
                trials,
                replays,
                registers,
                ..
            } => {
                assert_eq!(trials, 50);
                assert_eq!(replays, 3);
                assert_eq!(registers.len(), 8);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_register_list_is_comma_delimited() {
        let cli = Cli::parse_from([
            "faultprobe",
            "campaign",
            "--target",
            "./bench",
            "--registers",
            "rdi,rsi",
            "--output",
            "f.csv",
            "--fault-log",
            "l.txt",
        ]);
        match cli.command {
            Command::Campaign { registers, .. } => {
                assert_eq!(registers, vec!["rdi", "rsi"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_checkpoint_offset_conflicts_with_symbol() {
        let result = Cli::try_parse_from([
            "faultprobe",
            "baseline",
            "--target",
            "./bench",
            "--checkpoint",
            "compute",
            "--checkpoint-offset",
            "4000",
            "--output",
            "n.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_offset_alone_is_accepted() {
        let cli = Cli::parse_from([
            "faultprobe",
            "baseline",
            "--target",
            "./bench",
            "--checkpoint-offset",
            "4000",
            "--output",
            "n.csv",
        ]);
        match cli.command {
            Command::Baseline { target, .. } => {
                assert!(matches!(
                    target.to_spec().checkpoint,
                    Checkpoint::Offset(4000)
                ));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_inject_requires_bit_with_register() {
        let result = Cli::try_parse_from([
            "faultprobe",
            "inject",
            "--target",
            "./bench",
            "--register",
            "rax",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_defaults_match_campaign_constants() {
        let cli = Cli::parse_from([
            "faultprobe",
            "campaign",
            "--target",
            "./bench",
            "--output",
            "f.csv",
            "--fault-log",
            "l.txt",
        ]);
        match cli.command {
            Command::Campaign {
                target, replays, ..
            } => {
                assert_eq!(replays, 7);
                assert_eq!(target.steps, 3);
                assert_eq!(target.timeout_secs, 5);
                assert_eq!(target.checkpoint, "main");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
