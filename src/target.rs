//! Target program description and pre-campaign validation
//!
//! A campaign is parameterized by one TargetSpec: program path, the
//! execution checkpoint the injector halts at, and the number of extra
//! single-steps taken past the checkpoint so the chosen register is live.
//! Validation failures here are fatal and abort before any trial runs.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::symbols;

/// Where the controlling process halts the target before the flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// Entry of a named function (requires symbols in the target).
    Symbol(String),
    /// Fixed instruction count from program start.
    Offset(u64),
}

#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub checkpoint: Checkpoint,
    /// Single-steps taken past the checkpoint before mutating the register.
    pub steps: u32,
}

impl TargetSpec {
    /// Command line for running the target directly, no control process.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.display().to_string()];
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Fail fast on a missing binary or unresolvable checkpoint.
    pub fn validate(&self) -> Result<()> {
        if !self.program.exists() {
            anyhow::bail!("target binary {} not found", self.program.display());
        }
        if let Checkpoint::Symbol(name) = &self.checkpoint {
            symbols::resolve_symbol(&self.program, name)
                .with_context(|| format!("checkpoint `{name}` is not resolvable"))?;
        }
        Ok(())
    }
}

/// Check that an external tool (perf, gdb) is invocable before the first
/// trial; a missing tool is a configuration error, not a trial failure.
pub fn ensure_tool(tool: &str) -> Result<()> {
    let status = Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(_) => Ok(()),
        Err(err) => anyhow::bail!("required tool `{tool}` is not available: {err}"),
    }
}
