//! Fault injection strategies
//!
//! A strategy turns (target, fault descriptor) into the invocation the
//! Telemetry Collector wraps under the sampler. The sampler observes the
//! controlling process as well as the target: debugger overhead is part
//! of the realistic telemetry signature, which is why the wrapping
//! happens outside the strategy rather than inside it.
//!
//! The injector never judges output divergence; it only reports whether a
//! replay produced a valid sample.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::control::ControlProgram;
use crate::fault::FaultDescriptor;
use crate::target::{Checkpoint, TargetSpec};
use crate::telemetry::{CollectionError, Collector, HpcSample, Invocation};

/// Builds the wrapped command line for one controlled execution.
pub trait InjectionStrategy {
    fn name(&self) -> &'static str;

    /// Invocation for one perturbed replay of `fault`.
    fn inject(&self, target: &TargetSpec, fault: &FaultDescriptor) -> Result<Invocation>;

    /// Invocation for an unperturbed run under the same control overhead,
    /// used for overhead-matched baselines.
    fn passthrough(&self, target: &TargetSpec) -> Result<Invocation>;
}

/// Bare target, no controlling process. `inject` is identical to
/// `passthrough`: this strategy exists for plain baseline collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInjection;

impl InjectionStrategy for NoInjection {
    fn name(&self) -> &'static str {
        "none"
    }

    fn inject(&self, target: &TargetSpec, _fault: &FaultDescriptor) -> Result<Invocation> {
        self.passthrough(target)
    }

    fn passthrough(&self, target: &TargetSpec) -> Result<Invocation> {
        Ok(Invocation::new(target.argv()))
    }
}

/// Debugger-scripted bit flip: renders the control sequence as a GDB
/// batch script and runs `gdb --batch -x <script> --args target …`.
#[derive(Debug, Clone)]
pub struct GdbBitFlip {
    script_path: PathBuf,
}

impl GdbBitFlip {
    pub fn new() -> Self {
        // Per-process path: concurrent campaigns on one host must not
        // overwrite each other's scripts mid-replay.
        Self {
            script_path: std::env::temp_dir()
                .join(format!("faultprobe_inject_{}.gdb", std::process::id())),
        }
    }

    pub fn with_script_path(script_path: PathBuf) -> Self {
        Self { script_path }
    }

    fn invocation_for(&self, target: &TargetSpec, program: &ControlProgram) -> Result<Invocation> {
        std::fs::write(&self.script_path, program.to_gdb_script()).with_context(|| {
            format!("failed to write gdb script {}", self.script_path.display())
        })?;
        let mut argv = vec![
            "gdb".to_string(),
            "--batch".to_string(),
            "-x".to_string(),
            self.script_path.display().to_string(),
            "--args".to_string(),
        ];
        argv.extend(target.argv());
        Ok(Invocation::new(argv))
    }
}

impl Default for GdbBitFlip {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectionStrategy for GdbBitFlip {
    fn name(&self) -> &'static str {
        "gdb"
    }

    fn inject(&self, target: &TargetSpec, fault: &FaultDescriptor) -> Result<Invocation> {
        let program = ControlProgram::bit_flip(&target.checkpoint, target.steps, fault);
        self.invocation_for(target, &program)
    }

    fn passthrough(&self, target: &TargetSpec) -> Result<Invocation> {
        let program = ControlProgram::passthrough(&target.checkpoint, target.steps);
        self.invocation_for(target, &program)
    }
}

/// Native ptrace bit flip: re-invokes this binary's hidden `inject`
/// subcommand as the controlling process, so the sampler wraps controller
/// and target together exactly like the gdb variant.
#[derive(Debug, Clone)]
pub struct PtraceBitFlip {
    controller: PathBuf,
}

impl PtraceBitFlip {
    pub fn new() -> Result<Self> {
        let controller =
            std::env::current_exe().context("failed to locate the faultprobe binary")?;
        Ok(Self { controller })
    }

    pub fn with_controller(controller: PathBuf) -> Self {
        Self { controller }
    }

    fn base_argv(&self, target: &TargetSpec) -> Vec<String> {
        let mut argv = vec![
            self.controller.display().to_string(),
            "inject".to_string(),
            "--target".to_string(),
            target.program.display().to_string(),
            "--steps".to_string(),
            target.steps.to_string(),
        ];
        match &target.checkpoint {
            Checkpoint::Symbol(name) => {
                argv.push("--checkpoint".to_string());
                argv.push(name.clone());
            }
            Checkpoint::Offset(count) => {
                argv.push("--checkpoint-offset".to_string());
                argv.push(count.to_string());
            }
        }
        for arg in &target.args {
            argv.push("--target-arg".to_string());
            argv.push(arg.clone());
        }
        argv
    }
}

impl InjectionStrategy for PtraceBitFlip {
    fn name(&self) -> &'static str {
        "ptrace"
    }

    fn inject(&self, target: &TargetSpec, fault: &FaultDescriptor) -> Result<Invocation> {
        let mut argv = self.base_argv(target);
        argv.push("--register".to_string());
        argv.push(fault.register.clone());
        argv.push("--bit".to_string());
        argv.push(fault.bit_position.to_string());
        Ok(Invocation::new(argv))
    }

    fn passthrough(&self, target: &TargetSpec) -> Result<Invocation> {
        Ok(Invocation::new(self.base_argv(target)))
    }
}

/// In-process software fault hook: the target carries its own fault
/// logic, toggled by an environment variable. No process control at all.
#[derive(Debug, Clone)]
pub struct SoftwareHook {
    env_var: String,
}

impl SoftwareHook {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }
}

impl InjectionStrategy for SoftwareHook {
    fn name(&self) -> &'static str {
        "hook"
    }

    fn inject(&self, target: &TargetSpec, _fault: &FaultDescriptor) -> Result<Invocation> {
        Ok(Invocation::new(target.argv()).with_env(self.env_var.clone(), "1"))
    }

    fn passthrough(&self, target: &TargetSpec) -> Result<Invocation> {
        Ok(Invocation::new(target.argv()).with_env(self.env_var.clone(), "0"))
    }
}

/// One controlled, perturbed execution yielding a sample or a failure.
///
/// The campaign loop depends on this seam only, so tests can script
/// replay outcomes without spawning processes.
pub trait TrialRunner {
    fn replay(&mut self, fault: &FaultDescriptor) -> Result<HpcSample, CollectionError>;
}

/// Production runner: strategy builds the invocation, collector samples it.
pub struct InjectedRunner<'a> {
    strategy: &'a dyn InjectionStrategy,
    target: &'a TargetSpec,
    collector: &'a Collector,
}

impl<'a> InjectedRunner<'a> {
    pub fn new(
        strategy: &'a dyn InjectionStrategy,
        target: &'a TargetSpec,
        collector: &'a Collector,
    ) -> Self {
        Self {
            strategy,
            target,
            collector,
        }
    }
}

impl TrialRunner for InjectedRunner<'_> {
    fn replay(&mut self, fault: &FaultDescriptor) -> Result<HpcSample, CollectionError> {
        let invocation = self
            .strategy
            .inject(self.target, fault)
            .map_err(|err| CollectionError::Setup(err.to_string()))?;
        self.collector.collect(&invocation)
    }
}
