//! Process-control capability for checkpointed register perturbation
//!
//! The injection contract is a small imperative sequence: break at the
//! checkpoint, run, step a fixed count, XOR one register with a literal
//! mask, continue, quit. `ControlProgram` models that sequence once; it
//! can be rendered as a GDB batch script or executed natively by
//! `PtraceSession`. Any mechanism honoring the sequence is substitutable.

use anyhow::{Context, Result};
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::fault::FaultDescriptor;
use crate::target::{Checkpoint, TargetSpec};

/// One step of the control sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    /// Plant a breakpoint at a named function entry.
    Break(String),
    /// Run until the planted breakpoint is hit.
    Run,
    /// Stop at the first instruction of the program.
    RunFromEntry,
    /// Single-step the given number of instructions.
    Step(u64),
    /// XOR one named register with a literal single-bit mask.
    XorRegister { register: String, mask: u64 },
    /// Resume to completion.
    Continue,
    /// End the session.
    Quit,
}

/// The full script driven against one controlled execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlProgram {
    pub ops: Vec<ControlOp>,
}

impl ControlProgram {
    /// Checkpointed single-bit flip: the only perturbing sequence the
    /// injector ever issues. Offset checkpoints are expressed as
    /// run-from-entry plus stepping, symbol checkpoints as break-and-run.
    pub fn bit_flip(checkpoint: &Checkpoint, steps: u32, fault: &FaultDescriptor) -> Self {
        let mut program = Self::reach_checkpoint(checkpoint, steps);
        program.ops.push(ControlOp::XorRegister {
            register: fault.register.clone(),
            mask: fault.mask(),
        });
        program.finish()
    }

    /// Same checkpoint discipline with no register mutation, for
    /// overhead-matched baseline runs.
    pub fn passthrough(checkpoint: &Checkpoint, steps: u32) -> Self {
        Self::reach_checkpoint(checkpoint, steps).finish()
    }

    fn reach_checkpoint(checkpoint: &Checkpoint, steps: u32) -> Self {
        let mut ops = Vec::new();
        match checkpoint {
            Checkpoint::Symbol(name) => {
                ops.push(ControlOp::Break(name.clone()));
                ops.push(ControlOp::Run);
                if steps > 0 {
                    ops.push(ControlOp::Step(u64::from(steps)));
                }
            }
            Checkpoint::Offset(count) => {
                ops.push(ControlOp::RunFromEntry);
                let total = count + u64::from(steps);
                if total > 0 {
                    ops.push(ControlOp::Step(total));
                }
            }
        }
        Self { ops }
    }

    fn finish(mut self) -> Self {
        self.ops.push(ControlOp::Continue);
        self.ops.push(ControlOp::Quit);
        self
    }

    /// Render as a GDB batch script (`gdb --batch -x <file> --args …`).
    pub fn to_gdb_script(&self) -> String {
        let mut script = String::from("set pagination off\nset confirm off\n");
        for op in &self.ops {
            match op {
                ControlOp::Break(symbol) => script.push_str(&format!("break {symbol}\n")),
                ControlOp::Run => script.push_str("run\n"),
                ControlOp::RunFromEntry => script.push_str("starti\n"),
                ControlOp::Step(count) => script.push_str(&format!("stepi {count}\n")),
                ControlOp::XorRegister { register, mask } => {
                    script.push_str(&format!("set ${register} = ${register} ^ {mask:#x}\n"));
                }
                ControlOp::Continue => script.push_str("continue\n"),
                ControlOp::Quit => script.push_str("quit\n"),
            }
        }
        script
    }
}

/// Live ptrace implementation of the control sequence.
///
/// The session owns one traced child; PTRACE_O_EXITKILL ties the child's
/// lifetime to the controller so a killed controller never leaks a
/// stopped target.
#[cfg(target_arch = "x86_64")]
pub struct PtraceSession {
    child: Pid,
    breakpoint: Option<(u64, libc::c_long)>,
    spec: TargetSpec,
}

#[cfg(target_arch = "x86_64")]
impl PtraceSession {
    /// Fork and exec the target, stopped before its first instruction.
    pub fn spawn(spec: &TargetSpec) -> Result<Self> {
        match unsafe { fork() }.context("failed to fork")? {
            ForkResult::Parent { child } => {
                waitpid(child, None).context("failed to wait for exec stop")?;
                ptrace::setoptions(child, ptrace::Options::PTRACE_O_EXITKILL)
                    .context("failed to set ptrace options")?;
                Ok(Self {
                    child,
                    breakpoint: None,
                    spec: spec.clone(),
                })
            }
            ForkResult::Child => {
                if ptrace::traceme().is_err() {
                    std::process::exit(127);
                }
                let err = Command::new(&spec.program).args(&spec.args).exec();
                eprintln!("failed to exec {}: {}", spec.program.display(), err);
                std::process::exit(127);
            }
        }
    }

    /// Drive the control sequence to completion and return the target's
    /// exit code (128 + signal for signal deaths).
    pub fn run_program(mut self, program: &ControlProgram) -> Result<i32> {
        for op in &program.ops {
            match op {
                ControlOp::Break(symbol) => self.plant_breakpoint(symbol)?,
                ControlOp::Run => self.continue_to_breakpoint()?,
                // spawn() already leaves the child stopped at entry
                ControlOp::RunFromEntry => {}
                ControlOp::Step(count) => self.step(*count)?,
                ControlOp::XorRegister { register, mask } => {
                    self.xor_register(register, *mask)?
                }
                ControlOp::Continue => return self.resume_to_exit(),
                ControlOp::Quit => break,
            }
        }
        anyhow::bail!("control sequence ended without resuming the target")
    }

    fn plant_breakpoint(&mut self, symbol: &str) -> Result<()> {
        let info = crate::symbols::resolve_symbol(&self.spec.program, symbol)?;
        let addr = if info.needs_rebase {
            crate::symbols::load_base(self.child, &self.spec.program)? + info.address
        } else {
            info.address
        };

        let addr_ptr = addr as ptrace::AddressType;
        let original = ptrace::read(self.child, addr_ptr)
            .context("failed to read checkpoint instruction")?;
        let patched = (original & !0xff) | 0xcc; // int3
        unsafe { ptrace::write(self.child, addr_ptr, patched) }
            .context("failed to plant breakpoint")?;
        self.breakpoint = Some((addr, original));
        tracing::debug!(symbol, addr = format_args!("{addr:#x}"), "breakpoint planted");
        Ok(())
    }

    fn continue_to_breakpoint(&mut self) -> Result<()> {
        let (addr, original) = self
            .breakpoint
            .ok_or_else(|| anyhow::anyhow!("run issued with no breakpoint planted"))?;

        let mut deliver: Option<Signal> = None;
        loop {
            ptrace::cont(self.child, deliver).context("failed to continue child")?;
            deliver = None;
            match waitpid(self.child, None).context("failed to waitpid")? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    let mut regs =
                        ptrace::getregs(self.child).context("failed to get registers")?;
                    if regs.rip == addr + 1 {
                        // Restore the original instruction and rewind.
                        unsafe {
                            ptrace::write(self.child, addr as ptrace::AddressType, original)
                        }
                        .context("failed to restore checkpoint instruction")?;
                        regs.rip = addr;
                        ptrace::setregs(self.child, regs)
                            .context("failed to rewind to checkpoint")?;
                        self.breakpoint = None;
                        return Ok(());
                    }
                    // Unrelated trap (e.g. from the runtime); keep going.
                }
                WaitStatus::Stopped(_, sig) => deliver = Some(sig),
                WaitStatus::Exited(_, code) => {
                    anyhow::bail!("target exited with status {code} before the checkpoint")
                }
                WaitStatus::Signaled(_, sig, _) => {
                    anyhow::bail!("target killed by {sig:?} before the checkpoint")
                }
                _ => {}
            }
        }
    }

    fn step(&mut self, count: u64) -> Result<()> {
        let mut deliver: Option<Signal> = None;
        for _ in 0..count {
            ptrace::step(self.child, deliver).context("failed to single-step child")?;
            deliver = None;
            match waitpid(self.child, None).context("failed to waitpid")? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                WaitStatus::Stopped(_, sig) => deliver = Some(sig),
                WaitStatus::Exited(_, code) => {
                    anyhow::bail!("target exited with status {code} while stepping")
                }
                WaitStatus::Signaled(_, sig, _) => {
                    anyhow::bail!("target killed by {sig:?} while stepping")
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn xor_register(&mut self, register: &str, mask: u64) -> Result<()> {
        let mut regs = ptrace::getregs(self.child).context("failed to get registers")?;
        apply_xor(&mut regs, register, mask)?;
        ptrace::setregs(self.child, regs).context("failed to set registers")?;
        tracing::debug!(register, mask = format_args!("{mask:#x}"), "register perturbed");
        Ok(())
    }

    fn resume_to_exit(&mut self) -> Result<i32> {
        let mut deliver: Option<Signal> = None;
        loop {
            ptrace::cont(self.child, deliver).context("failed to resume child")?;
            deliver = None;
            match waitpid(self.child, None).context("failed to waitpid")? {
                WaitStatus::Exited(_, code) => return Ok(code),
                WaitStatus::Signaled(_, sig, _) => return Ok(128 + sig as i32),
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                WaitStatus::Stopped(_, sig) => deliver = Some(sig),
                _ => {}
            }
        }
    }
}

/// XOR a named x86_64 general-purpose register in a register snapshot.
#[cfg(target_arch = "x86_64")]
fn apply_xor(regs: &mut libc::user_regs_struct, register: &str, mask: u64) -> Result<()> {
    let slot = match register {
        "rax" => &mut regs.rax,
        "rbx" => &mut regs.rbx,
        "rcx" => &mut regs.rcx,
        "rdx" => &mut regs.rdx,
        "rsi" => &mut regs.rsi,
        "rdi" => &mut regs.rdi,
        "rbp" => &mut regs.rbp,
        "r8" => &mut regs.r8,
        "r9" => &mut regs.r9,
        "r10" => &mut regs.r10,
        "r11" => &mut regs.r11,
        "r12" => &mut regs.r12,
        "r13" => &mut regs.r13,
        "r14" => &mut regs.r14,
        "r15" => &mut regs.r15,
        other => anyhow::bail!("unsupported register `{other}`"),
    };
    *slot ^= mask;
    Ok(())
}
