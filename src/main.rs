use anyhow::Result;
use clap::Parser;
use faultprobe::cli::{BaselineWrap, Cli, Command, OutputFormat, StrategyKind, TargetOpts};
use faultprobe::injector::{
    GdbBitFlip, InjectedRunner, InjectionStrategy, NoInjection, PtraceBitFlip, SoftwareHook,
};
use faultprobe::{campaign, control, dataset, fault, report, target, telemetry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_summary<S: serde::Serialize + std::fmt::Display>(
    summary: &S,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{summary}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
    }
    Ok(())
}

fn run_baseline(
    opts: &TargetOpts,
    runs: usize,
    wrap: BaselineWrap,
    output: &PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let spec = opts.to_spec();
    spec.validate()?;
    target::ensure_tool("perf")?;

    let invocation = match wrap {
        BaselineWrap::None => NoInjection.passthrough(&spec)?,
        BaselineWrap::Gdb => {
            target::ensure_tool("gdb")?;
            GdbBitFlip::new().passthrough(&spec)?
        }
        BaselineWrap::Ptrace => PtraceBitFlip::new()?.passthrough(&spec)?,
    };

    let collector = telemetry::Collector::new(opts.timeout());
    let mut sink = dataset::DatasetSink::create(output)?;
    let summary = campaign::run_baseline(runs, &invocation, &collector, &mut sink)?;
    print_summary(&summary, format)
}

#[allow(clippy::too_many_arguments)]
fn run_campaign(
    opts: &TargetOpts,
    trials: usize,
    replays: usize,
    strategy_kind: StrategyKind,
    registers: Vec<String>,
    fault_env: &str,
    output: &PathBuf,
    fault_log: &PathBuf,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let spec = opts.to_spec();
    spec.validate()?;
    let selector = fault::FaultSelector::new(registers)?;
    target::ensure_tool("perf")?;

    let strategy: Box<dyn InjectionStrategy> = match strategy_kind {
        StrategyKind::Gdb => {
            target::ensure_tool("gdb")?;
            Box::new(GdbBitFlip::new())
        }
        StrategyKind::Ptrace => Box::new(PtraceBitFlip::new()?),
        StrategyKind::Hook => Box::new(SoftwareHook::new(fault_env)),
    };
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let collector = telemetry::Collector::new(opts.timeout());
    let mut runner = InjectedRunner::new(strategy.as_ref(), &spec, &collector);
    let mut sink = dataset::DatasetSink::create(output)?;
    let mut log = dataset::FaultLog::create(fault_log)?;

    let config = campaign::CampaignConfig { trials, replays };
    let summary = campaign::run_campaign(
        &config,
        &selector,
        &mut rng,
        &mut runner,
        &mut sink,
        &mut log,
    )?;
    print_summary(&summary, format)
}

fn run_report(baseline: &PathBuf, faulty: &PathBuf, format: OutputFormat) -> Result<()> {
    let baseline_records = dataset::load(baseline)?;
    let fault_records = dataset::load(faulty)?;
    let analysis = report::analyze(&baseline_records, &fault_records)?;
    match format {
        OutputFormat::Text => print!("{}", report::render_text(&analysis)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
    }
    Ok(())
}

/// The hidden `inject` mode: this process becomes the controlling process
/// the sampler wraps. Exits with the target's exit code so the collector
/// sees crashes exactly as it would for a bare target.
fn run_inject(opts: &TargetOpts, register: Option<String>, bit: Option<u8>) -> Result<()> {
    let spec = opts.to_spec();
    spec.validate()?;

    let program = match (register, bit) {
        (Some(register), Some(bit)) => {
            anyhow::ensure!(bit < 64, "bit position must be in 0..=63, got {bit}");
            let descriptor = fault::FaultDescriptor {
                register,
                bit_position: bit,
            };
            control::ControlProgram::bit_flip(&spec.checkpoint, spec.steps, &descriptor)
        }
        _ => control::ControlProgram::passthrough(&spec.checkpoint, spec.steps),
    };

    #[cfg(target_arch = "x86_64")]
    {
        let session = control::PtraceSession::spawn(&spec)?;
        let code = session.run_program(&program)?;
        std::process::exit(code);
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = program;
        anyhow::bail!("native ptrace injection is only supported on x86_64");
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::Baseline {
            target,
            runs,
            wrap,
            output,
            format,
        } => run_baseline(&target, runs, wrap, &output, format),
        Command::Campaign {
            target,
            trials,
            replays,
            strategy,
            registers,
            fault_env,
            output,
            fault_log,
            seed,
            format,
        } => run_campaign(
            &target, trials, replays, strategy, registers, &fault_env, &output, &fault_log,
            seed, format,
        ),
        Command::Report {
            baseline,
            faulty,
            format,
        } => run_report(&baseline, &faulty, format),
        Command::Inject {
            target,
            register,
            bit,
        } => run_inject(&target, register, bit),
    }
}
