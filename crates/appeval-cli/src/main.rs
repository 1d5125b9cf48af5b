use anyhow::Result;
use appeval_runner::{
    default_scenarios, run_all, Arch, EvalContext, EvalReport, HarnessConfig, ReadinessMode,
    Sweeper, SystemProcessTable,
};
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "app-eval",
    version = "0.3.0",
    about = "Boots guest applications in the emulator and checks their behaviour"
)]
struct Cli {
    /// Architectures to evaluate, in order.
    #[arg(required = true, value_enum)]
    archs: Vec<ArchArg>,
    /// YAML harness configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// OS source tree to run make in; overrides the config file.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Fail a scenario as soon as its clean or build step fails.
    #[arg(long)]
    strict: bool,
    #[arg(long, value_enum)]
    readiness: Option<ReadinessArg>,
    #[arg(long)]
    json: bool,
    /// Also write the full report to this path.
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ArchArg {
    #[value(name = "x86_64")]
    X86_64,
    #[value(name = "aarch64")]
    Aarch64,
    #[value(name = "riscv64")]
    Riscv64,
}

impl From<ArchArg> for Arch {
    fn from(value: ArchArg) -> Self {
        match value {
            ArchArg::X86_64 => Arch::X86_64,
            ArchArg::Aarch64 => Arch::Aarch64,
            ArchArg::Riscv64 => Arch::Riscv64,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReadinessArg {
    #[value(name = "poll")]
    Poll,
    #[value(name = "fixed")]
    Fixed,
}

impl From<ReadinessArg> for ReadinessMode {
    fn from(value: ReadinessArg) -> Self {
        match value {
            ReadinessArg::Poll => ReadinessMode::Poll,
            ReadinessArg::Fixed => ReadinessMode::Fixed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    match run(cli) {
        Ok(report) => {
            let status = report.exit_status();
            if status != 0 {
                std::process::exit(status);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("harness_failed", format!("{:#}", err)));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if cli.strict {
        config.strictness.clean = true;
        config.strictness.build = true;
    }
    if let Some(mode) = cli.readiness {
        config.readiness.mode = mode.into();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<EvalReport> {
    let config = load_config(&cli)?;
    debug!(?config, "harness configuration");
    let archs: Vec<Arch> = cli.archs.iter().copied().map(Into::into).collect();

    let mut sweeper = Sweeper::new(SystemProcessTable::new(), config.emulator_pattern.clone());
    let mut ctx = EvalContext::new(config);
    let scenarios = default_scenarios();
    let report = run_all(&archs, &scenarios, &mut ctx, &mut sweeper)?;

    if let Some(path) = &cli.report {
        report.write(path)?;
    }
    if cli.json {
        emit_json(&report_to_json(&report));
    } else {
        print_report(&report);
    }
    Ok(report)
}

fn print_report(report: &EvalReport) {
    for arch in &report.passed_archs {
        println!("all tests for {} passed", arch);
    }
    if let Some(failure) = &report.failure {
        if let Some(diagnostics) = report.failed_result().and_then(|r| r.diagnostics.as_deref()) {
            println!("{}", diagnostics.trim_end());
        }
        println!(
            "scenario {} failed for {} errcode={}",
            failure.scenario, failure.arch, failure.status
        );
    }
}

fn report_to_json(report: &EvalReport) -> Value {
    json!({
        "ok": report.failure.is_none(),
        "exit_status": report.exit_status(),
        "report": report,
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}
