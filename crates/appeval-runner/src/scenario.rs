use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::classify::{describe_streams, Verdict};
use crate::command::{Arch, ExternalCommand, MakeInvocation};
use crate::config::HarnessConfig;
use crate::process::{run_captured, CommandOutput, ServerProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    LibcBench,
    Nginx,
    Redis,
    Wamr,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::LibcBench => "libc-bench",
            ScenarioKind::Nginx => "nginx",
            ScenarioKind::Redis => "redis",
            ScenarioKind::Wamr => "wamr",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Asset {
    NginxWebRoot,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub scenario: ScenarioKind,
    pub arch: Arch,
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == 0
    }
}

pub struct RunClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn finish(self, scenario: ScenarioKind, arch: Arch, verdict: Verdict) -> RunResult {
        let (status, diagnostics) = match verdict {
            Verdict::Pass => (0, None),
            Verdict::Fail {
                status,
                diagnostics,
            } => (status, Some(diagnostics)),
        };
        RunResult {
            scenario,
            arch,
            status,
            diagnostics,
            started_at: self.started_at,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

pub struct EvalContext {
    pub config: HarnessConfig,
    prepared: BTreeSet<Asset>,
}

impl EvalContext {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            prepared: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn is_prepared(&self, asset: Asset) -> bool {
        self.prepared.contains(&asset)
    }

    pub fn mark_prepared(&mut self, asset: Asset) {
        self.prepared.insert(asset);
    }

    pub fn make(&self, invocation: &MakeInvocation, timeout: Duration) -> Result<CommandOutput> {
        let cmd = invocation.to_external(&self.config.tools.make);
        self.run(&cmd, timeout)
    }

    pub fn run(&self, cmd: &ExternalCommand, timeout: Duration) -> Result<CommandOutput> {
        info!(command = %cmd, "running");
        Ok(run_captured(cmd, self.root(), timeout)?)
    }

    pub fn launch(&self, invocation: &MakeInvocation) -> Result<ServerProcess> {
        let cmd = invocation.to_external(&self.config.tools.make);
        info!(command = %cmd, "launching server");
        Ok(ServerProcess::spawn(&cmd, self.root())?)
    }

    pub fn gate(&self, step: &str, out: &CommandOutput, strict: bool) -> Option<Verdict> {
        if out.success() {
            return None;
        }
        if strict {
            return Some(Verdict::Fail {
                status: out.exit_code,
                diagnostics: format!("{} failed\n{}", step, describe_streams(out)),
            });
        }
        warn!(step, exit_code = out.exit_code, "step failed, continuing");
        None
    }

    pub fn settle(&self) {
        let settle = self.config.settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }
}

pub trait Scenario {
    fn kind(&self) -> ScenarioKind;

    fn run(&self, ctx: &mut EvalContext, arch: Arch) -> Result<RunResult>;
}

// Teardown runs before either result is inspected.
pub fn with_server<F>(
    ctx: &EvalContext,
    mut server: ServerProcess,
    teardown_timeout: Duration,
    verify: F,
) -> Result<Verdict>
where
    F: FnOnce(&mut ServerProcess) -> Result<Verdict>,
{
    let verdict = verify(&mut server);
    let teardown = server.terminate(teardown_timeout);
    info!(pid = server.id(), "server stopped");
    ctx.settle();
    let verdict = verdict?;
    let exit = teardown?;
    Ok(match verdict {
        Verdict::Pass => Verdict::Pass,
        Verdict::Fail {
            status,
            diagnostics,
        } => Verdict::Fail {
            status,
            diagnostics: format!(
                "{}\n--- server stdout (exit {}) ---\n{}",
                diagnostics, exit.exit_code, exit.stdout
            ),
        },
    })
}
