use anyhow::{Context, Result};
use std::fs;
use std::time::Duration;
use tracing::info;

use super::{LOG_LEVEL, SMP};
use crate::classify::classify_libc_bench;
use crate::command::{Arch, MakeInvocation, MakeVerb};
use crate::scenario::{EvalContext, RunClock, RunResult, Scenario, ScenarioKind};

const APP_PATH: &str = "apps/c/libc-bench";
const EXPECT_FILE: &str = "apps/c/libc-bench/expect_warn.out";
const CLEAN_TIMEOUT: Duration = Duration::from_secs(60);
const RUN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct LibcBench;

impl LibcBench {
    fn clean() -> MakeInvocation {
        MakeInvocation {
            musl: true,
            ..MakeInvocation::app(MakeVerb::Clean, APP_PATH)
        }
    }

    fn run_invocation(arch: Arch) -> MakeInvocation {
        MakeInvocation {
            arch: Some(arch),
            log: Some(LOG_LEVEL.to_string()),
            musl: true,
            smp: Some(SMP),
            accel: Some(false),
            ..MakeInvocation::app(MakeVerb::Run, APP_PATH)
        }
    }
}

impl Scenario for LibcBench {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::LibcBench
    }

    fn run(&self, ctx: &mut EvalContext, arch: Arch) -> Result<RunResult> {
        let clock = RunClock::start();
        let expect_path = ctx.root().join(EXPECT_FILE);
        let expected = fs::read_to_string(&expect_path)
            .with_context(|| format!("reading {}", expect_path.display()))?;

        let clean = ctx.make(&Self::clean(), CLEAN_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("clean", &clean, ctx.config.strictness.clean) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }

        let bench = ctx.make(&Self::run_invocation(arch), RUN_TIMEOUT)?;
        let verdict = classify_libc_bench(&bench, &expected);
        info!(status = verdict.status(), "libc-bench classified");
        if verdict.is_pass() {
            ctx.settle();
        }
        Ok(clock.finish(self.kind(), arch, verdict))
    }
}
