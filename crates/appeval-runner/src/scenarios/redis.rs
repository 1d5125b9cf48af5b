use anyhow::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::info;

use super::{LOG_LEVEL, SERVER_PORT, SMP};
use crate::assets::{ensure_clone, RUX_REDIS_URL};
use crate::classify::classify_redis;
use crate::command::{Arch, ExternalCommand, MakeInvocation, MakeVerb};
use crate::readiness::{wait_ready, Probe};
use crate::scenario::{with_server, EvalContext, RunClock, RunResult, Scenario, ScenarioKind};

const APP_PATH: &str = "apps/c/redis";
const CLONE_TIMEOUT: Duration = Duration::from_secs(30);
const CLEAN_TIMEOUT: Duration = Duration::from_secs(60);
const DISK_IMG_TIMEOUT: Duration = Duration::from_secs(60);
const BUILD_TIMEOUT: Duration = Duration::from_secs(120);
const READY_DELAY: Duration = Duration::from_secs(10);
const BENCH_TIMEOUT: Duration = Duration::from_secs(60);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const BENCH_REQUESTS: u32 = 100_000;
const BENCH_CLIENTS: u32 = 30;

pub struct Redis;

impl Redis {
    fn base(arch: Arch) -> MakeInvocation {
        MakeInvocation {
            arch: Some(arch),
            musl: true,
            log: Some(LOG_LEVEL.to_string()),
            net: true,
            v9p: true,
            blk: true,
            features: vec!["virtio-9p".to_string()],
            v9p_path: Some(APP_PATH.to_string()),
            smp: Some(SMP),
            guest_args: vec!["./redis-server".to_string(), "/v9fs/redis.conf".to_string()],
            ..MakeInvocation::app(MakeVerb::Default, APP_PATH)
        }
    }

    fn clean() -> MakeInvocation {
        MakeInvocation {
            musl: true,
            ..MakeInvocation::app(MakeVerb::Clean, APP_PATH)
        }
    }

    fn benchmark(program: &str, workload: &str) -> ExternalCommand {
        ExternalCommand::new(program).args([
            "-h".to_string(),
            "localhost".to_string(),
            "-p".to_string(),
            SERVER_PORT.to_string(),
            "-n".to_string(),
            BENCH_REQUESTS.to_string(),
            "-q".to_string(),
            "-t".to_string(),
            workload.to_string(),
            "-c".to_string(),
            BENCH_CLIENTS.to_string(),
        ])
    }
}

impl Scenario for Redis {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Redis
    }

    fn run(&self, ctx: &mut EvalContext, arch: Arch) -> Result<RunResult> {
        let clock = RunClock::start();
        ensure_clone(
            &ctx.config.tools.git,
            ctx.root(),
            RUX_REDIS_URL,
            APP_PATH,
            CLONE_TIMEOUT,
        )?;

        let clean = ctx.make(&Self::clean(), CLEAN_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("clean", &clean, ctx.config.strictness.clean) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }
        let disk = ctx.make(&MakeInvocation::new(MakeVerb::DiskImg), DISK_IMG_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("disk_img", &disk, ctx.config.strictness.build) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }
        let base = Self::base(arch);
        let build = ctx.make(&base, BUILD_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("build", &build, ctx.config.strictness.build) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }

        let run = MakeInvocation {
            accel: Some(false),
            ..base.with_verb(MakeVerb::Run)
        };
        let server = ctx.launch(&run)?;
        let ctx_ref: &EvalContext = ctx;
        let verdict = with_server(ctx_ref, server, TEARDOWN_TIMEOUT, |server| {
            let probe = Probe::redis(SocketAddr::from((Ipv4Addr::LOCALHOST, SERVER_PORT)));
            let readiness = wait_ready(&probe, &ctx_ref.config.readiness, READY_DELAY, || {
                !server.has_exited()
            });
            info!(?readiness, "redis readiness");
            let bench = &ctx_ref.config.tools.redis_benchmark;
            let set = ctx_ref.run(&Self::benchmark(bench, "set"), BENCH_TIMEOUT)?;
            let get = ctx_ref.run(&Self::benchmark(bench, "get"), BENCH_TIMEOUT)?;
            info!(set = %set.stdout.trim(), get = %get.stdout.trim(), "redis-benchmark results");
            Ok(classify_redis(&set, &get))
        })?;
        Ok(clock.finish(self.kind(), arch, verdict))
    }
}
