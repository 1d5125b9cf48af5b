use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{LOG_LEVEL, SERVER_PORT, SMP};
use crate::assets::{ensure_clone, install_web_root, RUX_NGINX_URL};
use crate::classify::classify_nginx;
use crate::command::{Arch, ExternalCommand, MakeInvocation, MakeVerb};
use crate::readiness::{wait_ready, Probe};
use crate::scenario::{with_server, Asset, EvalContext, RunClock, RunResult, Scenario, ScenarioKind};

const APP_PATH: &str = "apps/c/nginx";
const HTML_DIR: &str = "apps/c/nginx/html";
const FETCHED_FILE: &str = "index.html";
const CLONE_TIMEOUT: Duration = Duration::from_secs(60);
const CLEAN_TIMEOUT: Duration = Duration::from_secs(30);
const BUILD_TIMEOUT: Duration = Duration::from_secs(120);
const READY_DELAY: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Nginx;

impl Nginx {
    fn base(arch: Arch) -> MakeInvocation {
        MakeInvocation {
            arch: Some(arch),
            log: Some(LOG_LEVEL.to_string()),
            net: true,
            blk: true,
            smp: Some(SMP),
            musl: true,
            ..MakeInvocation::app(MakeVerb::Build, APP_PATH)
        }
    }

    fn fetch(wget: &str) -> ExternalCommand {
        ExternalCommand::new(wget).args([format!("localhost:{}", SERVER_PORT), "--tries=5".to_string()])
    }

    fn setup(ctx: &mut EvalContext) -> Result<()> {
        let git = ctx.config.tools.git.clone();
        ensure_clone(&git, ctx.root(), RUX_NGINX_URL, APP_PATH, CLONE_TIMEOUT)?;
        if !ctx.is_prepared(Asset::NginxWebRoot) {
            install_web_root(&git, ctx.root(), Path::new(HTML_DIR), CLONE_TIMEOUT)?;
            ctx.mark_prepared(Asset::NginxWebRoot);
        }
        Ok(())
    }
}

impl Scenario for Nginx {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Nginx
    }

    fn run(&self, ctx: &mut EvalContext, arch: Arch) -> Result<RunResult> {
        let clock = RunClock::start();
        Self::setup(ctx)?;

        let base = Self::base(arch);
        let clean = ctx.make(&base.with_verb(MakeVerb::Clean), CLEAN_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("clean", &clean, ctx.config.strictness.clean) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }
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
            let probe = Probe::http(format!("http://127.0.0.1:{}/", SERVER_PORT))?;
            let readiness = wait_ready(&probe, &ctx_ref.config.readiness, READY_DELAY, || {
                !server.has_exited()
            });
            info!(?readiness, "nginx readiness");
            let fetch = ctx_ref.run(&Self::fetch(&ctx_ref.config.tools.wget), FETCH_TIMEOUT)?;
            Ok(classify_nginx(&fetch))
        })?;

        if verdict.is_pass() {
            let fetched = ctx.root().join(FETCHED_FILE);
            if let Err(e) = fs::remove_file(&fetched) {
                warn!(path = %fetched.display(), error = %e, "could not remove fetched page");
            }
        }
        Ok(clock.finish(self.kind(), arch, verdict))
    }
}
