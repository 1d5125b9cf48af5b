use anyhow::Result;
use std::time::Duration;
use tracing::info;

use super::{LOG_LEVEL, SMP};
use crate::assets::{ensure_clone, RUX_WAMR_URL};
use crate::classify::classify_wamr;
use crate::command::{Arch, MakeInvocation, MakeVerb};
use crate::scenario::{EvalContext, RunClock, RunResult, Scenario, ScenarioKind};

const APP_PATH: &str = "apps/c/wamr";
const ROOTFS: &str = "apps/c/wamr/rootfs";
const CLONE_TIMEOUT: Duration = Duration::from_secs(60);
const CLEAN_TIMEOUT: Duration = Duration::from_secs(60);
const DISK_IMG_TIMEOUT: Duration = Duration::from_secs(60);
const RUN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Wamr;

impl Wamr {
    fn clean(arch: Arch) -> MakeInvocation {
        MakeInvocation {
            arch: Some(arch),
            musl: true,
            ..MakeInvocation::app(MakeVerb::Clean, APP_PATH)
        }
    }

    fn run_invocation(arch: Arch) -> MakeInvocation {
        MakeInvocation {
            arch: Some(arch),
            log: Some(LOG_LEVEL.to_string()),
            smp: Some(SMP),
            musl: true,
            net: true,
            v9p: true,
            v9p_path: Some(ROOTFS.to_string()),
            guest_args: vec!["iwasm".to_string(), "/main.wasm".to_string()],
            accel: Some(false),
            ..MakeInvocation::app(MakeVerb::Run, APP_PATH)
        }
    }
}

impl Scenario for Wamr {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Wamr
    }

    fn run(&self, ctx: &mut EvalContext, arch: Arch) -> Result<RunResult> {
        let clock = RunClock::start();
        ensure_clone(
            &ctx.config.tools.git,
            ctx.root(),
            RUX_WAMR_URL,
            APP_PATH,
            CLONE_TIMEOUT,
        )?;

        let clean = ctx.make(&Self::clean(arch), CLEAN_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("clean", &clean, ctx.config.strictness.clean) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }
        let disk = ctx.make(&MakeInvocation::new(MakeVerb::DiskImg), DISK_IMG_TIMEOUT)?;
        if let Some(verdict) = ctx.gate("disk_img", &disk, ctx.config.strictness.build) {
            return Ok(clock.finish(self.kind(), arch, verdict));
        }

        let run = ctx.make(&Self::run_invocation(arch), RUN_TIMEOUT)?;
        let verdict = classify_wamr(&run);
        info!(status = verdict.status(), "wamr classified");
        Ok(clock.finish(self.kind(), arch, verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::testing::{fake_make, fake_tool, make_log, test_config};
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(ROOTFS)).expect("mkdir rootfs");
        dir
    }

    #[test]
    fn passes_on_hello_world() {
        let root = tree();
        let tools = tempfile::tempdir().expect("tools");
        let make = fake_make(tools.path(), "echo 'Hello world!'; exit 0");
        let mut ctx = EvalContext::new(test_config(root.path(), &make));
        let result = Wamr.run(&mut ctx, Arch::Riscv64).expect("run");
        assert!(result.passed(), "{:?}", result.diagnostics);
        assert_eq!(
            make_log(root.path()),
            vec![
                "A=apps/c/wamr ARCH=riscv64 MUSL=y clean",
                "disk_img",
                "A=apps/c/wamr ARCH=riscv64 MUSL=y LOG=warn SMP=4 NET=y V9P=y \
                 V9P_PATH=apps/c/wamr/rootfs ARGS=iwasm,/main.wasm ACCEL=n run",
            ]
        );
    }

    #[test]
    fn exit_code_fails_even_with_greeting() {
        let root = tree();
        let tools = tempfile::tempdir().expect("tools");
        let make = fake_make(tools.path(), "echo 'Hello world!'; exit 3");
        let mut ctx = EvalContext::new(test_config(root.path(), &make));
        let result = Wamr.run(&mut ctx, Arch::X86_64).expect("run");
        assert_eq!(result.status, 3);
    }

    #[test]
    fn strict_build_stops_on_disk_image_failure() {
        let root = tree();
        let tools = tempfile::tempdir().expect("tools");
        let make = fake_tool(
            tools.path(),
            "make",
            "echo \"$*\" >> \"$PWD/make.log\"\n[ \"$1\" = disk_img ] && exit 2\nexit 0",
        );
        let mut config = test_config(root.path(), &make);
        config.strictness.build = true;
        let mut ctx = EvalContext::new(config);
        let result = Wamr.run(&mut ctx, Arch::X86_64).expect("run");
        assert_eq!(result.status, 2);
        assert_eq!(make_log(root.path()).len(), 2);
    }

    #[test]
    fn lenient_build_continues_past_disk_image_failure() {
        let root = tree();
        let tools = tempfile::tempdir().expect("tools");
        let make = fake_tool(
            tools.path(),
            "make",
            "echo \"$*\" >> \"$PWD/make.log\"\n[ \"$1\" = disk_img ] && exit 2\necho 'Hello world!'",
        );
        let mut ctx = EvalContext::new(test_config(root.path(), &make));
        let result = Wamr.run(&mut ctx, Arch::X86_64).expect("run");
        assert!(result.passed(), "{:?}", result.diagnostics);
        assert_eq!(make_log(root.path()).len(), 3);
    }
}
