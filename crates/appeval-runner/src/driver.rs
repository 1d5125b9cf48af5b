use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

use crate::command::Arch;
use crate::scenario::{EvalContext, RunResult, Scenario, ScenarioKind};
use crate::sweep::{ProcessTable, Sweeper};

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub scenario: ScenarioKind,
    pub arch: Arch,
    pub status: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<RunResult>,
    pub passed_archs: Vec<Arch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl EvalReport {
    pub fn exit_status(&self) -> i32 {
        self.failure.as_ref().map(|f| f.status).unwrap_or(0)
    }

    pub fn failed_result(&self) -> Option<&RunResult> {
        self.results.iter().rev().find(|r| !r.passed())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write_bytes(path, &bytes)
            .with_context(|| format!("writing report {}", path.display()))
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("report");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn run_all<T: ProcessTable>(
    archs: &[Arch],
    scenarios: &[Box<dyn Scenario>],
    ctx: &mut EvalContext,
    sweeper: &mut Sweeper<T>,
) -> Result<EvalReport> {
    let started_at = Utc::now();
    let mut results = Vec::new();
    let mut passed_archs = Vec::new();

    for &arch in archs {
        for scenario in scenarios {
            sweeper.sweep();
            let kind = scenario.kind();
            info!(scenario = %kind, %arch, "scenario starting");
            let result = scenario
                .run(ctx, arch)
                .with_context(|| format!("scenario {} for {} aborted", kind, arch))?;
            info!(
                scenario = %kind,
                %arch,
                status = result.status,
                elapsed_ms = result.elapsed_ms,
                "scenario finished"
            );
            let status = result.status;
            results.push(result);
            if status != 0 {
                error!(scenario = %kind, %arch, errcode = status, "scenario failed");
                return Ok(EvalReport {
                    started_at,
                    finished_at: Utc::now(),
                    results,
                    passed_archs,
                    failure: Some(Failure {
                        scenario: kind,
                        arch,
                        status,
                    }),
                });
            }
        }
        sweeper.sweep();
        info!(%arch, "all scenarios passed");
        passed_archs.push(arch);
    }

    Ok(EvalReport {
        started_at,
        finished_at: Utc::now(),
        results,
        passed_archs,
        failure: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Verdict;
    use crate::config::HarnessConfig;
    use crate::error::{is_timeout, HarnessError};
    use crate::scenario::RunClock;
    use crate::sweep::tests::FakeTable;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    type CallLog = Rc<RefCell<Vec<(ScenarioKind, Arch)>>>;

    enum Behaviour {
        Pass,
        Fail(i32),
        Timeout,
    }

    struct Stub {
        kind: ScenarioKind,
        behaviour: Behaviour,
        calls: CallLog,
    }

    impl Scenario for Stub {
        fn kind(&self) -> ScenarioKind {
            self.kind
        }

        fn run(&self, _ctx: &mut EvalContext, arch: Arch) -> Result<RunResult> {
            self.calls.borrow_mut().push((self.kind, arch));
            let verdict = match self.behaviour {
                Behaviour::Pass => Verdict::Pass,
                Behaviour::Fail(status) => Verdict::Fail {
                    status,
                    diagnostics: "stub failure".to_string(),
                },
                Behaviour::Timeout => {
                    return Err(HarnessError::Timeout {
                        command: "redis-benchmark".to_string(),
                        after: Duration::from_secs(60),
                    }
                    .into())
                }
            };
            Ok(RunClock::start().finish(self.kind, arch, verdict))
        }
    }

    fn stubs(behaviours: Vec<Behaviour>, calls: &CallLog) -> Vec<Box<dyn Scenario>> {
        let kinds = [
            ScenarioKind::LibcBench,
            ScenarioKind::Nginx,
            ScenarioKind::Redis,
            ScenarioKind::Wamr,
        ];
        kinds
            .into_iter()
            .zip(behaviours)
            .map(|(kind, behaviour)| {
                Box::new(Stub {
                    kind,
                    behaviour,
                    calls: Rc::clone(calls),
                }) as Box<dyn Scenario>
            })
            .collect()
    }

    fn fixtures() -> (EvalContext, Sweeper<FakeTable>) {
        (
            EvalContext::new(HarnessConfig::default()),
            Sweeper::new(FakeTable::with(&[(99, "qemu-system-x86_64")]), "qemu"),
        )
    }

    #[test]
    fn second_failure_stops_the_run() {
        let calls = CallLog::default();
        let scenarios = stubs(
            vec![
                Behaviour::Pass,
                Behaviour::Fail(7),
                Behaviour::Pass,
                Behaviour::Pass,
            ],
            &calls,
        );
        let (mut ctx, mut sweeper) = fixtures();
        let report = run_all(
            &[Arch::X86_64, Arch::Aarch64],
            &scenarios,
            &mut ctx,
            &mut sweeper,
        )
        .expect("run_all");

        assert_eq!(report.exit_status(), 7);
        assert_eq!(
            *calls.borrow(),
            vec![
                (ScenarioKind::LibcBench, Arch::X86_64),
                (ScenarioKind::Nginx, Arch::X86_64),
            ]
        );
        let failure = report.failure.as_ref().expect("failure");
        assert_eq!(failure.scenario, ScenarioKind::Nginx);
        assert_eq!(failure.arch, Arch::X86_64);
        assert!(report.passed_archs.is_empty());
        assert_eq!(
            report.failed_result().and_then(|r| r.diagnostics.as_deref()),
            Some("stub failure")
        );
        // One sweep before each scenario that ran.
        assert_eq!(sweeper.table().listings, 2);
    }

    #[test]
    fn full_pass_sweeps_before_each_scenario_and_after_the_last() {
        let calls = CallLog::default();
        let scenarios = stubs(
            vec![
                Behaviour::Pass,
                Behaviour::Pass,
                Behaviour::Pass,
                Behaviour::Pass,
            ],
            &calls,
        );
        let (mut ctx, mut sweeper) = fixtures();
        let report = run_all(
            &[Arch::X86_64, Arch::Aarch64],
            &scenarios,
            &mut ctx,
            &mut sweeper,
        )
        .expect("run_all");

        assert_eq!(report.exit_status(), 0);
        assert_eq!(report.results.len(), 8);
        assert_eq!(report.passed_archs, vec![Arch::X86_64, Arch::Aarch64]);
        assert_eq!(sweeper.table().listings, 10);
        assert_eq!(calls.borrow()[4], (ScenarioKind::LibcBench, Arch::Aarch64));
    }

    #[test]
    fn later_architectures_are_skipped_after_failure() {
        let calls = CallLog::default();
        let scenarios = stubs(
            vec![
                Behaviour::Pass,
                Behaviour::Pass,
                Behaviour::Pass,
                Behaviour::Fail(1),
            ],
            &calls,
        );
        let (mut ctx, mut sweeper) = fixtures();
        let report = run_all(
            &[Arch::Aarch64, Arch::X86_64],
            &scenarios,
            &mut ctx,
            &mut sweeper,
        )
        .expect("run_all");
        assert_eq!(report.exit_status(), 1);
        assert!(calls.borrow().iter().all(|(_, arch)| *arch == Arch::Aarch64));
    }

    #[test]
    fn timeout_aborts_everything() {
        let calls = CallLog::default();
        let scenarios = stubs(
            vec![
                Behaviour::Pass,
                Behaviour::Pass,
                Behaviour::Timeout,
                Behaviour::Pass,
            ],
            &calls,
        );
        let (mut ctx, mut sweeper) = fixtures();
        let err = run_all(&[Arch::X86_64], &scenarios, &mut ctx, &mut sweeper)
            .expect_err("timeout must abort");
        assert!(is_timeout(&err));
        assert!(err.to_string().contains("redis"), "{}", err);
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn report_serializes_kebab_case_names() {
        let calls = CallLog::default();
        let scenarios = stubs(vec![Behaviour::Fail(4)], &calls);
        let (mut ctx, mut sweeper) = fixtures();
        let report =
            run_all(&[Arch::Riscv64], &scenarios, &mut ctx, &mut sweeper).expect("run_all");
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["failure"]["scenario"], "libc-bench");
        assert_eq!(value["failure"]["arch"], "riscv64");
        assert_eq!(value["results"][0]["status"], 4);
    }

    #[test]
    fn report_is_written_without_leftover_temp_files() {
        let calls = CallLog::default();
        let scenarios = stubs(vec![Behaviour::Pass], &calls);
        let (mut ctx, mut sweeper) = fixtures();
        let report =
            run_all(&[Arch::X86_64], &scenarios, &mut ctx, &mut sweeper).expect("run_all");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out").join("report.json");
        report.write(&path).expect("write");
        report.write(&path).expect("overwrite");

        let text = fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["passed_archs"][0], "x86_64");
        assert!(value.get("failure").is_none());
        let entries = fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .count();
        assert_eq!(entries, 1);
    }
}
