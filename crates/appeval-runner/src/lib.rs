pub mod assets;
pub mod classify;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod process;
pub mod readiness;
pub mod scenario;
pub mod scenarios;
pub mod sweep;

pub use classify::Verdict;
pub use command::{Arch, ExternalCommand, MakeInvocation, MakeVerb};
pub use config::{HarnessConfig, ReadinessMode};
pub use driver::{run_all, EvalReport, Failure};
pub use error::{is_timeout, HarnessError};
pub use scenario::{EvalContext, RunResult, Scenario, ScenarioKind};
pub use scenarios::default_scenarios;
pub use sweep::{SweepReport, Sweeper, SystemProcessTable};
