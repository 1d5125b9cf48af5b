mod libc_bench;
mod nginx;
mod redis;
mod wamr;

pub use libc_bench::LibcBench;
pub use nginx::Nginx;
pub use redis::Redis;
pub use wamr::Wamr;

use crate::scenario::Scenario;

pub const SERVER_PORT: u16 = 5555;
pub const LOG_LEVEL: &str = "warn";
pub const SMP: u32 = 4;

pub fn default_scenarios() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(LibcBench),
        Box::new(Nginx),
        Box::new(Redis),
        Box::new(Wamr),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use crate::config::{HarnessConfig, ReadinessConfig, ReadinessMode};

    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
        path
    }

    pub fn fake_make(dir: &Path, run_script: &str) -> PathBuf {
        let body = format!(
            "echo \"$*\" >> \"$PWD/make.log\"\n\
             for last; do :; done\n\
             case \"$last\" in\n\
             run) {run_script} ;;\n\
             *) exit 0 ;;\n\
             esac"
        );
        fake_tool(dir, "make", &body)
    }

    pub fn test_config(root: &Path, make: &Path) -> HarnessConfig {
        let mut config = HarnessConfig {
            root: root.to_path_buf(),
            settle_secs: 0,
            readiness: ReadinessConfig {
                mode: ReadinessMode::Poll,
                initial_backoff_ms: 10,
                max_backoff_ms: 10,
                max_wait_secs: 0,
            },
            ..HarnessConfig::default()
        };
        config.tools.make = make.to_string_lossy().into_owned();
        config.tools.git = "false".to_string();
        config
    }

    pub fn make_log(root: &Path) -> Vec<String> {
        fs::read_to_string(root.join("make.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn server_pid(root: &Path) -> u32 {
        fs::read_to_string(root.join("run.pid"))
            .expect("server pid file")
            .trim()
            .parse()
            .expect("pid")
    }
}
