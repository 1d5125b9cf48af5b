use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub emulator_pattern: String,
    pub tools: Tools,
    pub strictness: Strictness,
    pub readiness: ReadinessConfig,
    pub settle_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            emulator_pattern: "qemu".to_string(),
            tools: Tools::default(),
            strictness: Strictness::default(),
            readiness: ReadinessConfig::default(),
            settle_secs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub make: String,
    pub git: String,
    pub wget: String,
    pub redis_benchmark: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            make: "make".to_string(),
            git: "git".to_string(),
            wget: "wget".to_string(),
            redis_benchmark: "redis-benchmark".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Strictness {
    pub clean: bool,
    pub build: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    #[default]
    Poll,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessConfig {
    pub mode: ReadinessMode,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_wait_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Poll,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            max_wait_secs: 60,
        }
    }
}

impl ReadinessConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms).max(1))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: HarnessConfig = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.emulator_pattern.trim().is_empty() {
            return Err(anyhow!("emulator_pattern cannot be empty"));
        }
        for (key, value) in [
            ("tools.make", &self.tools.make),
            ("tools.git", &self.tools.git),
            ("tools.wget", &self.tools.wget),
            ("tools.redis_benchmark", &self.tools.redis_benchmark),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{} cannot be empty", key));
            }
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}
