use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Aarch64,
    Riscv64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn to_command(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(cwd);
        cmd
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

// Only used to print a copy-pasteable command line in logs.
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakeVerb {
    Default,
    Build,
    Clean,
    Run,
    DiskImg,
}

impl MakeVerb {
    fn goal(&self) -> Option<&'static str> {
        match self {
            MakeVerb::Default => None,
            MakeVerb::Build => Some("build"),
            MakeVerb::Clean => Some("clean"),
            MakeVerb::Run => Some("run"),
            MakeVerb::DiskImg => Some("disk_img"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeInvocation {
    pub app: Option<String>,
    pub arch: Option<Arch>,
    pub musl: bool,
    pub log: Option<String>,
    pub smp: Option<u32>,
    pub net: bool,
    pub blk: bool,
    pub v9p: bool,
    pub v9p_path: Option<String>,
    pub features: Vec<String>,
    pub guest_args: Vec<String>,
    pub accel: Option<bool>,
    pub verb: MakeVerb,
}

impl MakeInvocation {
    pub fn new(verb: MakeVerb) -> Self {
        Self {
            app: None,
            arch: None,
            musl: false,
            log: None,
            smp: None,
            net: false,
            blk: false,
            v9p: false,
            v9p_path: None,
            features: Vec::new(),
            guest_args: Vec::new(),
            accel: None,
            verb,
        }
    }

    pub fn app(verb: MakeVerb, app: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            ..Self::new(verb)
        }
    }

    pub fn with_verb(&self, verb: MakeVerb) -> Self {
        Self {
            verb,
            ..self.clone()
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(app) = &self.app {
            out.push(format!("A={}", app));
        }
        if let Some(arch) = self.arch {
            out.push(format!("ARCH={}", arch));
        }
        if self.musl {
            out.push("MUSL=y".to_string());
        }
        if let Some(log) = &self.log {
            out.push(format!("LOG={}", log));
        }
        if let Some(smp) = self.smp {
            out.push(format!("SMP={}", smp));
        }
        if self.net {
            out.push("NET=y".to_string());
        }
        if self.blk {
            out.push("BLK=y".to_string());
        }
        if self.v9p {
            out.push("V9P=y".to_string());
        }
        if let Some(path) = &self.v9p_path {
            out.push(format!("V9P_PATH={}", path));
        }
        if !self.features.is_empty() {
            out.push(format!("FEATURES={}", self.features.join(",")));
        }
        if !self.guest_args.is_empty() {
            out.push(format!("ARGS={}", self.guest_args.join(",")));
        }
        if let Some(accel) = self.accel {
            out.push(format!("ACCEL={}", if accel { "y" } else { "n" }));
        }
        if let Some(goal) = self.verb.goal() {
            out.push(goal.to_string());
        }
        out
    }

    pub fn to_external(&self, make: &str) -> ExternalCommand {
        ExternalCommand::new(make).args(self.to_args())
    }
}
