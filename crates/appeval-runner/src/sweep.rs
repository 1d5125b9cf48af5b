use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub zombie: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFailure {
    // Exited between listing and signalling.
    Gone,
    PermissionDenied,
    Other,
}

pub trait ProcessTable {
    fn list(&mut self) -> Vec<ProcessEntry>;
    fn terminate(&mut self, pid: u32) -> Result<(), SignalFailure>;
}

pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&mut self) -> Vec<ProcessEntry> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                zombie: process.status() == ProcessStatus::Zombie,
            })
            .collect()
    }

    fn terminate(&mut self, pid: u32) -> Result<(), SignalFailure> {
        let raw = i32::try_from(pid).map_err(|_| SignalFailure::Other)?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(SignalFailure::Gone),
            Err(Errno::EPERM) => Err(SignalFailure::PermissionDenied),
            Err(_) => Err(SignalFailure::Other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub signaled: Vec<u32>,
    pub skipped: Vec<(u32, SignalFailure)>,
}

pub struct Sweeper<T: ProcessTable> {
    table: T,
    pattern: String,
}

impl<T: ProcessTable> Sweeper<T> {
    pub fn new(table: T, pattern: impl Into<String>) -> Self {
        Self {
            table,
            pattern: pattern.into(),
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        for entry in self.table.list() {
            if !entry.name.contains(&self.pattern) {
                continue;
            }
            if entry.zombie {
                debug!(pid = entry.pid, name = %entry.name, "skipping zombie");
                continue;
            }
            match self.table.terminate(entry.pid) {
                Ok(()) => report.signaled.push(entry.pid),
                Err(reason) => {
                    debug!(pid = entry.pid, ?reason, "could not signal stray process");
                    report.skipped.push((entry.pid, reason));
                }
            }
        }
        if !report.signaled.is_empty() {
            info!(pattern = %self.pattern, pids = ?report.signaled, "terminated stray processes");
        }
        report
    }
}
