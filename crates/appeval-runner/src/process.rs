use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::command::ExternalCommand;
use crate::error::HarnessError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;
// How long a finished child's pipes may keep a reader thread busy.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// Own process group: a timeout also takes down the emulator make spawned.
pub fn run_captured(
    cmd: &ExternalCommand,
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput, HarnessError> {
    let rendered = cmd.to_string();
    debug!(command = %rendered, timeout_secs = timeout.as_secs(), "running command");
    let mut command = cmd.to_command(cwd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
        command: rendered.clone(),
        source,
    })?;
    let pgid = Pid::from_raw(child.id() as i32);
    let stdout = Drain::start(child.stdout.take());
    let stderr = Drain::start(child.stderr.take());

    let status = wait_with_deadline(&mut child, timeout).map_err(|source| HarnessError::Wait {
        command: rendered.clone(),
        source,
    })?;
    let Some(status) = status else {
        warn!(command = %rendered, "command timed out, killing its process group");
        signal_group(pgid, Signal::SIGKILL);
        let _ = child.kill();
        let _ = child.wait();
        return Err(HarnessError::Timeout {
            command: rendered,
            after: timeout,
        });
    };
    let output = CommandOutput {
        exit_code: exit_code(status),
        stdout: stdout.finish(),
        stderr: stderr.finish(),
    };
    debug!(command = %rendered, exit_code = output.exit_code, "command finished");
    Ok(output)
}

pub struct ServerProcess {
    command: String,
    child: Option<Child>,
    pgid: Pid,
    stdout: Option<Drain>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerExit {
    pub exit_code: i32,
    pub stdout: String,
}

impl ServerProcess {
    pub fn spawn(cmd: &ExternalCommand, cwd: &Path) -> Result<Self, HarnessError> {
        let rendered = cmd.to_string();
        debug!(command = %rendered, "launching server");
        let mut command = cmd.to_command(cwd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0);
        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            command: rendered.clone(),
            source,
        })?;
        let pgid = Pid::from_raw(child.id() as i32);
        let stdout = Drain::start(child.stdout.take());
        Ok(Self {
            command: rendered,
            child: Some(child),
            pgid,
            stdout: Some(stdout),
        })
    }

    pub fn id(&self) -> u32 {
        self.pgid.as_raw() as u32
    }

    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    pub fn terminate(&mut self, timeout: Duration) -> Result<ServerExit, HarnessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(ServerExit {
                exit_code: 0,
                stdout: self.take_stdout(),
            });
        };
        let exited = match child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => {
                debug!(pid = self.pgid.as_raw(), command = %self.command, "terminating server");
                signal_group(self.pgid, Signal::SIGTERM);
                wait_with_deadline(&mut child, timeout).map_err(|source| HarnessError::Wait {
                    command: self.command.clone(),
                    source,
                })?
            }
        };
        match exited {
            Some(status) => Ok(ServerExit {
                exit_code: exit_code(status),
                stdout: self.take_stdout(),
            }),
            None => {
                warn!(pid = self.pgid.as_raw(), "server ignored SIGTERM, killing");
                signal_group(self.pgid, Signal::SIGKILL);
                let _ = child.kill();
                let _ = child.wait();
                Err(HarnessError::Timeout {
                    command: self.command.clone(),
                    after: timeout,
                })
            }
        }
    }

    fn take_stdout(&mut self) -> String {
        self.stdout.take().map(Drain::finish).unwrap_or_default()
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            signal_group(self.pgid, Signal::SIGKILL);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(pgid = pgid.as_raw(), %err, "killpg failed"),
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

struct Drain {
    buf: Arc<Mutex<Captured>>,
    handle: Option<JoinHandle<()>>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Captured::default()));
        let handle = pipe.map(|mut pipe| {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut guard = match buf.lock() {
                                Ok(g) => g,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            let room = MAX_CAPTURE_BYTES.saturating_sub(guard.bytes.len());
                            if n > room {
                                guard.truncated = true;
                            }
                            guard.bytes.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            })
        });
        Self { buf, handle }
    }

    fn finish(mut self) -> String {
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + DRAIN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        let guard = match self.buf.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut text = normalize_newlines(&String::from_utf8_lossy(&guard.bytes));
        if guard.truncated {
            text.push_str("\n[output truncated]\n");
        }
        text
    }
}

// Guest consoles emit `\r\n`; callers match on `\n`-terminated lines.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
pub(crate) fn process_exists(pid: u32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
