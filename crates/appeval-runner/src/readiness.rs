use anyhow::Result;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ReadinessConfig, ReadinessMode};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// The emulator's port forward accepts TCP connections before the guest listens.
pub enum Probe {
    Http {
        url: String,
        client: reqwest::blocking::Client,
    },
    RedisPing {
        addr: SocketAddr,
    },
}

impl Probe {
    pub fn http(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Probe::Http {
            url: url.into(),
            client,
        })
    }

    pub fn redis(addr: SocketAddr) -> Self {
        Probe::RedisPing { addr }
    }

    pub fn check(&self) -> bool {
        match self {
            // Any HTTP response means nginx is up, whatever the status.
            Probe::Http { url, client } => client.get(url).send().is_ok(),
            Probe::RedisPing { addr } => redis_ping(*addr).unwrap_or(false),
        }
    }

    fn describe(&self) -> String {
        match self {
            Probe::Http { url, .. } => format!("GET {}", url),
            Probe::RedisPing { addr } => format!("PING {}", addr),
        }
    }
}

fn redis_ping(addr: SocketAddr) -> std::io::Result<bool> {
    let mut stream = TcpStream::connect_timeout(&addr, PROBE_TIMEOUT)?;
    stream.set_read_timeout(Some(PROBE_TIMEOUT))?;
    stream.set_write_timeout(Some(PROBE_TIMEOUT))?;
    stream.write_all(b"PING\r\n")?;
    let mut reply = [0u8; 16];
    let n = stream.read(&mut reply)?;
    Ok(reply[..n].starts_with(b"+PONG"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ready { after: Duration },
    Slept(Duration),
    GaveUp { waited: Duration },
    ServerExited,
}

pub fn wait_ready<F>(
    probe: &Probe,
    config: &ReadinessConfig,
    fixed_delay: Duration,
    mut still_running: F,
) -> ReadyOutcome
where
    F: FnMut() -> bool,
{
    if config.mode == ReadinessMode::Fixed {
        debug!(secs = fixed_delay.as_secs(), "fixed readiness delay");
        thread::sleep(fixed_delay);
        return ReadyOutcome::Slept(fixed_delay);
    }

    let start = Instant::now();
    let max_wait = config.max_wait();
    let mut delay = config.initial_backoff();
    loop {
        if probe.check() {
            let after = start.elapsed();
            info!(probe = %probe.describe(), after_ms = after.as_millis() as u64, "server ready");
            return ReadyOutcome::Ready { after };
        }
        if !still_running() {
            warn!(probe = %probe.describe(), "server exited before becoming ready");
            return ReadyOutcome::ServerExited;
        }
        let waited = start.elapsed();
        if waited >= max_wait {
            warn!(probe = %probe.describe(), waited_secs = waited.as_secs(), "server not ready, continuing");
            return ReadyOutcome::GaveUp { waited };
        }
        thread::sleep(delay.min(max_wait - waited));
        delay = (delay * 2).min(config.max_backoff());
    }
}
