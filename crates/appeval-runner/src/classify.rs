use crate::process::{normalize_newlines, CommandOutput};

pub const CONTENT_MISMATCH: i32 = 1;

pub const NGINX_SAVED_MARKER: &str = "saved";
pub const REDIS_SET_MARKER: &str = "SET";
pub const REDIS_GET_MARKER: &str = "GET";
pub const WAMR_HELLO_MARKER: &str = "Hello world!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { status: i32, diagnostics: String },
}

impl Verdict {
    pub fn status(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail { status, .. } => *status,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    fn from_exit(code: i32, diagnostics: impl FnOnce() -> String) -> Self {
        if code == 0 {
            Verdict::Pass
        } else {
            Verdict::Fail {
                status: code,
                diagnostics: diagnostics(),
            }
        }
    }
}

// Expected lines keep their newline, so each must appear terminated in the output.
pub fn first_missing_line<'a>(output: &str, expected: &'a str) -> Option<&'a str> {
    expected
        .split_inclusive('\n')
        .find(|line| !output.contains(line))
}

pub fn classify_libc_bench(run: &CommandOutput, expected: &str) -> Verdict {
    let stdout = normalize_newlines(&run.stdout);
    let expected = normalize_newlines(expected);
    if let Some(line) = first_missing_line(&stdout, &expected) {
        return Verdict::Fail {
            status: CONTENT_MISMATCH,
            diagnostics: format!(
                "missing expected line {:?}\n--- stdout ---\n{}\n--- stderr ---\n{}",
                line.trim_end_matches('\n'),
                run.stdout,
                run.stderr
            ),
        };
    }
    Verdict::from_exit(run.exit_code, || describe_streams(run))
}

// wget reports success on stderr; its exit code is not consulted.
pub fn classify_nginx(fetch: &CommandOutput) -> Verdict {
    if fetch.stderr.contains(NGINX_SAVED_MARKER) {
        Verdict::Pass
    } else {
        Verdict::Fail {
            status: CONTENT_MISMATCH,
            diagnostics: describe_streams(fetch),
        }
    }
}

pub fn classify_redis(set: &CommandOutput, get: &CommandOutput) -> Verdict {
    if !(set.stdout.contains(REDIS_SET_MARKER) && get.stdout.contains(REDIS_GET_MARKER)) {
        return Verdict::Fail {
            status: CONTENT_MISMATCH,
            diagnostics: redis_diagnostics(set, get),
        };
    }
    Verdict::from_exit(set.exit_code | get.exit_code, || {
        redis_diagnostics(set, get)
    })
}

pub fn classify_wamr(run: &CommandOutput) -> Verdict {
    if !run.stdout.contains(WAMR_HELLO_MARKER) {
        return Verdict::Fail {
            status: CONTENT_MISMATCH,
            diagnostics: describe_streams(run),
        };
    }
    Verdict::from_exit(run.exit_code, || describe_streams(run))
}

pub fn describe_streams(out: &CommandOutput) -> String {
    format!(
        "--- stdout ---\n{}\n--- stderr ---\n{}",
        out.stdout, out.stderr
    )
}

fn redis_diagnostics(set: &CommandOutput, get: &CommandOutput) -> String {
    format!(
        "=== SET (exit {}) ===\n{}\n=== GET (exit {}) ===\n{}",
        set.exit_code,
        describe_streams(set),
        get.exit_code,
        describe_streams(get)
    )
}
