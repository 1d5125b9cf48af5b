use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::command::ExternalCommand;
use crate::error::HarnessError;
use crate::process::run_captured;

pub const RUX_NGINX_URL: &str = "https://github.com/syswonder/rux-nginx.git";
pub const RUX_REDIS_URL: &str = "https://github.com/syswonder/rux-redis.git";
pub const RUX_WAMR_URL: &str = "https://github.com/syswonder/rux-wamr.git";
pub const SYSWONDER_WEB_URL: &str = "https://github.com/syswonder/syswonder-web.git";

pub fn ensure_clone(
    git: &str,
    root: &Path,
    url: &str,
    dest: &str,
    timeout: Duration,
) -> Result<()> {
    if root.join(dest).exists() {
        info!(dest, "source tree already present");
        return Ok(());
    }
    let cmd = ExternalCommand::new(git).args(["clone", url, dest]);
    info!(command = %cmd, "cloning");
    if !clone(&cmd, root, timeout)? {
        warn!(url, "git clone failed");
    }
    Ok(())
}

// True only for a clone that ran and succeeded. A git that cannot be
// started counts as a failed clone; timeouts propagate.
fn clone(cmd: &ExternalCommand, root: &Path, timeout: Duration) -> Result<bool> {
    match run_captured(cmd, root, timeout) {
        Ok(out) if out.success() => Ok(true),
        Ok(out) => {
            warn!(exit_code = out.exit_code, stderr = %out.stderr.trim(), "git exited non-zero");
            Ok(false)
        }
        Err(err @ HarnessError::Spawn { .. }) => {
            warn!(error = %err, "could not start git");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn install_web_root(git: &str, root: &Path, html_dir: &Path, timeout: Duration) -> Result<()> {
    let scratch = tempfile::Builder::new()
        .prefix("syswonder-web")
        .tempdir_in(root)
        .context("creating scratch dir for web content")?;
    let checkout = scratch.path().join("syswonder-web");
    let cmd = ExternalCommand::new(git)
        .arg("clone")
        .arg(SYSWONDER_WEB_URL)
        .arg(checkout.to_string_lossy().into_owned());
    info!(command = %cmd, "fetching web content");
    if !clone(&cmd, root, timeout)? {
        warn!("web content clone failed");
        return Ok(());
    }
    let copied = copy_tree(&checkout.join("docs"), &root.join(html_dir))?;
    info!(files = copied, dest = %html_dir.display(), "installed web root");
    Ok(())
}

pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(anyhow!("not a directory: {}", src.display()));
    }
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn copy_tree_copies_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("docs");
        fs::create_dir_all(src.join("assets/css")).expect("mkdir");
        fs::write(src.join("index.html"), "<html/>").expect("write");
        fs::write(src.join("assets/css/site.css"), "body{}").expect("write");
        let dst = dir.path().join("html");
        fs::create_dir_all(&dst).expect("mkdir");
        fs::write(dst.join("index.html"), "old").expect("write");

        let copied = copy_tree(&src, &dst).expect("copy");
        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("index.html")).expect("read"), "<html/>");
        assert!(dst.join("assets/css/site.css").is_file());
    }

    #[test]
    fn copy_tree_rejects_missing_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(copy_tree(&dir.path().join("nope"), &dir.path().join("out")).is_err());
    }

    #[test]
    fn ensure_clone_skips_existing_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("apps/c/redis")).expect("mkdir");
        // A git that would fail if invoked.
        ensure_clone(
            "definitely-not-a-real-git",
            dir.path(),
            RUX_REDIS_URL,
            "apps/c/redis",
            Duration::from_secs(1),
        )
        .expect("existing tree must short-circuit");
    }

    #[test]
    fn ensure_clone_tolerates_failed_clone() {
        let dir = tempfile::tempdir().expect("tempdir");
        ensure_clone(
            "false",
            dir.path(),
            RUX_WAMR_URL,
            "apps/c/wamr",
            Duration::from_secs(5),
        )
        .expect("failed clone is not fatal");
    }

    #[test]
    fn missing_git_binary_is_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        ensure_clone(
            "definitely-not-a-real-git",
            dir.path(),
            RUX_NGINX_URL,
            "apps/c/nginx",
            Duration::from_secs(5),
        )
        .expect("unstartable git is not fatal");
        install_web_root(
            "definitely-not-a-real-git",
            dir.path(),
            Path::new("apps/c/nginx/html"),
            Duration::from_secs(5),
        )
        .expect("unstartable git is not fatal");
        assert!(!dir.path().join("apps/c/nginx/html").exists());
    }

    #[test]
    fn clone_timeout_still_propagates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = dir.path().join("slow-git");
        fs::write(&git, "#!/bin/sh\nsleep 30\n").expect("write git");
        fs::set_permissions(&git, fs::Permissions::from_mode(0o755)).expect("chmod git");
        let err = ensure_clone(
            &git.to_string_lossy(),
            dir.path(),
            RUX_WAMR_URL,
            "apps/c/wamr",
            Duration::from_millis(200),
        )
        .expect_err("timeout must propagate");
        assert!(crate::error::is_timeout(&err));
    }
}
