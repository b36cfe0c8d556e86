use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::anyhow;
use memget_core::fs_paths::{AppPaths, DesktopPaths};

fn enhanced_path() -> Option<String> {
    let bin_dir: PathBuf = DesktopPaths.bin_dir()?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// External tool invocation with the managed bin dir on `PATH`.
pub fn command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = enhanced_path() {
        cmd.env("PATH", path);
    }
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// Runs `cmd` to completion, killing it when `limit` elapses.
pub async fn output_with_timeout(
    mut cmd: tokio::process::Command,
    limit: Duration,
) -> anyhow::Result<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|e| anyhow!("failed to start: {}", e))?;
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs())),
    }
}

/// Last few hundred bytes of stderr, for log lines.
pub fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(300);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_end() {
        #[cfg(unix)]
        use std::os::unix::process::ExitStatusExt;
        #[cfg(windows)]
        use std::os::windows::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: format!("{}tail", "x".repeat(400)).into_bytes(),
        };
        let tail = stderr_tail(&output);
        assert_eq!(tail.len(), 300);
        assert!(tail.ends_with("tail"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let mut cmd = command("sleep");
        cmd.arg("5");
        let err = output_with_timeout(cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
