// src/exec/shell.rs

//! Single shell command runner.

use std::borrow::Cow;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, trace};

/// Captured result of one shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Replace every `{key}` in `template` with its value, quoted as a single
/// shell word.
///
/// Values are escaped for the platform shell, so templates must not wrap
/// placeholders in quotes of their own.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let quoted = shell_escape::escape(Cow::Borrowed(*value));
        out = out.replace(&format!("{{{key}}}"), &quoted);
    }
    out
}

/// Run `cmd` through the platform shell and wait for it to exit.
///
/// stdout and stderr are captured; stderr is also logged at debug.
pub async fn run_shell(cmd: &str, envs: &[(&str, String)], cwd: Option<&Path>) -> Result<ShellOutput> {
    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    trace!(cmd = %cmd, "running shell command");
    let output = command
        .output()
        .await
        .with_context(|| format!("spawning shell command '{cmd}'"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    for line in stderr.lines() {
        debug!(cmd = %cmd, "stderr: {}", line);
    }

    Ok(ShellOutput {
        code: output.status.code(),
        stdout,
        stderr,
    })
}
