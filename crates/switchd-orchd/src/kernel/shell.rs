//! Shell command execution with injection-safe quoting.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `bridge` command.
pub const BRIDGE_CMD: &str = "/sbin/bridge";

/// Path to the `bash` shell for compound command sequences.
pub const BASH_CMD: &str = "/bin/bash";

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors from kernel device manipulation.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The command could not be spawned.
    #[error("failed to execute '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command returned a nonzero exit code.
    #[error("command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },
}

/// Characters that need escaping inside shell double-quotes:
/// $, `, ", \, and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("invalid escape pattern"));

/// Quotes a string for safe interpolation into a shell command.
///
/// Wraps the string in double quotes and escapes the characters that have
/// special meaning inside them.
///
/// ```
/// use switchd_orchd::kernel::shellquote;
///
/// assert_eq!(shellquote("Ethernet0"), "\"Ethernet0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code (0 = success).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a shell command through `/bin/sh -c`.
pub async fn exec(cmd: &str) -> KernelResult<ExecResult> {
    tracing::debug!(command = %cmd, "executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| KernelError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command, converting a nonzero exit into an error.
pub async fn exec_or_throw(cmd: &str) -> KernelResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(KernelError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
