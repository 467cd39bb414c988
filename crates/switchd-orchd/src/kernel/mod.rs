//! Kernel network device manipulation.
//!
//! Devices are driven through fixed `ip`/`bridge` command templates with
//! every user-supplied token shell-escaped; any nonzero exit is a failure.
//! The [`KernelClient`] seam lets tests capture the command stream instead
//! of touching the host.

pub mod commands;
pub mod shell;

pub use shell::{shellquote, ExecResult, KernelError, KernelResult};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted behavior for a mocked kernel.
#[derive(Debug, Default)]
pub struct MockKernelState {
    /// Commands executed, in order.
    pub captured: Vec<String>,
    /// Substrings whose matching commands fail with exit code 1.
    pub fail_patterns: Vec<String>,
    /// Canned stdout replies, consumed in order by `exec_output`.
    pub outputs: VecDeque<String>,
}

enum Backend {
    Shell,
    Mock(Arc<Mutex<MockKernelState>>),
}

/// Executes kernel configuration commands.
pub struct KernelClient {
    backend: Backend,
}

impl KernelClient {
    /// Creates a client that executes commands through the shell.
    pub fn new() -> Self {
        Self {
            backend: Backend::Shell,
        }
    }

    /// Creates a capture-mode client for tests.
    pub fn mock() -> (Self, Arc<Mutex<MockKernelState>>) {
        let state = Arc::new(Mutex::new(MockKernelState::default()));
        (
            Self {
                backend: Backend::Mock(Arc::clone(&state)),
            },
            state,
        )
    }

    /// Executes a command, failing on nonzero exit.
    pub async fn exec(&self, cmd: &str) -> KernelResult<()> {
        self.exec_output(cmd).await.map(|_| ())
    }

    /// Executes a command and returns its stdout, failing on nonzero exit.
    pub async fn exec_output(&self, cmd: &str) -> KernelResult<String> {
        match &self.backend {
            Backend::Shell => shell::exec_or_throw(cmd).await,
            Backend::Mock(state) => {
                let mut state = state.lock().expect("mock kernel lock poisoned");
                state.captured.push(cmd.to_string());
                if state.fail_patterns.iter().any(|p| cmd.contains(p.as_str())) {
                    return Err(KernelError::CommandFailed {
                        command: cmd.to_string(),
                        exit_code: 1,
                        output: "mock failure".to_string(),
                    });
                }
                Ok(state.outputs.pop_front().unwrap_or_default())
            }
        }
    }
}

impl Default for KernelClient {
    fn default() -> Self {
        Self::new()
    }
}
