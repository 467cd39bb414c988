//! Task processing status and the shared error taxonomy.

use switchd_asic::error::{AsicError, StatusDisposition};
use thiserror::Error;

/// Result of processing a single task entry.
///
/// The dispatch policy is uniform across every orchestrator: terminal
/// statuses erase the entry from the task queue, `NeedRetry` leaves it in
/// place for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Task completed successfully (terminal)
    Success,
    /// Malformed key or fields; never retried (terminal)
    InvalidEntry,
    /// Task failed permanently (terminal, logged as error)
    Failed,
    /// Dependency not yet met or resource busy; entry stays queued
    NeedRetry,
    /// Task intentionally skipped (terminal)
    Ignore,
}

impl TaskStatus {
    /// Returns true if the entry should be erased from the task queue.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::NeedRetry)
    }

    /// Returns true if the task should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }

    /// Returns true if the task failed permanently.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Failed)
    }
}

/// Error taxonomy for task processing failures.
///
/// Handlers return these instead of propagating errors across the dispatch
/// boundary; the dispatch loop maps each variant onto a [`TaskStatus`].
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Malformed key or field value; the entry is dropped.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A profile/port/tunnel/VLAN dependency is not yet present.
    #[error("dependency not ready: {dependency}")]
    DependencyUnready { dependency: String },

    /// A native ASIC/process/shell call failed.
    #[error("external call failed: {message}")]
    ExternalCallFailure { message: String },

    /// Delete requested while references remain.
    #[error("resource busy: {resource} ({refs} references)")]
    ResourceBusy { resource: String, refs: u32 },

    /// Configuration rejected at the validation boundary.
    #[error("config conflict: {message}")]
    ConfigConflict { message: String },

    /// The entry is intentionally skipped.
    #[error("ignored: {reason}")]
    Ignored { reason: String },

    /// Unexpected internal state.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        TaskError::Parse {
            message: message.into(),
        }
    }

    /// Creates a dependency-unready error.
    pub fn dependency(dependency: impl Into<String>) -> Self {
        TaskError::DependencyUnready {
            dependency: dependency.into(),
        }
    }

    /// Creates an external-call failure.
    pub fn external(message: impl Into<String>) -> Self {
        TaskError::ExternalCallFailure {
            message: message.into(),
        }
    }

    /// Creates a resource-busy error.
    pub fn busy(resource: impl Into<String>, refs: u32) -> Self {
        TaskError::ResourceBusy {
            resource: resource.into(),
            refs,
        }
    }

    /// Creates a config-conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        TaskError::ConfigConflict {
            message: message.into(),
        }
    }

    /// Creates an ignored error.
    pub fn ignored(reason: impl Into<String>) -> Self {
        TaskError::Ignored {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Maps an ASIC error through the shared status classification.
    ///
    /// Transient resource pressure and in-use objects stay queued;
    /// everything else drops the task.
    pub fn from_asic(resource: impl Into<String>, err: AsicError) -> Self {
        let resource = resource.into();
        match err.disposition() {
            StatusDisposition::Retry => {
                TaskError::dependency(format!("{}: {}", resource, err))
            }
            StatusDisposition::Busy => TaskError::busy(resource, 1),
            StatusDisposition::Fatal => {
                TaskError::external(format!("{}: {}", resource, err))
            }
        }
    }

    /// Maps this error onto the dispatch policy.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::Parse { .. } => TaskStatus::InvalidEntry,
            TaskError::DependencyUnready { .. } | TaskError::ResourceBusy { .. } => {
                TaskStatus::NeedRetry
            }
            TaskError::ExternalCallFailure { .. }
            | TaskError::ConfigConflict { .. }
            | TaskError::Internal { .. } => TaskStatus::Failed,
            TaskError::Ignored { .. } => TaskStatus::Ignore,
        }
    }
}

/// Result type for task processing.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting a TaskResult to a TaskStatus.
pub trait TaskResultExt {
    /// Converts this result to a TaskStatus.
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::InvalidEntry.is_terminal());
        assert!(TaskStatus::Ignore.is_terminal());
        assert!(!TaskStatus::NeedRetry.is_terminal());

        assert!(TaskStatus::NeedRetry.is_retryable());
        assert!(TaskStatus::Failed.is_failure());
        assert!(!TaskStatus::NeedRetry.is_failure());
    }

    #[test]
    fn test_error_to_status() {
        assert_eq!(TaskError::parse("bad key").to_status(), TaskStatus::InvalidEntry);
        assert_eq!(
            TaskError::dependency("VLAN_TABLE:Vlan100").to_status(),
            TaskStatus::NeedRetry
        );
        assert_eq!(TaskError::busy("tun1", 2).to_status(), TaskStatus::NeedRetry);
        assert_eq!(TaskError::external("ip failed").to_status(), TaskStatus::Failed);
        assert_eq!(
            TaskError::conflict("missing primary_ckn").to_status(),
            TaskStatus::Failed
        );
        assert_eq!(TaskError::ignored("default").to_status(), TaskStatus::Ignore);
    }

    #[test]
    fn test_result_ext() {
        let ok: TaskResult<()> = Ok(());
        assert_eq!(ok.to_status(), TaskStatus::Success);

        let err: TaskResult<()> = Err(TaskError::dependency("PORT_TABLE:Ethernet0"));
        assert_eq!(err.to_status(), TaskStatus::NeedRetry);
    }
}
