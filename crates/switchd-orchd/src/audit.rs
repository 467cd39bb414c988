//! Structured audit logging.
//!
//! Resource create/modify/delete paths emit immutable, JSON-serializable
//! audit records suitable for SIEM ingestion. Records carry a UTC
//! timestamp, the originating module, the operation, its outcome, and the
//! affected object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Resource creation events
    ResourceCreate,
    /// Resource modification events
    ResourceModify,
    /// Resource deletion events
    ResourceDelete,
    /// System startup and shutdown
    SystemLifecycle,
    /// Warm restart events
    WarmRestart,
    /// Administrative actions
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::WarmRestart => "WARM_RESTART",
            AuditCategory::AdminAction => "ADMIN_ACTION",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Failure => "FAILURE",
            AuditOutcome::InProgress => "IN_PROGRESS",
        };
        write!(f, "{}", s)
    }
}

/// Structured audit record.
///
/// Immutable once built; the builder ensures a complete record before it
/// is logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp
    pub timestamp: DateTime<Utc>,
    /// Event category
    pub category: AuditCategory,
    /// Source module generating the event
    pub source: String,
    /// Action/operation performed
    pub action: String,
    /// Outcome of the action
    pub outcome: AuditOutcome,
    /// Affected object identifier (handle, port name, profile name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Object type for classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Error message when the outcome is failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a new record with the current timestamp.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets the affected object identifier.
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Sets the object type.
    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    /// Attaches structured context.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches an error message and marks the outcome as failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Serializes the record for log emission.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits a structured audit record at a severity matching its outcome.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(target: "audit", audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}", record.category, record.action, record.outcome);
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(target: "audit", audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}", record.category, record.action, record.outcome);
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(target: "audit", audit_json = %record.to_json(),
                    error = record.error.as_deref().unwrap_or(""),
                    "AUDIT: {} - {} - {}", record.category, record.action, record.outcome);
            }
        }
    };
}
