//! ASIC status codes and the shared retry/fatal classification.
//!
//! Every native call returns a raw status; orchestrators never interpret the
//! raw value themselves, they go through [`AsicStatus::classify`] so the
//! retry policy stays uniform across domains.

use std::fmt;
use thiserror::Error;

/// Raw status codes from the ASIC abstraction layer.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsicStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    TableFull = -8,
    MandatoryAttributeMissing = -9,
    ObjectInUse = -10,
    Uninitialized = -11,
}

/// How a non-success status should be handled by the task dispatch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisposition {
    /// Transient resource pressure; keep the task queued and retry.
    Retry,
    /// The object still has dependents; retry once they clear.
    Busy,
    /// Programming error or unsupported operation; drop the task.
    Fatal,
}

impl AsicStatus {
    /// Creates a status from a raw i32 value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => AsicStatus::Success,
            -2 => AsicStatus::NotSupported,
            -3 => AsicStatus::NoMemory,
            -4 => AsicStatus::InsufficientResources,
            -5 => AsicStatus::InvalidParameter,
            -6 => AsicStatus::ItemAlreadyExists,
            -7 => AsicStatus::ItemNotFound,
            -8 => AsicStatus::TableFull,
            -9 => AsicStatus::MandatoryAttributeMissing,
            -10 => AsicStatus::ObjectInUse,
            -11 => AsicStatus::Uninitialized,
            _ => AsicStatus::Failure,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == AsicStatus::Success
    }

    /// Classifies a non-success status into the shared retry policy.
    ///
    /// Resource-pressure statuses are transient, `ObjectInUse` means a
    /// dependent still holds the object, everything else is fatal for the
    /// requesting task.
    pub fn classify(&self) -> StatusDisposition {
        match self {
            AsicStatus::NoMemory
            | AsicStatus::InsufficientResources
            | AsicStatus::TableFull
            | AsicStatus::Uninitialized => StatusDisposition::Retry,
            AsicStatus::ObjectInUse => StatusDisposition::Busy,
            _ => StatusDisposition::Fatal,
        }
    }

    /// Converts to a Result, returning `Ok(())` for success.
    pub fn into_result(self) -> AsicResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(AsicError::Status { status: self })
        }
    }
}

impl fmt::Display for AsicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsicStatus::Success => "SUCCESS",
            AsicStatus::Failure => "FAILURE",
            AsicStatus::NotSupported => "NOT_SUPPORTED",
            AsicStatus::NoMemory => "NO_MEMORY",
            AsicStatus::InsufficientResources => "INSUFFICIENT_RESOURCES",
            AsicStatus::InvalidParameter => "INVALID_PARAMETER",
            AsicStatus::ItemAlreadyExists => "ITEM_ALREADY_EXISTS",
            AsicStatus::ItemNotFound => "ITEM_NOT_FOUND",
            AsicStatus::TableFull => "TABLE_FULL",
            AsicStatus::MandatoryAttributeMissing => "MANDATORY_ATTRIBUTE_MISSING",
            AsicStatus::ObjectInUse => "OBJECT_IN_USE",
            AsicStatus::Uninitialized => "UNINITIALIZED",
        };
        write!(f, "{}", s)
    }
}

/// Error type for ASIC operations.
#[derive(Debug, Clone, Error)]
pub enum AsicError {
    /// The ASIC layer returned an error status.
    #[error("ASIC operation failed: {status}")]
    Status { status: AsicStatus },

    /// Invalid parameter passed across the boundary.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The requested object was not found.
    #[error("Object not found: {object}")]
    NotFound { object: String },

    /// The object is still referenced and cannot be removed.
    #[error("Object in use: {object}")]
    ObjectInUse { object: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AsicError {
    /// Classifies the error into the shared retry policy.
    pub fn disposition(&self) -> StatusDisposition {
        match self {
            AsicError::Status { status } => status.classify(),
            AsicError::ObjectInUse { .. } => StatusDisposition::Busy,
            _ => StatusDisposition::Fatal,
        }
    }
}

/// Result type for ASIC operations.
pub type AsicResult<T> = Result<T, AsicError>;
