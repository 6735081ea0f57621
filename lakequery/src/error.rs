// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for LakeQuery

use crate::lifecycle::LifecycleState;
use crate::service::{ExecutionHandle, ServiceError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for LakeQuery operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Main error type for LakeQuery operations
///
/// Transient service errors never appear here: the lifecycle absorbs them.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The orchestrator or its configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request carried no usable query text
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote query reached FAILED
    #[error("Query {handle} failed: {reason}")]
    ExecutionFailed {
        handle: ExecutionHandle,
        reason: String,
    },

    /// The remote query reached CANCELLED
    #[error("Query {} was cancelled: {}", .handle, .reason.as_deref().unwrap_or("no reason given"))]
    ExecutionCancelled {
        handle: ExecutionHandle,
        reason: Option<String>,
    },

    /// A non-transient error from the service
    #[error("Service error while {phase}: {source}")]
    Service {
        phase: LifecycleState,
        #[source]
        source: ServiceError,
    },

    /// The configured deadline expired before the query finished
    #[error("Deadline exceeded after {:?}{}", .elapsed, describe_handle(.handle))]
    DeadlineExceeded {
        handle: Option<ExecutionHandle>,
        elapsed: Duration,
    },

    /// The caller's cancellation token fired
    #[error("Query abandoned by caller{}", describe_handle(.handle))]
    Cancelled { handle: Option<ExecutionHandle> },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Handle of the remote query this error relates to, if one was submitted
    pub fn handle(&self) -> Option<&ExecutionHandle> {
        match self {
            QueryError::ExecutionFailed { handle, .. }
            | QueryError::ExecutionCancelled { handle, .. } => Some(handle),
            QueryError::DeadlineExceeded { handle, .. } | QueryError::Cancelled { handle } => {
                handle.as_ref()
            }
            _ => None,
        }
    }

    /// Underlying service error, if the failure came from the service
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            QueryError::Service { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn describe_handle(handle: &Option<ExecutionHandle>) -> String {
    match handle {
        // The remote query keeps running server-side
        Some(handle) => format!(" (remote query {} left running)", handle),
        None => String::new(),
    }
}
