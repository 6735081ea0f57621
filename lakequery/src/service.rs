// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Remote query service capability
//!
//! The orchestration core never talks to the network itself. Callers hand it an
//! implementation of [`QueryService`] that wraps whatever client (and credentials)
//! they use for the actual engine. The types here mirror the shape of that
//! engine's API without tying the core to any SDK.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one in-flight remote query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Remote execution state as reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    /// SUCCEEDED, FAILED and CANCELLED end polling
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(ExecutionState::Queued),
            "RUNNING" => Ok(ExecutionState::Running),
            "SUCCEEDED" => Ok(ExecutionState::Succeeded),
            "FAILED" => Ok(ExecutionState::Failed),
            "CANCELLED" => Ok(ExecutionState::Cancelled),
            _ => Err(format!(
                "Unknown execution state: {}. Valid options: QUEUED, RUNNING, SUCCEEDED, FAILED, CANCELLED",
                s
            )),
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}

/// Scan and timing figures attached to an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    /// Bytes read from object storage
    pub bytes_scanned: u64,
    /// Engine-side execution time, when the service reports it
    pub engine_execution_time_ms: Option<u64>,
}

/// One observation of the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub state: ExecutionState,
    /// Why the state changed, typically set for FAILED and CANCELLED
    pub state_change_reason: Option<String>,
    pub statistics: Option<ExecutionStatistics>,
}

impl ExecutionStatus {
    pub fn new(state: ExecutionState) -> Self {
        Self {
            state,
            state_change_reason: None,
            statistics: None,
        }
    }

    pub fn queued() -> Self {
        Self::new(ExecutionState::Queued)
    }

    pub fn running() -> Self {
        Self::new(ExecutionState::Running)
    }

    pub fn succeeded(statistics: ExecutionStatistics) -> Self {
        Self {
            statistics: Some(statistics),
            ..Self::new(ExecutionState::Succeeded)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state_change_reason: Some(reason.into()),
            ..Self::new(ExecutionState::Failed)
        }
    }

    pub fn cancelled(reason: Option<String>) -> Self {
        Self {
            state_change_reason: reason,
            ..Self::new(ExecutionState::Cancelled)
        }
    }
}

/// A single cell; `None` is how the service encodes SQL NULL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    #[serde(rename = "VarCharValue", skip_serializing_if = "Option::is_none", default)]
    pub var_char_value: Option<String>,
}

impl Datum {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            var_char_value: Some(value.into()),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.var_char_value.as_deref()
    }
}

/// One row of the result envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "Data")]
    pub data: Vec<Datum>,
}

impl RawRow {
    pub fn new(data: Vec<Datum>) -> Self {
        Self { data }
    }

    /// Build a row where every cell is present
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(values.into_iter().map(Datum::value).collect())
    }

    /// Cell value at `index`; out-of-range cells read as null
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.data.get(index).and_then(Datum::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result envelope: row 0 is the header, the rest are data rows
pub type RawResultMatrix = Vec<RawRow>;

/// A failure reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} (code: {})", .message, .code.as_deref().unwrap_or("none"))]
pub struct ServiceError {
    /// Service error code, e.g. `ThrottlingException`; absent for untyped failures
    pub code: Option<String>,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn without_code(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// The three primitives of the remote query engine
///
/// Implementations must be safe to share between concurrent `execute` calls.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Start a query, returning its handle
    async fn submit(
        &self,
        sql_text: &str,
        staging_location: &str,
        database: &str,
    ) -> Result<ExecutionHandle, ServiceError>;

    /// Current status of a previously submitted query
    async fn get_status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, ServiceError>;

    /// Result matrix of a query that reached SUCCEEDED
    async fn get_results(&self, handle: &ExecutionHandle) -> Result<RawResultMatrix, ServiceError>;
}
