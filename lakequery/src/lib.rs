// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! LakeQuery - one awaitable call over an asynchronous SQL-over-object-storage service
//!
//! The remote service runs queries in three phases: a submission that returns an
//! execution handle, a status endpoint that must be polled until the query reaches
//! a terminal state, and a results endpoint that returns a header-described row
//! matrix. This crate drives those phases with bounded, classified retries and
//! hands back row-oriented records plus an optional cost summary.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lakequery::{ClientConfig, QueryOrchestrator, QueryService, Result};
//!
//! # async fn run(service: Arc<dyn QueryService>) -> Result<()> {
//! let config = ClientConfig::builder("s3://my-results-bucket/")
//!     .database("analytics")
//!     .emit_statistics(true)
//!     .build()?;
//!
//! let orchestrator = QueryOrchestrator::builder()
//!     .service(service)
//!     .config(config)
//!     .build()?;
//!
//! let response = orchestrator.execute("SELECT id, name FROM users").await?;
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  QueryOrchestrator                      │
//! │  - request validation                   │
//! │  - response assembly                    │
//! └─────────────────────────────────────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌──────────────────────┐ ┌────────────────┐
//! │  QueryLifecycle      │ │  transform     │
//! │  SUBMITTING          │ │  - records     │
//! │  → POLLING           │ │  - statistics  │
//! │  → FETCHING → DONE   │ └────────────────┘
//! └──────────────────────┘
//!          │  (classifier decides retry vs. abort)
//!          ▼
//! ┌─────────────────────────────────────────┐
//! │  QueryService (supplied by the caller)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`service`] - The remote service capability and its data types
//! - [`classifier`] - Transient vs. fatal service errors
//! - [`config`] - Client configuration
//! - [`lifecycle`] - The submit/poll/fetch state machine
//! - [`transform`] - Record reconstruction and cost statistics
//! - [`orchestrator`] - The public entry point
//! - [`error`] - Error types
//! - `testing` - A scripted in-memory service for tests (`testing` feature)

pub mod classifier;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transform;

// Re-export main types for convenience
pub use classifier::is_transient;
pub use config::{ClientConfig, ClientConfigBuilder, QueryDeadline};
pub use error::{QueryError, Result};
pub use lifecycle::{CompletedExecution, LifecycleState, PhaseAttempts, QueryLifecycle};
pub use orchestrator::{
    QueryItems, QueryOrchestrator, QueryOrchestratorBuilder, QueryRequest, QueryResponse,
};
pub use service::{
    Datum, ExecutionHandle, ExecutionState, ExecutionStatistics, ExecutionStatus,
    QueryService, RawResultMatrix, RawRow, ServiceError,
};
pub use transform::{compute_statistics, to_records, ColumnSchema, QueryStatistics, Record};
pub use tokio_util::sync::CancellationToken;
