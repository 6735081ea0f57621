// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Public entry point
//!
//! [`QueryOrchestrator`] validates a request, runs one [`QueryLifecycle`] to
//! completion and assembles the [`QueryResponse`]. It owns the configuration and
//! the service capability and can be cloned freely; clones share both.

use crate::config::ClientConfig;
use crate::error::{QueryError, Result};
use crate::lifecycle::{CompletedExecution, QueryLifecycle};
use crate::service::{QueryService, RawResultMatrix};
use crate::transform::{compute_statistics, to_records, Record};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single query to run
///
/// Deserializes from either a bare JSON string or `{"sql": "...", "db": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum QueryRequest {
    /// Query text run against the default database
    Sql(String),
    /// Query text with an optional database override
    Structured {
        #[serde(alias = "sql")]
        sql_text: String,
        #[serde(default, alias = "db")]
        target_database: Option<String>,
    },
}

impl QueryRequest {
    /// Request against a specific database
    pub fn with_database(sql_text: impl Into<String>, database: impl Into<String>) -> Self {
        QueryRequest::Structured {
            sql_text: sql_text.into(),
            target_database: Some(database.into()),
        }
    }

    pub fn sql_text(&self) -> &str {
        match self {
            QueryRequest::Sql(sql_text) | QueryRequest::Structured { sql_text, .. } => sql_text,
        }
    }

    /// Database override; an empty name counts as no override
    pub fn target_database(&self) -> Option<&str> {
        match self {
            QueryRequest::Sql(_) => None,
            QueryRequest::Structured {
                target_database, ..
            } => target_database.as_deref().filter(|db| !db.trim().is_empty()),
        }
    }

    fn validated_sql(&self) -> Result<&str> {
        let sql_text = self.sql_text();
        if sql_text.trim().is_empty() {
            return Err(QueryError::InvalidArgument("SQL query is missing".to_string()));
        }
        Ok(sql_text)
    }
}

impl From<&str> for QueryRequest {
    fn from(sql_text: &str) -> Self {
        QueryRequest::Sql(sql_text.to_string())
    }
}

impl From<String> for QueryRequest {
    fn from(sql_text: String) -> Self {
        QueryRequest::Sql(sql_text)
    }
}

/// Response rows: header-keyed records, or the untouched result matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryItems {
    Records(Vec<Record>),
    Raw(RawResultMatrix),
}

impl QueryItems {
    pub fn len(&self) -> usize {
        match self {
            QueryItems::Records(records) => records.len(),
            QueryItems::Raw(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            QueryItems::Records(records) => Some(records),
            QueryItems::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawResultMatrix> {
        match self {
            QueryItems::Raw(rows) => Some(rows),
            QueryItems::Records(_) => None,
        }
    }
}

/// Result of one successful query
///
/// The statistics fields are only set when the orchestrator was configured to
/// emit statistics, and are left out of the JSON form otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    #[serde(rename = "Items")]
    pub items: QueryItems,
    #[serde(rename = "DataScannedInMB", skip_serializing_if = "Option::is_none")]
    pub data_scanned_in_mb: Option<u64>,
    #[serde(rename = "QueryCostInUSD", skip_serializing_if = "Option::is_none")]
    pub query_cost_in_usd: Option<f64>,
    #[serde(
        rename = "EngineExecutionTimeInMillis",
        skip_serializing_if = "Option::is_none"
    )]
    pub engine_execution_time_in_millis: Option<u64>,
    #[serde(rename = "Count", skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// Runs queries against one service with one configuration
#[derive(Clone)]
pub struct QueryOrchestrator {
    service: Arc<dyn QueryService>,
    config: Arc<ClientConfig>,
}

impl QueryOrchestrator {
    pub fn builder() -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder::default()
    }

    /// Build directly from a service and a config, validating the config
    pub fn new(service: Arc<dyn QueryService>, config: ClientConfig) -> Result<Self> {
        Self::builder().service(service).config(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one query to completion
    ///
    /// Fails with `InvalidArgument` before contacting the service when the request
    /// has no query text. Transient service errors are retried internally; any other
    /// failure ends the call with a single error.
    pub async fn execute(&self, request: impl Into<QueryRequest>) -> Result<QueryResponse> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), abandoning the wait once `cancel` fires
    ///
    /// Cancelling only stops this client from waiting; a query that was already
    /// submitted keeps running on the service.
    pub async fn execute_with_cancellation(
        &self,
        request: impl Into<QueryRequest>,
        cancel: CancellationToken,
    ) -> Result<QueryResponse> {
        let request = request.into();
        let sql_text = request.validated_sql()?;
        let database = request
            .target_database()
            .unwrap_or(self.config.default_database.as_str());

        let completed = QueryLifecycle::new(self.service.as_ref(), &self.config, cancel)
            .run(sql_text, database)
            .await?;

        Ok(self.assemble(completed))
    }

    fn assemble(&self, completed: CompletedExecution) -> QueryResponse {
        let items = if self.config.format_as_records {
            QueryItems::Records(to_records(&completed.matrix))
        } else {
            QueryItems::Raw(completed.matrix)
        };

        let mut response = QueryResponse {
            items,
            data_scanned_in_mb: None,
            query_cost_in_usd: None,
            engine_execution_time_in_millis: None,
            count: None,
        };

        if self.config.emit_statistics {
            let stats = compute_statistics(&completed.statistics, response.items.len());
            response.data_scanned_in_mb = Some(stats.data_scanned_in_mb);
            response.query_cost_in_usd = Some(stats.query_cost_in_usd);
            response.engine_execution_time_in_millis = stats.engine_execution_time_in_millis;
            response.count = Some(stats.count);
        }

        response
    }
}

/// Builder for [`QueryOrchestrator`]
#[derive(Default)]
pub struct QueryOrchestratorBuilder {
    service: Option<Arc<dyn QueryService>>,
    config: Option<ClientConfig>,
}

impl QueryOrchestratorBuilder {
    pub fn service(mut self, service: Arc<dyn QueryService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Fails with `Configuration` when the service or config is missing or invalid
    pub fn build(self) -> Result<QueryOrchestrator> {
        let service = self.service.ok_or_else(|| {
            QueryError::Configuration("no query service supplied to the orchestrator".to_string())
        })?;
        let config = self.config.ok_or_else(|| {
            QueryError::Configuration("config object not supplied to the orchestrator".to_string())
        })?;
        config.validate()?;

        Ok(QueryOrchestrator {
            service,
            config: Arc::new(config),
        })
    }
}
