// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Client configuration
//!
//! A [`ClientConfig`] is built once, validated, and then shared read-only by every
//! query an orchestrator runs. Anything that changes during a single query (the
//! poll interval after a throttled poll, for example) lives in the lifecycle, never
//! here.

use crate::error::{QueryError, Result};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default steady-state poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Fixed delay applied after a transient service error, in every phase
///
/// Not configurable: a throttled endpoint must never be retried faster than this.
pub const TRANSIENT_BACKOFF: Duration = Duration::from_millis(2000);
/// Default upper bound on one query, submission to results
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(30 * 60);
/// Database used when a request does not name one
pub const DEFAULT_DATABASE: &str = "default";

/// How long a single query may take end to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDeadline {
    /// Keep retrying and polling until the query reaches a terminal state
    Unbounded,
    /// Abort with `DeadlineExceeded` once this much time has passed
    Within(#[serde(with = "duration_ms")] Duration),
}

impl Default for QueryDeadline {
    fn default() -> Self {
        QueryDeadline::Within(DEFAULT_QUERY_DEADLINE)
    }
}

impl QueryDeadline {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            QueryDeadline::Unbounded => None,
            QueryDeadline::Within(limit) => Some(*limit),
        }
    }
}

/// Configuration shared by every query issued through one orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Object-storage location the service writes results to
    pub result_staging_location: String,
    /// Database used when the request does not name one
    #[serde(default = "default_database")]
    pub default_database: String,
    /// Delay between status polls while the query is QUEUED or RUNNING
    #[serde(default = "default_poll_interval", rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Attach scan size, cost, timing and count to responses
    #[serde(default)]
    pub emit_statistics: bool,
    /// Turn the raw result matrix into header-keyed records
    #[serde(default = "default_true")]
    pub format_as_records: bool,
    /// Upper bound on one query, submission to results
    #[serde(default)]
    pub deadline: QueryDeadline,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    /// Start a builder with every option at its default
    pub fn builder(result_staging_location: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(result_staging_location.into())
    }

    /// Load and validate a config from JSON
    ///
    /// ```json
    /// { "result_staging_location": "s3://bucket/prefix/", "poll_interval_ms": 500 }
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Conventional staging bucket for an account:
    /// `s3://athena-express-<first 10 chars of the access key id>-<year>`
    pub fn default_staging_location(access_key_id: &str) -> String {
        let prefix: String = access_key_id.chars().take(10).collect();
        format!(
            "s3://athena-express-{}-{}",
            prefix.to_lowercase(),
            chrono::Utc::now().year()
        )
    }

    /// Check the invariants every query relies on
    pub fn validate(&self) -> Result<()> {
        if self.result_staging_location.trim().is_empty() {
            return Err(QueryError::Configuration(
                "result staging location is empty".to_string(),
            ));
        }
        if self.default_database.trim().is_empty() {
            return Err(QueryError::Configuration("default database is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(QueryError::Configuration(
                "poll interval must be a positive number of milliseconds".to_string(),
            ));
        }
        if self.deadline == QueryDeadline::Within(Duration::ZERO) {
            return Err(QueryError::Configuration(
                "deadline must be positive; use QueryDeadline::Unbounded to wait indefinitely"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    fn new(result_staging_location: String) -> Self {
        Self {
            config: ClientConfig {
                result_staging_location,
                default_database: default_database(),
                poll_interval: DEFAULT_POLL_INTERVAL,
                emit_statistics: false,
                format_as_records: true,
                deadline: QueryDeadline::default(),
            },
        }
    }

    /// Set the database used when a request does not name one
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.default_database = database.into();
        self
    }

    /// Set the steady-state poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the steady-state poll interval in milliseconds
    pub fn poll_interval_ms(self, millis: u64) -> Self {
        self.poll_interval(Duration::from_millis(millis))
    }

    pub fn emit_statistics(mut self, enabled: bool) -> Self {
        self.config.emit_statistics = enabled;
        self
    }

    pub fn format_as_records(mut self, enabled: bool) -> Self {
        self.config.format_as_records = enabled;
        self
    }

    /// Bound each query to `limit`
    pub fn deadline(mut self, limit: Duration) -> Self {
        self.config.deadline = QueryDeadline::Within(limit);
        self
    }

    /// Wait indefinitely, relying on the caller to cancel
    pub fn unbounded(mut self) -> Self {
        self.config.deadline = QueryDeadline::Unbounded;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
