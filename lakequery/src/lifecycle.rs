// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Query execution lifecycle
//!
//! One [`QueryLifecycle`] drives one remote query through
//! `SUBMITTING → POLLING → FETCHING → DONE`, with `ABORTED` reachable from every
//! state. Transient service errors (see [`crate::classifier`]) are retried after a
//! fixed backoff for as long as it takes; everything else aborts the run. The
//! configured deadline and the caller's cancellation token bound every wait and
//! every service call, so no run can outlive them.
//!
//! All mutable state (current poll interval, handle, attempt counters) belongs to
//! the lifecycle instance, so concurrent queries never observe each other's
//! backoff.

use crate::classifier::is_transient;
use crate::config::{ClientConfig, TRANSIENT_BACKOFF};
use crate::error::{QueryError, Result};
use crate::service::{
    ExecutionHandle, ExecutionState, ExecutionStatistics, QueryService, RawResultMatrix,
    ServiceError,
};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SQL_PREVIEW_CHARS: usize = 80;

/// States of one query run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Submitting,
    Polling,
    Fetching,
    Done,
    Aborted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Submitting => "submitting",
            LifecycleState::Polling => "polling",
            LifecycleState::Fetching => "fetching",
            LifecycleState::Done => "done",
            LifecycleState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Service calls issued per phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseAttempts {
    pub submit: u32,
    pub poll: u32,
    pub fetch: u32,
}

/// Everything a run produces on reaching DONE
#[derive(Debug, Clone)]
pub struct CompletedExecution {
    pub handle: ExecutionHandle,
    pub matrix: RawResultMatrix,
    /// Statistics captured when SUCCEEDED was observed
    pub statistics: ExecutionStatistics,
    pub attempts: PhaseAttempts,
}

/// Submit/poll/fetch state machine for a single query
pub struct QueryLifecycle<'a> {
    service: &'a dyn QueryService,
    config: &'a ClientConfig,
    cancel: CancellationToken,
    run_id: Uuid,
    state: LifecycleState,
    /// Current delay between polls; raised after transient poll errors
    poll_interval: Duration,
    handle: Option<ExecutionHandle>,
    attempts: PhaseAttempts,
    started: Instant,
    deadline: Option<Instant>,
}

impl<'a> QueryLifecycle<'a> {
    pub fn new(
        service: &'a dyn QueryService,
        config: &'a ClientConfig,
        cancel: CancellationToken,
    ) -> Self {
        let started = Instant::now();
        Self {
            service,
            config,
            cancel,
            run_id: Uuid::new_v4(),
            state: LifecycleState::Submitting,
            poll_interval: config.poll_interval,
            handle: None,
            attempts: PhaseAttempts::default(),
            started,
            deadline: config.deadline.as_duration().map(|limit| started + limit),
        }
    }

    /// Identifier used to correlate this run's log lines
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run the query to DONE, or fail with the error that aborted it
    pub async fn run(mut self, sql_text: &str, database: &str) -> Result<CompletedExecution> {
        log::debug!(
            "[run {}] starting query \"{}\" (len={}) on database '{}'",
            self.run_id,
            sql_preview(sql_text),
            sql_text.len(),
            database
        );

        match self.drive(sql_text, database).await {
            Ok(completed) => {
                self.transition(LifecycleState::Done);
                log::info!(
                    "[run {}] query {} completed: rows={} attempts={:?} total_ms={}",
                    self.run_id,
                    completed.handle,
                    completed.matrix.len(),
                    completed.attempts,
                    self.started.elapsed().as_millis()
                );
                Ok(completed)
            }
            Err(err) => {
                let failed_in = self.state;
                self.transition(LifecycleState::Aborted);
                log::warn!(
                    "[run {}] aborted while {}: {} (total_ms={})",
                    self.run_id,
                    failed_in,
                    err,
                    self.started.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    async fn drive(&mut self, sql_text: &str, database: &str) -> Result<CompletedExecution> {
        let handle = self.submit(sql_text, database).await?;
        let statistics = self.poll_until_terminal(&handle).await?;
        let matrix = self.fetch(&handle).await?;

        Ok(CompletedExecution {
            handle,
            matrix,
            statistics,
            attempts: self.attempts,
        })
    }

    async fn submit(&mut self, sql_text: &str, database: &str) -> Result<ExecutionHandle> {
        self.transition(LifecycleState::Submitting);
        let service = self.service;
        let config = self.config;
        let staging_location = config.result_staging_location.as_str();

        loop {
            self.attempts.submit += 1;
            let outcome = self
                .interruptible(service.submit(sql_text, staging_location, database))
                .await?;

            match outcome {
                Ok(handle) => {
                    log::info!(
                        "[run {}] submitted as {} (attempt {})",
                        self.run_id,
                        handle,
                        self.attempts.submit
                    );
                    self.handle = Some(handle.clone());
                    return Ok(handle);
                }
                Err(err) if is_transient(&err) => {
                    log::warn!(
                        "[run {}] transient error on submit (attempt {}), retrying in {:?}: {}",
                        self.run_id,
                        self.attempts.submit,
                        TRANSIENT_BACKOFF,
                        err
                    );
                    self.pause(TRANSIENT_BACKOFF).await?;
                }
                Err(err) => return Err(self.service_failure(err)),
            }
        }
    }

    async fn poll_until_terminal(&mut self, handle: &ExecutionHandle) -> Result<ExecutionStatistics> {
        self.transition(LifecycleState::Polling);
        let service = self.service;

        loop {
            self.attempts.poll += 1;
            let outcome = self.interruptible(service.get_status(handle)).await?;

            match outcome {
                Ok(status) => match status.state {
                    ExecutionState::Succeeded => {
                        self.poll_interval = self.config.poll_interval;
                        if status.statistics.is_none() {
                            log::debug!(
                                "[run {}] {} succeeded without statistics",
                                self.run_id,
                                handle
                            );
                        }
                        return Ok(status.statistics.unwrap_or_default());
                    }
                    ExecutionState::Failed => {
                        return Err(QueryError::ExecutionFailed {
                            handle: handle.clone(),
                            reason: status
                                .state_change_reason
                                .unwrap_or_else(|| "no reason given".to_string()),
                        });
                    }
                    ExecutionState::Cancelled => {
                        return Err(QueryError::ExecutionCancelled {
                            handle: handle.clone(),
                            reason: status.state_change_reason,
                        });
                    }
                    ExecutionState::Queued | ExecutionState::Running => {
                        log::debug!(
                            "[run {}] {} is {} (poll {}), next poll in {:?}",
                            self.run_id,
                            handle,
                            status.state,
                            self.attempts.poll,
                            self.poll_interval
                        );
                        self.pause(self.poll_interval).await?;
                    }
                },
                Err(err) if is_transient(&err) => {
                    // Stays raised until the next SUCCEEDED
                    self.poll_interval = TRANSIENT_BACKOFF;
                    log::warn!(
                        "[run {}] transient error polling {} (poll {}), retrying in {:?}: {}",
                        self.run_id,
                        handle,
                        self.attempts.poll,
                        self.poll_interval,
                        err
                    );
                    self.pause(self.poll_interval).await?;
                }
                Err(err) => return Err(self.service_failure(err)),
            }
        }
    }

    async fn fetch(&mut self, handle: &ExecutionHandle) -> Result<RawResultMatrix> {
        self.transition(LifecycleState::Fetching);
        let service = self.service;

        loop {
            self.attempts.fetch += 1;
            let outcome = self.interruptible(service.get_results(handle)).await?;

            match outcome {
                Ok(matrix) => return Ok(matrix),
                Err(err) if is_transient(&err) => {
                    log::warn!(
                        "[run {}] transient error fetching {} (attempt {}), retrying in {:?}: {}",
                        self.run_id,
                        handle,
                        self.attempts.fetch,
                        TRANSIENT_BACKOFF,
                        err
                    );
                    self.pause(TRANSIENT_BACKOFF).await?;
                }
                Err(err) => return Err(self.service_failure(err)),
            }
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            log::debug!("[run {}] {} -> {}", self.run_id, self.state, next);
            self.state = next;
        }
    }

    fn service_failure(&self, source: ServiceError) -> QueryError {
        QueryError::Service {
            phase: self.state,
            source,
        }
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        self.interruptible(tokio::time::sleep(delay)).await
    }

    /// Race `work` against the caller's token and the run's deadline
    async fn interruptible<F: Future>(&self, work: F) -> Result<F::Output> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueryError::Cancelled {
                handle: self.handle.clone(),
            }),
            _ = deadline => Err(QueryError::DeadlineExceeded {
                handle: self.handle.clone(),
                elapsed: self.started.elapsed(),
            }),
            output = work => Ok(output),
        }
    }
}

fn sql_preview(sql_text: &str) -> String {
    let flattened = sql_text.replace('\n', " ");
    if flattened.chars().count() > SQL_PREVIEW_CHARS {
        let head: String = flattened.chars().take(SQL_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        flattened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{NETWORKING_ERROR, THROTTLING, TOO_MANY_REQUESTS};
    use crate::service::{ExecutionStatus, RawRow, ServiceError};
    use crate::testing::{ScriptedQueryService, ServiceCall};

    fn config() -> ClientConfig {
        ClientConfig::builder("s3://bucket/results/")
            .database("analytics")
            .build()
            .unwrap()
    }

    fn matrix() -> RawResultMatrix {
        vec![RawRow::from_values(["id"]), RawRow::from_values(["1"])]
    }

    fn stats(bytes: u64) -> ExecutionStatistics {
        ExecutionStatistics {
            bytes_scanned: bytes,
            engine_execution_time_ms: Some(42),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_reaches_done() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::queued())
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::succeeded(stats(10)))
            .results_ok(matrix());
        let config = config();

        let completed = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap();

        assert_eq!(completed.handle.as_str(), "abc");
        assert_eq!(completed.matrix, matrix());
        assert_eq!(completed.statistics, stats(10));
        assert_eq!(
            completed.attempts,
            PhaseAttempts {
                submit: 1,
                poll: 3,
                fetch: 1
            }
        );
        assert_eq!(
            service.calls()[0],
            ServiceCall::Submit {
                sql_text: "SELECT 1".to_string(),
                staging_location: "s3://bucket/results/".to_string(),
                database: "analytics".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_submit_errors_are_retried() {
        let n = 4;
        let mut service = ScriptedQueryService::new();
        for _ in 0..n {
            service = service.submit_err(ServiceError::new(TOO_MANY_REQUESTS, "slow down"));
        }
        let service = service
            .submit_ok("abc")
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_ok(matrix());
        let config = config();

        let start = Instant::now();
        let completed = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap();

        assert_eq!(completed.attempts.submit, n + 1);
        assert_eq!(service.submit_count(), (n + 1) as usize);
        assert_eq!(start.elapsed(), Duration::from_millis(2000) * n);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_errors_are_retried() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_err(ServiceError::new(NETWORKING_ERROR, "reset"))
            .results_err(ServiceError::new(THROTTLING, "throttled"))
            .results_ok(matrix());
        let config = config();

        let completed = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap();

        assert_eq!(completed.attempts.fetch, 3);
        assert_eq!(service.results_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_error_raises_interval_until_success() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status_err(ServiceError::new(THROTTLING, "throttled"))
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_ok(matrix());
        let config = config();

        let start = Instant::now();
        let completed = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap();

        // throttled wait plus two RUNNING waits, all at the backoff interval
        assert_eq!(start.elapsed(), Duration::from_millis(6000));
        assert_eq!(completed.attempts.poll, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_poll_uses_fixed_backoff_with_slow_interval() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status_err(ServiceError::new(THROTTLING, "throttled"))
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_ok(matrix());
        let config = ClientConfig::builder("s3://bucket/results/")
            .poll_interval_ms(5000)
            .build()
            .unwrap();

        let start = Instant::now();
        let completed = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "default")
            .await
            .unwrap();

        // throttled wait, then the RUNNING wait, both at exactly 2 s
        assert_eq!(start.elapsed(), TRANSIENT_BACKOFF * 2);
        assert_eq!(completed.attempts.poll, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_polls_use_configured_interval() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::running())
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_ok(matrix());
        let config = config();

        let start = Instant::now();
        QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_aborts_with_reason() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::failed("SYNTAX_ERROR"));
        let config = config();

        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELEC 1", "analytics")
            .await
            .unwrap_err();

        match err {
            QueryError::ExecutionFailed { handle, reason } => {
                assert_eq!(handle.as_str(), "abc");
                assert_eq!(reason, "SYNTAX_ERROR");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(service.results_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_state_aborts() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::cancelled(Some("user request".to_string())));
        let config = config();

        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::ExecutionCancelled { reason: Some(ref r), .. } if r == "user request"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_abort_in_each_phase() {
        let config = config();
        let denied = || ServiceError::new("AccessDeniedException", "denied");

        let service = ScriptedQueryService::new().submit_err(denied());
        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Service { phase: LifecycleState::Submitting, .. }));
        assert_eq!(service.submit_count(), 1);

        let service = ScriptedQueryService::new().submit_ok("abc").status_err(denied());
        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Service { phase: LifecycleState::Polling, .. }));

        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .status(ExecutionStatus::succeeded(stats(0)))
            .results_err(ServiceError::without_code("gone"));
        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "analytics")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Service { phase: LifecycleState::Fetching, .. }));
        assert_eq!(service.results_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_endless_running() {
        let service = ScriptedQueryService::new()
            .submit_ok("abc")
            .repeat_status(ExecutionStatus::running());
        let config = ClientConfig::builder("s3://bucket/")
            .deadline(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = QueryLifecycle::new(&service, &config, CancellationToken::new())
            .run("SELECT 1", "default")
            .await
            .unwrap_err();

        match err {
            QueryError::DeadlineExceeded { handle, elapsed } => {
                assert_eq!(handle.map(|h| h.as_str().to_string()), Some("abc".to_string()));
                assert_eq!(elapsed, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_token_stops_retrying() {
        let service = ScriptedQueryService::new()
            .repeat_submit_err(ServiceError::new(THROTTLING, "throttled"));
        let config = ClientConfig::builder("s3://bucket/").unbounded().build().unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5000)).await;
            trigger.cancel();
        });

        let err = QueryLifecycle::new(&service, &config, cancel)
            .run("SELECT 1", "default")
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Cancelled { handle: None }));
        // attempts at t=0, 2000 and 4000
        assert_eq!(service.submit_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_makes_no_calls() {
        let service = ScriptedQueryService::new().submit_ok("abc");
        let config = config();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = QueryLifecycle::new(&service, &config, cancel)
            .run("SELECT 1", "default")
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Cancelled { .. }));
        assert!(service.calls().is_empty());
    }

    #[test]
    fn test_sql_preview_truncates_long_queries() {
        let sql = format!("SELECT {}\nFROM t", "x, ".repeat(40));
        let preview = sql_preview(&sql);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), SQL_PREVIEW_CHARS + 3);
        assert!(!preview.contains('\n'));
        assert_eq!(sql_preview("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Submitting.to_string(), "submitting");
        assert_eq!(LifecycleState::Aborted.to_string(), "aborted");
    }
}
