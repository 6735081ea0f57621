// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Scripted in-memory query service
//!
//! [`ScriptedQueryService`] replays queued responses for each primitive and records
//! every call it receives, so tests can drive the lifecycle through any sequence
//! of states and errors without a real engine.

use crate::service::{
    ExecutionHandle, ExecutionStatus, QueryService, RawResultMatrix, ServiceError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Error code returned once a script runs out of responses
pub const SCRIPT_EXHAUSTED: &str = "ScriptExhausted";

/// A call received by the scripted service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Submit {
        sql_text: String,
        staging_location: String,
        database: String,
    },
    GetStatus {
        handle: ExecutionHandle,
    },
    GetResults {
        handle: ExecutionHandle,
    },
}

struct Script<T> {
    queued: VecDeque<Result<T, ServiceError>>,
    /// Replayed forever once `queued` is empty
    repeat: Option<Result<T, ServiceError>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queued: VecDeque::new(),
            repeat: None,
        }
    }

    fn next(&mut self, primitive: &str) -> Result<T, ServiceError> {
        if let Some(response) = self.queued.pop_front() {
            return response;
        }
        match &self.repeat {
            Some(response) => response.clone(),
            None => Err(ServiceError::new(
                SCRIPT_EXHAUSTED,
                format!("no scripted response left for {}", primitive),
            )),
        }
    }
}

/// Query service that replays scripted responses
pub struct ScriptedQueryService {
    submit: Mutex<Script<ExecutionHandle>>,
    status: Mutex<Script<ExecutionStatus>>,
    results: Mutex<Script<RawResultMatrix>>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl Default for ScriptedQueryService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedQueryService {
    pub fn new() -> Self {
        Self {
            submit: Mutex::new(Script::new()),
            status: Mutex::new(Script::new()),
            results: Mutex::new(Script::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful submission returning `handle`
    pub fn submit_ok(mut self, handle: impl Into<String>) -> Self {
        self.submit
            .get_mut()
            .queued
            .push_back(Ok(ExecutionHandle::new(handle)));
        self
    }

    pub fn submit_err(mut self, error: ServiceError) -> Self {
        self.submit.get_mut().queued.push_back(Err(error));
        self
    }

    /// Fail every submission not otherwise scripted with `error`
    pub fn repeat_submit_err(mut self, error: ServiceError) -> Self {
        self.submit.get_mut().repeat = Some(Err(error));
        self
    }

    /// Queue one status observation
    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status.get_mut().queued.push_back(Ok(status));
        self
    }

    pub fn status_err(mut self, error: ServiceError) -> Self {
        self.status.get_mut().queued.push_back(Err(error));
        self
    }

    /// Report `status` for every poll not otherwise scripted
    pub fn repeat_status(mut self, status: ExecutionStatus) -> Self {
        self.status.get_mut().repeat = Some(Ok(status));
        self
    }

    pub fn results_ok(mut self, matrix: RawResultMatrix) -> Self {
        self.results.get_mut().queued.push_back(Ok(matrix));
        self
    }

    pub fn results_err(mut self, error: ServiceError) -> Self {
        self.results.get_mut().queued.push_back(Err(error));
        self
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::Submit { .. }))
    }

    pub fn status_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::GetStatus { .. }))
    }

    pub fn results_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::GetResults { .. }))
    }

    fn count(&self, predicate: impl Fn(&ServiceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: ServiceCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl QueryService for ScriptedQueryService {
    async fn submit(
        &self,
        sql_text: &str,
        staging_location: &str,
        database: &str,
    ) -> Result<ExecutionHandle, ServiceError> {
        self.record(ServiceCall::Submit {
            sql_text: sql_text.to_string(),
            staging_location: staging_location.to_string(),
            database: database.to_string(),
        });
        self.submit.lock().next("submit")
    }

    async fn get_status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, ServiceError> {
        self.record(ServiceCall::GetStatus {
            handle: handle.clone(),
        });
        self.status.lock().next("get_status")
    }

    async fn get_results(&self, handle: &ExecutionHandle) -> Result<RawResultMatrix, ServiceError> {
        self.record(ServiceCall::GetResults {
            handle: handle.clone(),
        });
        self.results.lock().next("get_results")
    }
}
