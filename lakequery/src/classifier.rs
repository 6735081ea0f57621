// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transient vs. fatal service errors
//!
//! Every retry loop in [`crate::lifecycle`] asks [`is_transient`] before
//! retrying; nothing else in the crate decides what is retryable.

use crate::service::ServiceError;

/// Rate limiting on the query service
pub const TOO_MANY_REQUESTS: &str = "TooManyRequestsException";
/// API throttling
pub const THROTTLING: &str = "ThrottlingException";
/// Connection-level failure below the service
pub const NETWORKING_ERROR: &str = "NetworkingError";

/// Error codes that are retried with backoff
pub const TRANSIENT_ERROR_CODES: [&str; 3] = [TOO_MANY_REQUESTS, THROTTLING, NETWORKING_ERROR];

/// True for rate-limit, throttling and networking failures; false for anything
/// else, including errors without a code.
pub fn is_transient(error: &ServiceError) -> bool {
    error
        .code
        .as_deref()
        .is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code))
}
