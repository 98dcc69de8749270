// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network delivery of batches.
//!
//! A [`Transport`] turns a [`Batch`] into a [`SendOutcome`]. The outcome is a
//! value rather than an error: the channel decides what to do with the
//! persisted entries based on it.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::batch::Batch;

pub mod http;

pub use http::HttpTransport;

/// Result of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The endpoint accepted the batch. Its entries can be deleted.
    Success,
    /// Transient failure. The entries stay persisted and are retried.
    RetryableFailure(String),
    /// The endpoint will never accept this batch. Its entries are dropped.
    FatalFailure(String),
}

impl SendOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

/// Delivers one batch to the collection endpoint.
///
/// Called concurrently for distinct batches of the same channel, up to the
/// channel's in-flight limit.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &Batch) -> SendOutcome;
}

/// Maps an HTTP status to a delivery outcome.
///
/// Request timeouts and throttling are worth retrying like server errors; any
/// other client error means the payload or credentials are rejected for good.
#[must_use]
pub fn classify_status(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Success;
    }
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        SendOutcome::RetryableFailure(format!("endpoint responded {status}"))
    } else if status == StatusCode::FORBIDDEN {
        SendOutcome::FatalFailure(format!(
            "endpoint responded {status}, verify that the API key is valid"
        ))
    } else {
        SendOutcome::FatalFailure(format!("endpoint responded {status}"))
    }
}
