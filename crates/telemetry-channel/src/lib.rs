// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Telemetry Channel
//!
//! Delivery pipeline for client-side telemetry logs. Applications enqueue
//! already-serialized log payloads into named channels; the channel group
//! persists them, batches them, and ships them to a collection endpoint while
//! following network reachability and application lifecycle transitions.
//!
//! ## Architecture
//!
//! ```text
//!   ChannelGroupHandle (Clone, any thread)
//!          │ commands
//!          v
//!   ┌──────────────────────┐   draw / delete   ┌──────────────┐
//!   │ ChannelGroupService  │ <───────────────> │   LogStore   │
//!   │  channels, timers,   │                   └──────────────┘
//!   │  group state         │   spawn send      ┌──────────────┐
//!   │                      │ ────────────────> │  Transport   │
//!   └──────────────────────┘ <──── completion ─└──────────────┘
//!          ^
//!          │ forwarded signals
//!   ConnectivityMonitor / LifecycleSignal
//! ```
//!
//! ## Modules
//!
//! - [`channel_group`]: coordination actor and its handle
//! - [`channel`]: per-channel batching state machine
//! - [`retry`]: exponential backoff policy
//! - [`store`]: persistent log store contract and implementations
//! - [`transport`]: transport contract and the HTTP implementation
//! - [`signals`]: connectivity and lifecycle sources
//! - [`event_bus`]: delivery notifications for embedders
//! - [`config`]: group and channel configuration
//! - [`logger`]: tracing formatter

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(clippy::module_name_repetitions)]

/// Batch and log entry types shared by every component
pub mod batch;

/// Per-channel buffering, batching and delivery state machine
pub mod channel;

/// Channel registry, signal routing and the coordination task
pub mod channel_group;

/// Group-wide and per-channel configuration
pub mod config;

/// Error types surfaced by the public API and the store
pub mod errors;

/// Notifications about enqueued, delivered and dropped logs
pub mod event_bus;

/// Tracing formatter and subscriber setup
pub mod logger;

/// Backoff policy applied to retryable transport failures
pub mod retry;

/// Single timer queue for flush and retry timers
pub mod scheduler;

/// Connectivity and application lifecycle sources
pub mod signals;

/// Durable, channel-partitioned log storage
pub mod store;

/// Network delivery of batches
pub mod transport;

pub use batch::{Batch, BatchId, EntryId, LogEntry, StoredEntry};
pub use channel::{ChannelSnapshot, ChannelStatus};
pub use channel_group::{
    ChannelGroupHandle, ChannelGroupService, EnqueueReceipt, TerminationFlush,
};
pub use config::{ChannelConfiguration, Config};
pub use errors::{ChannelError, StoreError};
pub use retry::RetryPolicy;
pub use transport::{SendOutcome, Transport};
