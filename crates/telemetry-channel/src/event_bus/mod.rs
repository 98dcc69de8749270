// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery notifications for embedders.
//!
//! The channel group publishes an [`Event`] whenever a log is persisted, a
//! batch is resolved, or logs leave the store without being delivered.
//!
//! ```text
//! ChannelGroupService          EventBus          Embedder
//!     │                           │                  │
//!     ├─ LogEnqueued ────────────>│                  │
//!     ├─ BatchSent ──────────────>│ ──> MPSC ──────> rx
//!     ├─ BatchFailed ────────────>│     channel      │
//!     ├─ LogsDropped ────────────>│                  │
//!     └─ LogsEvicted ────────────>│                  │
//! ```
//!
//! Publishing uses `try_send`: a slow or absent consumer never stalls delivery.

use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tracing::debug;

use crate::batch::{BatchId, EntryId};
use crate::event_bus::constants::MAX_EVENTS;

mod constants;

/// Why logs were removed from the store without being delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The endpoint rejected the batch permanently.
    Rejected,
    /// The channel was disabled with purge.
    Purged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A log was persisted into its channel.
    LogEnqueued { channel: String, entry_id: EntryId },
    /// The endpoint accepted a batch.
    BatchSent {
        channel: String,
        batch_id: BatchId,
        count: usize,
    },
    /// A batch failed with a retryable error and will be sent again.
    BatchFailed {
        channel: String,
        batch_id: BatchId,
        count: usize,
        consecutive_failures: u32,
    },
    LogsDropped {
        channel: String,
        count: usize,
        reason: DropReason,
    },
    /// The oldest logs were evicted to make room under the storage capacity.
    LogsEvicted { channel: String, count: usize },
}

#[allow(clippy::module_name_repetitions)]
pub struct EventBus {
    pub rx: mpsc::Receiver<Event>,
}

impl EventBus {
    /// Creates the bus and the sender to hand to the channel group.
    #[must_use]
    pub fn run() -> (EventBus, Sender<Event>) {
        let (tx, rx) = mpsc::channel(MAX_EVENTS);
        (EventBus { rx }, tx)
    }
}

/// Publishes `event` without waiting. Dropped when the bus is full or gone.
pub(crate) fn publish(sender: Option<&Sender<Event>>, event: Event) {
    let Some(sender) = sender else {
        return;
    };
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            debug!("EVENT_BUS | Bus is full, dropping {event:?}");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
