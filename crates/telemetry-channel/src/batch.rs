// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Store-assigned identifier of a persisted entry.
///
/// Identifiers grow strictly with enqueue order inside a store, so sorting by
/// id yields the original FIFO order of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a batch handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(Uuid);

impl BatchId {
    #[must_use]
    pub fn new() -> Self {
        BatchId(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque, already-serialized unit of telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub channel: String,
    pub payload: Bytes,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl LogEntry {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>, timestamp: i64) -> Self {
        LogEntry {
            channel: channel.into(),
            payload: payload.into(),
            timestamp,
        }
    }
}

/// A log entry as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: EntryId,
    pub entry: LogEntry,
}

/// Ordered group of persisted entries submitted in one network operation.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub channel: String,
    pub entries: Vec<StoredEntry>,
}

impl Batch {
    #[must_use]
    pub fn new(channel: impl Into<String>, entries: Vec<StoredEntry>) -> Self {
        Batch {
            id: BatchId::new(),
            channel: channel.into(),
            entries,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|stored| stored.id).collect()
    }

    /// Payloads in batch order.
    pub fn payloads(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(|stored| &stored.entry.payload)
    }
}
