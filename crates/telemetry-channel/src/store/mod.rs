// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel-partitioned FIFO storage for unsent logs.
//!
//! Every channel owns its own partition. Entries are appended at the back,
//! drawn from the front, and deleted by id once the transport has resolved the
//! batch that carried them. Deletion is idempotent: deleting an id that is
//! already gone is not an error.

use std::collections::HashSet;

use crate::batch::{EntryId, LogEntry, StoredEntry};
use crate::errors::StoreError;

pub mod memory;
pub mod sled_store;

pub use memory::MemoryLogStore;
pub use sled_store::SledLogStore;

/// Storage contract the channel group relies on.
///
/// Implementations must be safe to share across threads; the channel group
/// only touches the partition of the channel it is serving.
pub trait LogStore: Send + Sync {
    /// Appends `entry` to the back of `channel`.
    ///
    /// Fails with [`StoreError::Full`] when the partition already holds
    /// `capacity` entries. Nothing is written in that case.
    fn append(
        &self,
        channel: &str,
        entry: &LogEntry,
        capacity: usize,
    ) -> Result<EntryId, StoreError>;

    /// Returns up to `max` of the oldest entries of `channel`, skipping ids in
    /// `exclude`, in FIFO order.
    fn peek_batch(
        &self,
        channel: &str,
        max: usize,
        exclude: &HashSet<EntryId>,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Deletes the given ids from `channel` and returns how many existed.
    fn delete(&self, channel: &str, ids: &[EntryId]) -> Result<usize, StoreError>;

    /// Removes the `count` oldest entries of `channel` and returns their ids.
    fn evict_oldest(&self, channel: &str, count: usize) -> Result<Vec<EntryId>, StoreError>;

    /// Number of entries currently persisted for `channel`.
    fn count(&self, channel: &str) -> Result<usize, StoreError>;

    /// Deletes every entry of `channel` except the ids in `keep`, returning the
    /// number removed.
    fn purge(&self, channel: &str, keep: &HashSet<EntryId>) -> Result<usize, StoreError>;
}
