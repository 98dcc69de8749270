// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::error;

use crate::batch::{EntryId, LogEntry, StoredEntry};
use crate::errors::StoreError;
use crate::store::LogStore;

/// Non-durable store. Logs are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    partitions: Mutex<HashMap<String, VecDeque<StoredEntry>>>,
    next_id: AtomicU64,
}

impl MemoryLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn partitions(&self) -> MutexGuard<'_, HashMap<String, VecDeque<StoredEntry>>> {
        match self.partitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Memory log store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl LogStore for MemoryLogStore {
    fn append(
        &self,
        channel: &str,
        entry: &LogEntry,
        capacity: usize,
    ) -> Result<EntryId, StoreError> {
        let mut partitions = self.partitions();
        let queue = partitions.entry(channel.to_string()).or_default();
        if queue.len() >= capacity {
            return Err(StoreError::Full {
                channel: channel.to_string(),
                capacity,
            });
        }
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        queue.push_back(StoredEntry {
            id,
            entry: entry.clone(),
        });
        Ok(id)
    }

    fn peek_batch(
        &self,
        channel: &str,
        max: usize,
        exclude: &HashSet<EntryId>,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let partitions = self.partitions();
        Ok(partitions
            .get(channel)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|stored| !exclude.contains(&stored.id))
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete(&self, channel: &str, ids: &[EntryId]) -> Result<usize, StoreError> {
        let mut partitions = self.partitions();
        let Some(queue) = partitions.get_mut(channel) else {
            return Ok(0);
        };
        let doomed: HashSet<&EntryId> = ids.iter().collect();
        let before = queue.len();
        queue.retain(|stored| !doomed.contains(&stored.id));
        Ok(before - queue.len())
    }

    fn evict_oldest(&self, channel: &str, count: usize) -> Result<Vec<EntryId>, StoreError> {
        let mut partitions = self.partitions();
        let Some(queue) = partitions.get_mut(channel) else {
            return Ok(Vec::new());
        };
        let count = count.min(queue.len());
        Ok(queue.drain(..count).map(|stored| stored.id).collect())
    }

    fn count(&self, channel: &str) -> Result<usize, StoreError> {
        Ok(self.partitions().get(channel).map_or(0, VecDeque::len))
    }

    fn purge(&self, channel: &str, keep: &HashSet<EntryId>) -> Result<usize, StoreError> {
        let mut partitions = self.partitions();
        let Some(queue) = partitions.get_mut(channel) else {
            return Ok(0);
        };
        let before = queue.len();
        queue.retain(|stored| keep.contains(&stored.id));
        Ok(before - queue.len())
    }
}
