// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sled-backed durable log store.
//!
//! Each channel maps to its own tree named `channel/<name>`. Keys are
//! big-endian ids produced by sled's monotonic id generator, so iterating a
//! tree yields entries in enqueue order, including across restarts. Values are
//! the 8-byte big-endian timestamp followed by the raw payload.
//!
//! `Tree::len` scans the whole tree, so entry counts are cached per channel.
//! A count is seeded by a single scan the first time a channel is used and
//! kept in step with every insert and removal afterwards.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use sled::{Config as SledConfig, Db, IVec, Tree};
use tracing::{debug, error};

use crate::batch::{EntryId, LogEntry, StoredEntry};
use crate::errors::StoreError;
use crate::store::LogStore;

/// Prefix of the per-channel tree names.
const CHANNEL_TREE_PREFIX: &str = "channel/";

/// Size of the encoded timestamp that precedes the payload.
const TIMESTAMP_LEN: usize = std::mem::size_of::<i64>();

#[derive(Debug, Clone)]
pub struct SledLogStore {
    db: Db,
    path: PathBuf,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl SledLogStore {
    /// Opens (or creates) a store at `path`, keeping whatever logs a previous
    /// process left behind.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories.
                fs::create_dir_all(parent).map_err(|e| StoreError::Db(sled::Error::Io(e)))?;
            }
        }
        let db = SledConfig::new()
            .path(&path)
            .cache_capacity(8 * 1024 * 1024)
            .open()?;
        debug!("Opened log store at {}", path.display());
        Ok(SledLogStore {
            db,
            path,
            counts: Arc::default(),
        })
    }

    /// Opens a store that lives in a temporary location and vanishes on drop.
    pub fn open_ephemeral() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Ok(SledLogStore {
            db,
            path: PathBuf::new(),
            counts: Arc::default(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Names of every channel with a partition in this store.
    pub fn channels(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                let name = String::from_utf8_lossy(&name).to_string();
                name.strip_prefix(CHANNEL_TREE_PREFIX).map(str::to_string)
            })
            .collect()
    }

    fn tree(&self, channel: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(format!("{CHANNEL_TREE_PREFIX}{channel}"))?)
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Log store count lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Opens the tree of `channel` together with its cached entry count.
    fn partition<'a>(
        &self,
        counts: &'a mut HashMap<String, usize>,
        channel: &str,
    ) -> Result<(Tree, &'a mut usize), StoreError> {
        let tree = self.tree(channel)?;
        let stored = match counts.entry(channel.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(tree.len()),
        };
        Ok((tree, stored))
    }
}

fn encode_value(entry: &LogEntry) -> Vec<u8> {
    let mut value = Vec::with_capacity(TIMESTAMP_LEN + entry.payload.len());
    value.extend_from_slice(&entry.timestamp.to_be_bytes());
    value.extend_from_slice(&entry.payload);
    value
}

fn decode_id(key: &IVec) -> Result<EntryId, StoreError> {
    let bytes: [u8; 8] = key
        .as_ref()
        .try_into()
        .map_err(|_| StoreError::Corrupted(format!("key of {} bytes", key.len())))?;
    Ok(EntryId(u64::from_be_bytes(bytes)))
}

fn decode_entry(channel: &str, key: &IVec, value: &IVec) -> Result<StoredEntry, StoreError> {
    let id = decode_id(key)?;
    if value.len() < TIMESTAMP_LEN {
        return Err(StoreError::Corrupted(format!(
            "entry {id} of channel '{channel}' is truncated"
        )));
    }
    let (timestamp, payload) = value.split_at(TIMESTAMP_LEN);
    let mut buf = [0u8; TIMESTAMP_LEN];
    buf.copy_from_slice(timestamp);
    Ok(StoredEntry {
        id,
        entry: LogEntry {
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload),
            timestamp: i64::from_be_bytes(buf),
        },
    })
}

impl LogStore for SledLogStore {
    fn append(
        &self,
        channel: &str,
        entry: &LogEntry,
        capacity: usize,
    ) -> Result<EntryId, StoreError> {
        let mut counts = self.counts();
        let (tree, stored) = self.partition(&mut counts, channel)?;
        if *stored >= capacity {
            return Err(StoreError::Full {
                channel: channel.to_string(),
                capacity,
            });
        }
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes(), encode_value(entry))?;
        *stored += 1;
        tree.flush()?;
        Ok(EntryId(id))
    }

    fn peek_batch(
        &self,
        channel: &str,
        max: usize,
        exclude: &HashSet<EntryId>,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let mut counts = self.counts();
        let (tree, stored) = self.partition(&mut counts, channel)?;
        let mut batch = Vec::with_capacity(max.min(*stored));
        for item in tree.iter() {
            if batch.len() >= max {
                break;
            }
            let (key, value) = item?;
            if exclude.contains(&decode_id(&key)?) {
                continue;
            }
            batch.push(decode_entry(channel, &key, &value)?);
        }
        Ok(batch)
    }

    fn delete(&self, channel: &str, ids: &[EntryId]) -> Result<usize, StoreError> {
        let mut counts = self.counts();
        let (tree, stored) = self.partition(&mut counts, channel)?;
        let mut deleted = 0;
        for id in ids {
            if tree.remove(id.0.to_be_bytes())?.is_some() {
                *stored = stored.saturating_sub(1);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn evict_oldest(&self, channel: &str, count: usize) -> Result<Vec<EntryId>, StoreError> {
        let mut counts = self.counts();
        let (tree, stored) = self.partition(&mut counts, channel)?;
        let mut evicted = Vec::with_capacity(count);
        while evicted.len() < count {
            let Some((key, _)) = tree.pop_min()? else {
                break;
            };
            *stored = stored.saturating_sub(1);
            evicted.push(decode_id(&key)?);
        }
        Ok(evicted)
    }

    fn count(&self, channel: &str) -> Result<usize, StoreError> {
        let mut counts = self.counts();
        let (_, stored) = self.partition(&mut counts, channel)?;
        Ok(*stored)
    }

    fn purge(&self, channel: &str, keep: &HashSet<EntryId>) -> Result<usize, StoreError> {
        let mut counts = self.counts();
        let (tree, stored) = self.partition(&mut counts, channel)?;
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for key in tree.iter().keys() {
            let key = key?;
            if !keep.contains(&decode_id(&key)?) {
                batch.remove(key);
                removed += 1;
            }
        }
        tree.apply_batch(batch)?;
        *stored = stored.saturating_sub(removed);
        tree.flush()?;
        Ok(removed)
    }
}
