// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-channel buffering, batching and delivery.
//!
//! A [`Channel`] never touches the network itself. It decides when to draw a
//! batch from the store, hands the batch to the transport on a spawned task,
//! and reacts to the [`Completion`] that comes back through the coordination
//! task.
//!
//! ```text
//!            enqueue / timer / explicit flush
//!                          │
//!                          v
//!   ┌──────┐  threshold  ┌──────────┐  all resolved  ┌──────┐
//!   │ Idle │ ──────────> │ Flushing │ ─────────────> │ Idle │
//!   └──────┘             └──────────┘                └──────┘
//!                            │ retryable failure
//!                            v
//!                       ┌────────────┐  retry timer
//!                       │ BackingOff │ ────────────> Flushing
//!                       └────────────┘
//!
//!   any state ── offline / background / pause ──> Suspended
//!   any state ── set_enabled(false) ───────────> Disabled
//! ```
//!
//! Entries live in the store from enqueue until their batch resolves. The
//! channel only tracks counts and ids: `backlog` is the number of persisted
//! entries not carried by any in-flight batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::{Sender, UnboundedSender};
use tokio_util::time::delay_queue::Key;
use tracing::{debug, error, warn};

use crate::batch::{Batch, BatchId, EntryId, LogEntry};
use crate::config::ChannelConfiguration;
use crate::errors::{ChannelError, StoreError};
use crate::event_bus::{publish, DropReason, Event};
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, TimerKind};
use crate::store::LogStore;
use crate::transport::{SendOutcome, Transport};

/// Coarse state of a channel, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Nothing in flight and no backoff pending.
    Idle,
    /// At least one batch awaits its transport result.
    Flushing,
    /// Network activity is blocked by connectivity, app state or a pause.
    Suspended,
    /// A retryable failure happened and the retry timer is armed.
    BackingOff,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub status: ChannelStatus,
    /// Persisted entries not carried by an in-flight batch.
    pub backlog: usize,
    /// Batches awaiting a transport result.
    pub in_flight: usize,
    pub consecutive_failures: u32,
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub entry_id: EntryId,
    /// Oldest entries evicted to stay under the storage capacity. Non-zero
    /// means the channel was full.
    pub evicted: usize,
}

/// Conditions shared by every channel of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupState {
    pub network_available: bool,
    pub application_suspended: bool,
    pub terminating: bool,
}

impl Default for GroupState {
    fn default() -> Self {
        GroupState {
            network_available: true,
            application_suspended: false,
            terminating: false,
        }
    }
}

impl GroupState {
    #[must_use]
    pub fn blocks_network(&self) -> bool {
        !self.network_available || self.application_suspended
    }
}

/// Transport result of one batch, reported back to the coordination task.
#[derive(Debug)]
pub(crate) struct Completion {
    pub channel: String,
    pub batch_id: BatchId,
    pub entry_ids: Vec<EntryId>,
    pub outcome: SendOutcome,
}

/// Everything a channel borrows from its group while handling one operation.
pub(crate) struct ChannelContext<'a> {
    pub store: &'a dyn LogStore,
    pub transport: &'a Arc<dyn Transport>,
    pub timers: &'a mut Scheduler,
    pub completions: &'a UnboundedSender<Completion>,
    pub events: Option<&'a Sender<Event>>,
    pub retry_policy: &'a RetryPolicy,
    pub group: GroupState,
}

#[derive(Debug)]
pub(crate) struct Channel {
    name: String,
    config: ChannelConfiguration,
    backlog: usize,
    in_flight: HashMap<BatchId, Vec<EntryId>>,
    /// Batches that were in flight when the channel got disabled. Their
    /// results are still applied and they count against the in-flight limit
    /// until then.
    detached: HashMap<BatchId, Vec<EntryId>>,
    enabled: bool,
    paused: bool,
    consecutive_failures: u32,
    flush_timer: Option<Key>,
    retry_timer: Option<Key>,
}

impl Channel {
    /// Creates a channel and picks up whatever a previous process left in the
    /// store for it.
    pub fn new(
        name: &str,
        config: ChannelConfiguration,
        store: &dyn LogStore,
    ) -> Result<Self, StoreError> {
        Ok(Channel {
            name: name.to_string(),
            config,
            backlog: store.count(name)?,
            in_flight: HashMap::new(),
            detached: HashMap::new(),
            enabled: true,
            paused: false,
            consecutive_failures: 0,
            flush_timer: None,
            retry_timer: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self, group: GroupState) -> ChannelSnapshot {
        ChannelSnapshot {
            status: self.status(group),
            backlog: self.backlog,
            in_flight: self.outstanding(),
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn status(&self, group: GroupState) -> ChannelStatus {
        if !self.enabled {
            ChannelStatus::Disabled
        } else if self.paused || group.blocks_network() {
            ChannelStatus::Suspended
        } else if self.retry_timer.is_some() {
            ChannelStatus::BackingOff
        } else if self.has_in_flight() {
            ChannelStatus::Flushing
        } else {
            ChannelStatus::Idle
        }
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty() || !self.detached.is_empty()
    }

    /// Batches still at the transport, detached ones included.
    fn outstanding(&self) -> usize {
        self.in_flight.len() + self.detached.len()
    }

    pub fn enqueue(
        &mut self,
        ctx: &mut ChannelContext<'_>,
        entry: &LogEntry,
    ) -> Result<EnqueueReceipt, ChannelError> {
        let capacity = self.config.max_storage_capacity;
        let mut evicted = 0;
        let entry_id = loop {
            match ctx.store.append(&self.name, entry, capacity) {
                Ok(id) => break id,
                Err(full @ StoreError::Full { .. }) => {
                    // Room for exactly one more entry, even if the partition
                    // was left over capacity by an earlier configuration.
                    let stored = ctx.store.count(&self.name)?;
                    let excess = (stored + 1).saturating_sub(capacity).max(1);
                    let ids = ctx.store.evict_oldest(&self.name, excess)?;
                    if ids.is_empty() {
                        return Err(full.into());
                    }
                    evicted += ids.len();
                    self.forget(&ids);
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.backlog += 1;

        if evicted > 0 {
            warn!(
                "CHANNEL | {} | Storage full ({} logs), evicted {} oldest logs",
                self.name, capacity, evicted
            );
            publish(
                ctx.events,
                Event::LogsEvicted {
                    channel: self.name.clone(),
                    count: evicted,
                },
            );
        }
        publish(
            ctx.events,
            Event::LogEnqueued {
                channel: self.name.clone(),
                entry_id,
            },
        );

        self.check_pending(ctx);
        Ok(EnqueueReceipt { entry_id, evicted })
    }

    /// Flushes when the backlog reached the batch size, otherwise makes sure
    /// the flush timer runs. During termination any backlog is flushed.
    pub fn check_pending(&mut self, ctx: &mut ChannelContext<'_>) {
        if !self.may_flush(ctx.group) {
            return;
        }
        if ctx.group.terminating {
            self.flush(ctx, true);
        } else if self.backlog >= self.config.max_logs_per_batch {
            self.flush(ctx, false);
        } else {
            self.arm_flush_timer(ctx.timers);
        }
    }

    /// Explicit flush request. Cuts any backoff wait short.
    pub fn flush_now(&mut self, ctx: &mut ChannelContext<'_>) {
        self.cancel_retry_timer(ctx.timers);
        if self.may_flush(ctx.group) {
            self.flush(ctx, true);
        }
    }

    pub fn on_timer(&mut self, ctx: &mut ChannelContext<'_>, kind: TimerKind) {
        // The key is spent once its timer fired.
        match kind {
            TimerKind::Flush => self.flush_timer = None,
            TimerKind::Retry => self.retry_timer = None,
        }
        if self.may_flush(ctx.group) {
            debug!("CHANNEL | {} | {:?} timer fired", self.name, kind);
            self.flush(ctx, true);
        }
    }

    pub fn on_completion(&mut self, ctx: &mut ChannelContext<'_>, completion: Completion) {
        let Completion {
            batch_id,
            entry_ids,
            outcome,
            ..
        } = completion;
        let tracked = self
            .in_flight
            .remove(&batch_id)
            .or_else(|| self.detached.remove(&batch_id));

        let Some(tracked_ids) = tracked else {
            if outcome.is_success() {
                debug!(
                    "CHANNEL | {} | Result for unknown batch {}, deleting its logs",
                    self.name, batch_id
                );
                self.delete(ctx, &entry_ids);
            }
            return;
        };

        match outcome {
            SendOutcome::Success => {
                debug!(
                    "CHANNEL | {} | Batch {} of {} logs delivered",
                    self.name,
                    batch_id,
                    entry_ids.len()
                );
                self.delete(ctx, &entry_ids);
                self.consecutive_failures = 0;
                publish(
                    ctx.events,
                    Event::BatchSent {
                        channel: self.name.clone(),
                        batch_id,
                        count: entry_ids.len(),
                    },
                );
            }
            SendOutcome::RetryableFailure(reason) => {
                // The entries go back to the front of the backlog.
                self.backlog += tracked_ids.len();
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let delay = ctx.retry_policy.delay(self.consecutive_failures);
                warn!(
                    "CHANNEL | {} | Batch {} failed ({}), retry #{} in {} ms",
                    self.name,
                    batch_id,
                    reason,
                    self.consecutive_failures,
                    delay.as_millis()
                );
                self.cancel_flush_timer(ctx.timers);
                self.cancel_retry_timer(ctx.timers);
                if self.enabled {
                    self.retry_timer =
                        Some(ctx.timers.schedule(&self.name, TimerKind::Retry, delay));
                }
                publish(
                    ctx.events,
                    Event::BatchFailed {
                        channel: self.name.clone(),
                        batch_id,
                        count: tracked_ids.len(),
                        consecutive_failures: self.consecutive_failures,
                    },
                );
                return;
            }
            SendOutcome::FatalFailure(reason) => {
                error!(
                    "CHANNEL | {} | Batch {} rejected permanently ({}), dropping {} logs",
                    self.name,
                    batch_id,
                    reason,
                    entry_ids.len()
                );
                self.delete(ctx, &entry_ids);
                publish(
                    ctx.events,
                    Event::LogsDropped {
                        channel: self.name.clone(),
                        count: tracked_ids.len(),
                        reason: DropReason::Rejected,
                    },
                );
            }
        }
        self.check_pending(ctx);
    }

    /// Disabling stops all network activity and keeps persisted logs unless
    /// `purge` is set. Batches already handed to the transport finish anyway.
    pub fn set_enabled(
        &mut self,
        ctx: &mut ChannelContext<'_>,
        enabled: bool,
        purge: bool,
    ) -> Result<(), StoreError> {
        if enabled {
            if !self.enabled {
                self.enabled = true;
                self.resync_backlog(ctx.store)?;
                debug!("CHANNEL | {} | Enabled, {} logs pending", self.name, self.backlog);
            }
            self.check_pending(ctx);
            return Ok(());
        }

        self.enabled = false;
        self.cancel_flush_timer(ctx.timers);
        self.cancel_retry_timer(ctx.timers);
        self.detached.extend(self.in_flight.drain());

        if purge {
            let keep: HashSet<EntryId> = self.detached.values().flatten().copied().collect();
            let removed = ctx.store.purge(&self.name, &keep)?;
            self.backlog = 0;
            debug!("CHANNEL | {} | Disabled, purged {} logs", self.name, removed);
            if removed > 0 {
                publish(
                    ctx.events,
                    Event::LogsDropped {
                        channel: self.name.clone(),
                        count: removed,
                        reason: DropReason::Purged,
                    },
                );
            }
        } else {
            debug!(
                "CHANNEL | {} | Disabled, keeping {} logs",
                self.name, self.backlog
            );
        }
        Ok(())
    }

    pub fn pause(&mut self, ctx: &mut ChannelContext<'_>) {
        self.paused = true;
        self.cancel_flush_timer(ctx.timers);
    }

    pub fn resume(&mut self, ctx: &mut ChannelContext<'_>) {
        self.paused = false;
        self.flush_now(ctx);
    }

    /// Drops timer keys after the whole timer queue was cleared.
    pub fn forget_timers(&mut self) {
        self.flush_timer = None;
        self.retry_timer = None;
    }

    fn may_flush(&self, group: GroupState) -> bool {
        self.enabled
            && !self.paused
            && !group.blocks_network()
            && self.retry_timer.is_none()
            && self.outstanding() < self.config.max_in_flight_batches
    }

    /// Draws batches from the front of the backlog until the in-flight limit
    /// is reached. Without `drain`, stops once less than a full batch remains.
    fn flush(&mut self, ctx: &mut ChannelContext<'_>, drain: bool) {
        self.cancel_flush_timer(ctx.timers);
        let batch_size = self.config.max_logs_per_batch;

        while self.backlog > 0 && self.outstanding() < self.config.max_in_flight_batches {
            if !drain && self.backlog < batch_size {
                break;
            }
            let entries = match ctx
                .store
                .peek_batch(&self.name, batch_size, &self.tracked_ids())
            {
                Ok(entries) => entries,
                Err(e) => {
                    error!("CHANNEL | {} | Failed to read logs: {}", self.name, e);
                    break;
                }
            };
            if entries.is_empty() {
                debug!(
                    "CHANNEL | {} | Backlog of {} but no logs stored, resetting",
                    self.name, self.backlog
                );
                self.backlog = 0;
                break;
            }
            let batch = Batch::new(self.name.clone(), entries);
            self.backlog = self.backlog.saturating_sub(batch.len());
            self.dispatch(ctx, batch);
        }

        if self.backlog > 0 {
            self.arm_flush_timer(ctx.timers);
        }
    }

    fn dispatch(&mut self, ctx: &mut ChannelContext<'_>, batch: Batch) {
        let entry_ids = batch.entry_ids();
        self.in_flight.insert(batch.id, entry_ids.clone());
        debug!(
            "CHANNEL | {} | Dispatching batch {} of {} logs ({} in flight)",
            self.name,
            batch.id,
            batch.len(),
            self.outstanding()
        );

        let channel = self.name.clone();
        let batch_id = batch.id;
        let transport = Arc::clone(ctx.transport);
        let completions = ctx.completions.clone();
        tokio::spawn(async move {
            // A panicking transport must still resolve the batch.
            let outcome = match tokio::spawn(async move { transport.send(&batch).await }).await {
                Ok(outcome) => outcome,
                Err(e) => SendOutcome::RetryableFailure(format!("transport task failed: {e}")),
            };
            let completion = Completion {
                channel,
                batch_id,
                entry_ids,
                outcome,
            };
            if completions.send(completion).is_err() {
                debug!("CHANNEL | Channel group is gone, dropping batch result");
            }
        });
    }

    fn delete(&mut self, ctx: &mut ChannelContext<'_>, ids: &[EntryId]) {
        if let Err(e) = ctx.store.delete(&self.name, ids) {
            error!(
                "CHANNEL | {} | Failed to delete {} delivered logs: {}",
                self.name,
                ids.len(),
                e
            );
            // The logs are still stored and will be sent again.
            if let Err(e) = self.resync_backlog(ctx.store) {
                error!("CHANNEL | {} | Failed to count logs: {}", self.name, e);
            }
        }
    }

    /// Accounts for evicted entries: they leave the backlog, or the batch that
    /// carries them.
    fn forget(&mut self, evicted: &[EntryId]) {
        for id in evicted {
            let carried = self
                .in_flight
                .values_mut()
                .chain(self.detached.values_mut())
                .find_map(|ids| ids.iter().position(|e| e == id).map(|pos| (ids, pos)));
            match carried {
                Some((ids, pos)) => {
                    ids.remove(pos);
                }
                None => self.backlog = self.backlog.saturating_sub(1),
            }
        }
    }

    fn tracked_ids(&self) -> HashSet<EntryId> {
        self.in_flight
            .values()
            .chain(self.detached.values())
            .flatten()
            .copied()
            .collect()
    }

    fn resync_backlog(&mut self, store: &dyn LogStore) -> Result<(), StoreError> {
        let stored = store.count(&self.name)?;
        let tracked: usize = self
            .in_flight
            .values()
            .chain(self.detached.values())
            .map(Vec::len)
            .sum();
        self.backlog = stored.saturating_sub(tracked);
        Ok(())
    }

    fn arm_flush_timer(&mut self, timers: &mut Scheduler) {
        if self.flush_timer.is_none() && self.backlog > 0 {
            self.flush_timer = Some(timers.schedule(
                &self.name,
                TimerKind::Flush,
                self.config.flush_interval,
            ));
        }
    }

    fn cancel_flush_timer(&mut self, timers: &mut Scheduler) {
        if let Some(key) = self.flush_timer.take() {
            timers.cancel(&key);
        }
    }

    fn cancel_retry_timer(&mut self, timers: &mut Scheduler) {
        if let Some(key) = self.retry_timer.take() {
            timers.cancel(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLogStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tracing_test::traced_test;

    /// Records every batch and answers with the scripted outcomes, then with
    /// success.
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<Vec<EntryId>>>,
        script: Mutex<Vec<SendOutcome>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, batch: &Batch) -> SendOutcome {
            self.sent.lock().expect("lock").push(batch.entry_ids());
            let mut script = self.script.lock().expect("lock");
            if script.is_empty() {
                SendOutcome::Success
            } else {
                script.remove(0)
            }
        }
    }

    struct Harness {
        store: MemoryLogStore,
        transport: Arc<ScriptedTransport>,
        dyn_transport: Arc<dyn Transport>,
        timers: Scheduler,
        tx: UnboundedSender<Completion>,
        rx: UnboundedReceiver<Completion>,
        policy: RetryPolicy,
        group: GroupState,
    }

    impl Harness {
        fn new(script: Vec<SendOutcome>) -> Self {
            let transport = Arc::new(ScriptedTransport {
                script: Mutex::new(script),
                ..ScriptedTransport::default()
            });
            let (tx, rx) = mpsc::unbounded_channel();
            Harness {
                store: MemoryLogStore::new(),
                dyn_transport: transport.clone(),
                transport,
                timers: Scheduler::new(),
                tx,
                rx,
                policy: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(8), false),
                group: GroupState::default(),
            }
        }

        fn ctx(&mut self) -> ChannelContext<'_> {
            ChannelContext {
                store: &self.store,
                transport: &self.dyn_transport,
                timers: &mut self.timers,
                completions: &self.tx,
                events: None,
                retry_policy: &self.policy,
                group: self.group,
            }
        }

        fn sent(&self) -> Vec<Vec<EntryId>> {
            self.transport.sent.lock().expect("lock").clone()
        }

        async fn resolve_next(&mut self, channel: &mut Channel) {
            let completion = self.rx.recv().await.expect("completion");
            channel.on_completion(&mut self.ctx(), completion);
        }
    }

    fn config(batch: usize, in_flight: usize, capacity: usize) -> ChannelConfiguration {
        ChannelConfiguration::new(batch, Duration::from_secs(3), in_flight, capacity)
    }

    fn enqueue_n(h: &mut Harness, channel: &mut Channel, n: usize) -> Vec<EntryId> {
        (0..n)
            .map(|i| {
                let entry = LogEntry::new("analytics", format!("{{\"n\":{i}}}"), i as i64);
                channel
                    .enqueue(&mut h.ctx(), &entry)
                    .expect("enqueue")
                    .entry_id
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batches_are_sent_in_order() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(5, 3, 100), &h.store).expect("new");

        let ids = enqueue_n(&mut h, &mut channel, 10);
        h.resolve_next(&mut channel).await;
        h.resolve_next(&mut channel).await;

        assert_eq!(h.sent(), vec![ids[..5].to_vec(), ids[5..].to_vec()]);
        assert_eq!(h.store.count("analytics").expect("count"), 0);
        assert_eq!(channel.snapshot(h.group).status, ChannelStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_timer() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(5, 3, 100), &h.store).expect("new");

        let ids = enqueue_n(&mut h, &mut channel, 3);
        assert!(h.sent().is_empty());
        assert_eq!(h.timers.len(), 1);

        let timer = h.timers.next_expired().await;
        assert_eq!(timer.kind, TimerKind::Flush);
        channel.on_timer(&mut h.ctx(), timer.kind);
        h.resolve_next(&mut channel).await;

        assert_eq!(h.sent(), vec![ids]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_backs_off_then_delivers() {
        let mut h = Harness::new(vec![SendOutcome::RetryableFailure("503".to_string())]);
        let mut channel = Channel::new("analytics", config(5, 1, 100), &h.store).expect("new");

        let ids = enqueue_n(&mut h, &mut channel, 7);
        h.resolve_next(&mut channel).await;

        let snapshot = channel.snapshot(h.group);
        assert_eq!(snapshot.status, ChannelStatus::BackingOff);
        assert_eq!(snapshot.backlog, 7);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(h.store.count("analytics").expect("count"), 7);

        // More logs during backoff do not trigger a send.
        enqueue_n(&mut h, &mut channel, 3);
        assert_eq!(h.sent().len(), 1);

        let timer = h.timers.next_expired().await;
        assert_eq!(timer.kind, TimerKind::Retry);
        channel.on_timer(&mut h.ctx(), timer.kind);
        h.resolve_next(&mut channel).await;

        let sent = h.sent();
        assert_eq!(sent[1], ids[..5].to_vec());
        assert_eq!(channel.snapshot(h.group).consecutive_failures, 0);
        assert_eq!(h.store.count("analytics").expect("count"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_drops_logs() {
        let mut h = Harness::new(vec![SendOutcome::FatalFailure("400".to_string())]);
        let mut channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        enqueue_n(&mut h, &mut channel, 2);
        h.resolve_next(&mut channel).await;

        assert_eq!(h.store.count("analytics").expect("count"), 0);
        assert_eq!(channel.snapshot(h.group).consecutive_failures, 0);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_limit_holds_back_batches() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(2, 2, 100), &h.store).expect("new");

        enqueue_n(&mut h, &mut channel, 8);
        let snapshot = channel.snapshot(h.group);
        assert_eq!(snapshot.in_flight, 2);
        assert_eq!(snapshot.backlog, 4);

        for _ in 0..4 {
            h.resolve_next(&mut channel).await;
        }
        assert_eq!(h.sent().len(), 4);
        assert_eq!(h.store.count("analytics").expect("count"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_group_sends_nothing() {
        let mut h = Harness::new(vec![]);
        h.group.network_available = false;
        let mut channel = Channel::new("analytics", config(2, 2, 100), &h.store).expect("new");

        enqueue_n(&mut h, &mut channel, 6);
        assert!(h.sent().is_empty());
        assert_eq!(channel.snapshot(h.group).status, ChannelStatus::Suspended);

        h.group.network_available = true;
        channel.flush_now(&mut h.ctx());
        assert_eq!(channel.snapshot(h.group).in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_eviction_removes_oldest_and_reports_it() {
        let mut h = Harness::new(vec![]);
        h.group.network_available = false;
        let mut channel = Channel::new("analytics", config(50, 1, 10), &h.store).expect("new");

        let ids = enqueue_n(&mut h, &mut channel, 10);
        let entry = LogEntry::new("analytics", "{}", 10);
        let receipt = channel.enqueue(&mut h.ctx(), &entry).expect("enqueue");

        assert_eq!(receipt.evicted, 1);
        assert_eq!(channel.snapshot(h.group).backlog, 10);
        let remaining: Vec<EntryId> = h
            .store
            .peek_batch("analytics", 20, &HashSet::new())
            .expect("peek")
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(remaining[..9], ids[1..]);
        assert_eq!(remaining[9], receipt.entry_id);
        assert!(logs_contain("Storage full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_keeps_logs_and_honors_in_flight_results() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        enqueue_n(&mut h, &mut channel, 5);
        channel
            .set_enabled(&mut h.ctx(), false, false)
            .expect("disable");
        assert_eq!(channel.snapshot(h.group).status, ChannelStatus::Disabled);
        assert!(h.timers.is_empty());

        h.resolve_next(&mut channel).await;
        assert_eq!(h.store.count("analytics").expect("count"), 3);
        assert_eq!(h.sent().len(), 1);

        channel.set_enabled(&mut h.ctx(), true, false).expect("enable");
        assert_eq!(channel.snapshot(h.group).in_flight, 1);
        assert_eq!(channel.snapshot(h.group).backlog, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_batches_count_against_in_flight_limit() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        let first = enqueue_n(&mut h, &mut channel, 2);
        channel
            .set_enabled(&mut h.ctx(), false, false)
            .expect("disable");
        channel.set_enabled(&mut h.ctx(), true, false).expect("enable");
        let second = enqueue_n(&mut h, &mut channel, 2);

        assert_eq!(channel.snapshot(h.group).in_flight, 1);
        assert_eq!(channel.snapshot(h.group).backlog, 2);
        assert_eq!(channel.snapshot(h.group).status, ChannelStatus::Flushing);

        h.resolve_next(&mut channel).await;
        h.resolve_next(&mut channel).await;
        assert_eq!(h.sent(), vec![first, second]);
        assert_eq!(h.store.count("analytics").expect("count"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_with_purge_deletes_backlog() {
        let mut h = Harness::new(vec![]);
        h.group.application_suspended = true;
        let mut channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        enqueue_n(&mut h, &mut channel, 5);
        channel.set_enabled(&mut h.ctx(), false, true).expect("disable");

        assert_eq!(h.store.count("analytics").expect("count"), 0);
        assert_eq!(channel.snapshot(h.group).backlog, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_batch_result_only_deletes_on_success() {
        let mut h = Harness::new(vec![]);
        h.group.network_available = false;
        let mut channel = Channel::new("analytics", config(5, 1, 100), &h.store).expect("new");
        let ids = enqueue_n(&mut h, &mut channel, 2);

        channel.on_completion(
            &mut h.ctx(),
            Completion {
                channel: "analytics".to_string(),
                batch_id: BatchId::new(),
                entry_ids: vec![ids[0]],
                outcome: SendOutcome::RetryableFailure("late".to_string()),
            },
        );
        assert_eq!(channel.snapshot(h.group).consecutive_failures, 0);
        assert_eq!(h.store.count("analytics").expect("count"), 2);

        let duplicate = Completion {
            channel: "analytics".to_string(),
            batch_id: BatchId::new(),
            entry_ids: vec![ids[0]],
            outcome: SendOutcome::Success,
        };
        channel.on_completion(&mut h.ctx(), duplicate);
        assert_eq!(h.store.count("analytics").expect("count"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let mut h = Harness::new(vec![]);
        let mut channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        channel.pause(&mut h.ctx());
        enqueue_n(&mut h, &mut channel, 4);
        assert!(h.sent().is_empty());
        assert_eq!(channel.snapshot(h.group).status, ChannelStatus::Suspended);

        channel.resume(&mut h.ctx());
        h.resolve_next(&mut channel).await;
        h.resolve_next(&mut channel).await;
        assert_eq!(h.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_is_loaded_from_store() {
        let h = Harness::new(vec![]);
        for i in 0..4 {
            h.store
                .append("analytics", &LogEntry::new("analytics", "{}", i), 100)
                .expect("append");
        }

        let channel = Channel::new("analytics", config(2, 1, 100), &h.store).expect("new");

        assert_eq!(channel.snapshot(h.group).backlog, 4);
    }
}
