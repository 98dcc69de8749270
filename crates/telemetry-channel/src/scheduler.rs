// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timer queue owned by the coordination task.
//!
//! Every channel timer (flush interval, retry backoff) lives in one
//! [`DelayQueue`]. Channels keep the returned [`Key`] to cancel their timer;
//! a key is only valid until its timer expires or is cancelled.

use std::future::poll_fn;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::time::delay_queue::{DelayQueue, Key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The flush interval of a channel with a pending backlog elapsed.
    Flush,
    /// The backoff wait after a retryable failure elapsed.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub channel: String,
    pub kind: TimerKind,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: DelayQueue<Timer>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, channel: &str, kind: TimerKind, delay: Duration) -> Key {
        self.queue.insert(
            Timer {
                channel: channel.to_string(),
                kind,
            },
            delay,
        )
    }

    /// Cancels a pending timer. Returns `false` if it already fired.
    pub fn cancel(&mut self, key: &Key) -> bool {
        self.queue.try_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Polls for the next expired timer. Stays pending while the queue is
    /// empty; inserting a timer wakes the task again.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Timer> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    pub async fn next_expired(&mut self) -> Timer {
        poll_fn(|cx| self.poll_expired(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule("crashes", TimerKind::Retry, Duration::from_secs(5));
        scheduler.schedule("analytics", TimerKind::Flush, Duration::from_secs(3));

        let start = Instant::now();
        let first = scheduler.next_expired().await;
        assert_eq!(first.channel, "analytics");
        assert_eq!(first.kind, TimerKind::Flush);
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let second = scheduler.next_expired().await;
        assert_eq!(second.kind, TimerKind::Retry);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut scheduler = Scheduler::new();
        let key = scheduler.schedule("analytics", TimerKind::Flush, Duration::from_secs(1));

        assert!(scheduler.cancel(&key));
        assert!(!scheduler.cancel(&key));

        let fired = timeout(Duration::from_secs(10), scheduler.next_expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_every_timer() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule("analytics", TimerKind::Flush, Duration::from_secs(1));
        scheduler.schedule("crashes", TimerKind::Flush, Duration::from_secs(2));

        scheduler.clear();

        assert_eq!(scheduler.len(), 0);
    }
}
