// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use telemetry_channel::store::LogStore;
use telemetry_channel::{
    Batch, ChannelConfiguration, ChannelGroupHandle, ChannelGroupService, ChannelStatus, Config,
    EntryId, RetryPolicy, SendOutcome, Transport,
};
use tokio::sync::Semaphore;

/// Transport double that records every batch it is asked to send.
///
/// Outcomes are taken from the script in order, then every send succeeds.
/// A gated transport holds each send until a permit is released.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Batch>>,
    script: Mutex<VecDeque<SendOutcome>>,
    gate: Option<Semaphore>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(outcomes: Vec<SendOutcome>) -> Arc<Self> {
        Arc::new(MockTransport {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(MockTransport {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    /// Lets `n` held sends complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn sent(&self) -> Vec<Batch> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }

    pub fn sent_ids(&self) -> Vec<Vec<EntryId>> {
        self.sent().iter().map(Batch::entry_ids).collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        self.sent.lock().expect("lock").push(batch.clone());
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        } else {
            tokio::task::yield_now().await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(SendOutcome::Success)
    }
}

/// Group config with a fast, deterministic retry policy.
pub fn test_config() -> Config {
    Config {
        retry_policy: RetryPolicy::new(
            Duration::from_millis(50),
            Duration::from_millis(400),
            false,
        ),
        termination_flush_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

/// A channel whose flush timer never interferes with a test.
pub fn channel_config(batch: usize, in_flight: usize, capacity: usize) -> ChannelConfiguration {
    ChannelConfiguration::new(batch, Duration::from_secs(60), in_flight, capacity)
}

pub fn start(
    config: Config,
    store: Arc<dyn LogStore>,
    transport: Arc<dyn Transport>,
) -> (ChannelGroupHandle, tokio::task::JoinHandle<()>) {
    let (service, handle) = ChannelGroupService::new(config, store, transport);
    let task = tokio::spawn(service.run());
    (handle, task)
}

pub fn payload(n: usize) -> String {
    format!(r#"{{"seq":{n}}}"#)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Polls the status of `channel` until it is `status`.
pub async fn wait_for_status(handle: &ChannelGroupHandle, channel: &str, status: ChannelStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.channel_status(channel).await.expect("status").status != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status not reached in time");
}
