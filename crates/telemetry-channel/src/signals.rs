// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connectivity and application lifecycle sources.
//!
//! A source only reports transitions. Wiring them into a channel group is
//! done with [`ChannelGroupHandle::attach_connectivity`] and
//! [`ChannelGroupHandle::attach_lifecycle`].
//!
//! [`ChannelGroupHandle::attach_connectivity`]: crate::channel_group::ChannelGroupHandle::attach_connectivity
//! [`ChannelGroupHandle::attach_lifecycle`]: crate::channel_group::ChannelGroupHandle::attach_lifecycle

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Capacity of lifecycle broadcast channels. Transitions are rare.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foreground,
    Background,
    Terminating,
}

/// Reports whether the collection endpoint is reachable.
pub trait ConnectivityMonitor: Send + Sync {
    /// The current value is the latest known reachability.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Reports application lifecycle transitions.
pub trait LifecycleSignal: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// Publishes only actual changes of `value`.
fn publish_change(tx: &watch::Sender<bool>, value: bool) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

/// Reachability pushed by the embedder, e.g. from a platform callback.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    #[must_use]
    pub fn new(available: bool) -> Self {
        let (tx, _) = watch::channel(available);
        ManualConnectivity { tx }
    }

    pub fn set_available(&self, available: bool) {
        if publish_change(&self.tx, available) {
            debug!("SIGNALS | Connectivity changed, available: {available}");
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        *self.tx.borrow()
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probes a TCP address periodically and reports whether a connection could
/// be opened.
#[derive(Debug)]
pub struct TcpReachability {
    tx: watch::Sender<bool>,
}

impl TcpReachability {
    /// Starts probing `address` (`host:port`) every `interval` until `cancel`
    /// fires. The endpoint is assumed reachable until the first probe says
    /// otherwise.
    #[must_use]
    pub fn spawn(
        address: String,
        interval: Duration,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, _) = watch::channel(true);
        let probe_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let reachable = matches!(
                    timeout(connect_timeout, TcpStream::connect(&address)).await,
                    Ok(Ok(_))
                );
                if publish_change(&probe_tx, reachable) {
                    debug!("SIGNALS | {address} reachable: {reachable}");
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
        });
        TcpReachability { tx }
    }

    /// Probes the host and port of an HTTP endpoint URL.
    pub fn for_endpoint(
        endpoint: &str,
        interval: Duration,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, String> {
        let url = reqwest::Url::parse(endpoint).map_err(|e| format!("invalid endpoint: {e}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("endpoint '{endpoint}' has no host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("endpoint '{endpoint}' has no port"))?;
        Ok(Self::spawn(
            format!("{host}:{port}"),
            interval,
            connect_timeout,
            cancel,
        ))
    }
}

impl ConnectivityMonitor for TcpReachability {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Lifecycle transitions pushed by the embedder.
#[derive(Debug)]
pub struct ManualLifecycle {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for ManualLifecycle {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        ManualLifecycle { tx }
    }
}

impl ManualLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        // No subscriber yet is not an error.
        let _ = self.tx.send(event);
    }
}

impl LifecycleSignal for ManualLifecycle {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

/// Maps process termination signals (ctrl-c, and SIGTERM on unix) to
/// [`LifecycleEvent::Terminating`].
#[derive(Debug)]
pub struct ProcessSignals {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl ProcessSignals {
    #[must_use]
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let signal_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = termination_signal() => {
                        if let Err(e) = received {
                            error!("SIGNALS | Failed to listen for termination signals: {e}");
                            break;
                        }
                        debug!("SIGNALS | Termination signal received");
                        let _ = signal_tx.send(LifecycleEvent::Terminating);
                    }
                }
            }
        });
        ProcessSignals { tx }
    }
}

impl LifecycleSignal for ProcessSignals {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_manual_connectivity_reports_changes_only() {
        let monitor = ManualConnectivity::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_available(true);
        assert!(!rx.has_changed().expect("open"));

        monitor.set_available(false);
        rx.changed().await.expect("changed");
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_available());
    }

    #[tokio::test]
    async fn test_manual_lifecycle_broadcasts_events() {
        let lifecycle = ManualLifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.emit(LifecycleEvent::Background);
        lifecycle.emit(LifecycleEvent::Foreground);

        assert_eq!(rx.recv().await.expect("event"), LifecycleEvent::Background);
        assert_eq!(rx.recv().await.expect("event"), LifecycleEvent::Foreground);
    }

    #[tokio::test]
    async fn test_tcp_probe_detects_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let cancel = CancellationToken::new();
        let monitor = TcpReachability::spawn(
            address,
            Duration::from_millis(50),
            Duration::from_millis(200),
            cancel.clone(),
        );
        let mut rx = monitor.subscribe();

        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|available| !available))
            .await
            .expect("probe finished")
            .expect("sender alive");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tcp_probe_keeps_open_port_available() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();

        let cancel = CancellationToken::new();
        let monitor = TcpReachability::for_endpoint(
            &format!("http://{address}/api/v2/logs"),
            Duration::from_millis(50),
            Duration::from_millis(200),
            cancel.clone(),
        )
        .expect("valid endpoint");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(*monitor.subscribe().borrow());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_process_signals_stop_on_cancel() {
        let cancel = CancellationToken::new();
        let signals = ProcessSignals::spawn(cancel.clone());
        let mut rx = signals.subscribe();
        drop(signals);

        cancel.cancel();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener stopped");

        assert!(matches!(received, Err(broadcast::error::RecvError::Closed)));
    }

    #[test]
    fn test_endpoint_without_host_is_rejected() {
        let result = TcpReachability::for_endpoint(
            "not a url",
            Duration::from_secs(1),
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }
}
