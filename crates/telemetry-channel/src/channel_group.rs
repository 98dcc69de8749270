// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coordination task that owns every channel of a group.
//!
//! ```text
//!    ┌────────────────────┐
//!    │ ChannelGroupHandle │ (Clone, any thread)
//!    └─────────┬──────────┘
//!              │ commands (unbounded mpsc, oneshot replies)
//!              v
//!    ┌─────────────────────┐ <── completions ── spawned transport sends
//!    │ ChannelGroupService │ <── expired timers (DelayQueue)
//!    └─────────┬───────────┘
//!              │ owns
//!              v
//!      channels, GroupState
//! ```
//!
//! All channel state is mutated on the service task only. Connectivity and
//! lifecycle sources are forwarded to it as commands, see
//! [`ChannelGroupHandle::attach_connectivity`] and
//! [`ChannelGroupHandle::attach_lifecycle`].
//!
//! ```rust,ignore
//! let (service, handle) = ChannelGroupService::new(config, store, transport);
//! tokio::spawn(service.run());
//!
//! handle.add_channel("analytics", ChannelConfiguration::default()).await?;
//! handle.enqueue("analytics", r#"{"event":"launch"}"#, now_ms).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::batch::LogEntry;
use crate::channel::{Channel, ChannelContext, ChannelSnapshot, Completion, GroupState};
use crate::config::{ChannelConfiguration, Config};
use crate::errors::ChannelError;
use crate::event_bus::Event;
use crate::scheduler::{Scheduler, Timer};
use crate::signals::{ConnectivityMonitor, LifecycleEvent, LifecycleSignal};
use crate::store::{LogStore, MemoryLogStore, SledLogStore};
use crate::transport::{HttpTransport, Transport};

pub use crate::channel::EnqueueReceipt;

/// How the final flush requested on termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationFlush {
    /// No batch is in flight anymore. Logs that could not be sent (offline,
    /// backing off) stay persisted for the next start.
    Drained,
    /// The termination flush timeout elapsed with batches still in flight.
    TimedOut,
}

type Reply<T> = oneshot::Sender<Result<T, ChannelError>>;

#[derive(Debug)]
pub enum ChannelGroupCommand {
    AddChannel {
        name: String,
        config: ChannelConfiguration,
        response: Reply<()>,
    },
    Enqueue {
        channel: String,
        payload: Bytes,
        timestamp: i64,
        response: Reply<EnqueueReceipt>,
    },
    Flush {
        channel: String,
        response: Reply<()>,
    },
    SetEnabled {
        channel: String,
        enabled: bool,
        purge: bool,
        response: Reply<()>,
    },
    Pause {
        channel: String,
        response: Reply<()>,
    },
    Resume {
        channel: String,
        response: Reply<()>,
    },
    Status {
        channel: String,
        response: Reply<ChannelSnapshot>,
    },
    ConnectivityChanged(bool),
    Background,
    Foreground,
    Terminating(Reply<TerminationFlush>),
    Shutdown(Reply<()>),
}

#[derive(Clone, Debug)]
pub struct ChannelGroupHandle {
    tx: mpsc::UnboundedSender<ChannelGroupCommand>,
    default_channel: ChannelConfiguration,
    termination_flush_timeout: Duration,
}

impl ChannelGroupHandle {
    pub async fn add_channel(
        &self,
        name: impl Into<String>,
        config: ChannelConfiguration,
    ) -> Result<(), ChannelError> {
        let name = name.into();
        self.request(|response| ChannelGroupCommand::AddChannel {
            name,
            config,
            response,
        })
        .await
    }

    /// Registers a channel with the group's default configuration.
    pub async fn add_channel_with_defaults(
        &self,
        name: impl Into<String>,
    ) -> Result<(), ChannelError> {
        self.add_channel(name, self.default_channel).await
    }

    /// Persists `payload` into `channel`.
    ///
    /// The receipt reports how many of the oldest logs were evicted to make
    /// room. Eviction is a warning, not a failure.
    pub async fn enqueue(
        &self,
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
        timestamp: i64,
    ) -> Result<EnqueueReceipt, ChannelError> {
        let channel = channel.into();
        let payload = payload.into();
        self.request(|response| ChannelGroupCommand::Enqueue {
            channel,
            payload,
            timestamp,
            response,
        })
        .await
    }

    /// Sends every pending log of `channel` now, as far as the in-flight
    /// limit allows, skipping any backoff wait.
    pub async fn flush(&self, channel: impl Into<String>) -> Result<(), ChannelError> {
        let channel = channel.into();
        self.request(|response| ChannelGroupCommand::Flush { channel, response })
            .await
    }

    /// Disabling keeps persisted logs unless `purge` is set.
    pub async fn set_enabled(
        &self,
        channel: impl Into<String>,
        enabled: bool,
        purge: bool,
    ) -> Result<(), ChannelError> {
        let channel = channel.into();
        self.request(|response| ChannelGroupCommand::SetEnabled {
            channel,
            enabled,
            purge,
            response,
        })
        .await
    }

    pub async fn pause_channel(&self, channel: impl Into<String>) -> Result<(), ChannelError> {
        let channel = channel.into();
        self.request(|response| ChannelGroupCommand::Pause { channel, response })
            .await
    }

    pub async fn resume_channel(&self, channel: impl Into<String>) -> Result<(), ChannelError> {
        let channel = channel.into();
        self.request(|response| ChannelGroupCommand::Resume { channel, response })
            .await
    }

    pub async fn channel_status(
        &self,
        channel: impl Into<String>,
    ) -> Result<ChannelSnapshot, ChannelError> {
        let channel = channel.into();
        self.request(|response| ChannelGroupCommand::Status { channel, response })
            .await
    }

    pub fn on_connectivity_changed(&self, available: bool) -> Result<(), ChannelError> {
        self.signal(ChannelGroupCommand::ConnectivityChanged(available))
    }

    pub fn on_application_background(&self) -> Result<(), ChannelError> {
        self.signal(ChannelGroupCommand::Background)
    }

    pub fn on_application_foreground(&self) -> Result<(), ChannelError> {
        self.signal(ChannelGroupCommand::Foreground)
    }

    /// Best-effort final flush. Resolves once nothing is in flight or when the
    /// configured termination flush timeout elapses, whichever comes first.
    ///
    /// Partial batches are sent right away until nothing is in flight anymore.
    /// After that, channels batch by size and timer again.
    pub async fn on_application_terminating(&self) -> Result<TerminationFlush, ChannelError> {
        let timeout = self.termination_flush_timeout;
        match tokio::time::timeout(timeout, self.request(ChannelGroupCommand::Terminating)).await
        {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "CHANNEL_GROUP | Termination flush timed out after {} ms",
                    timeout.as_millis()
                );
                Ok(TerminationFlush::TimedOut)
            }
        }
    }

    /// Disables every channel and cancels all timers. Persisted logs stay for
    /// the next start. Later commands fail with [`ChannelError::ShutDown`].
    pub async fn shutdown(&self) -> Result<(), ChannelError> {
        self.request(ChannelGroupCommand::Shutdown).await
    }

    /// Forwards reachability changes to the group until `cancel` fires.
    ///
    /// The current state is forwarded first.
    pub fn attach_connectivity(
        &self,
        monitor: &dyn ConnectivityMonitor,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = monitor.subscribe();
        let handle = self.clone();
        tokio::spawn(async move {
            let mut available = *rx.borrow_and_update();
            loop {
                if handle.on_connectivity_changed(available).is_err() {
                    debug!("CHANNEL_GROUP | Service gone, stopping connectivity forwarding");
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        available = *rx.borrow_and_update();
                    }
                }
            }
        })
    }

    /// Forwards application lifecycle transitions to the group until `cancel`
    /// fires.
    pub fn attach_lifecycle(
        &self,
        source: &dyn LifecycleSignal,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = source.subscribe();
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                let forwarded = match event {
                    Ok(LifecycleEvent::Foreground) => handle.on_application_foreground(),
                    Ok(LifecycleEvent::Background) => handle.on_application_background(),
                    Ok(LifecycleEvent::Terminating) => handle
                        .on_application_terminating()
                        .await
                        .map(|outcome| info!("CHANNEL_GROUP | Termination flush: {outcome:?}")),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("CHANNEL_GROUP | Missed {skipped} lifecycle events");
                        Ok(())
                    }
                    Err(RecvError::Closed) => break,
                };
                if forwarded.is_err() {
                    debug!("CHANNEL_GROUP | Service gone, stopping lifecycle forwarding");
                    break;
                }
            }
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ChannelGroupCommand,
    ) -> Result<T, ChannelError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(command(response_tx)).map_err(|e| {
            ChannelError::ServiceUnavailable(format!("Failed to send command: {e}"))
        })?;
        response_rx.await.map_err(|e| {
            ChannelError::ServiceUnavailable(format!("Failed to receive response: {e}"))
        })?
    }

    fn signal(&self, command: ChannelGroupCommand) -> Result<(), ChannelError> {
        self.tx
            .send(command)
            .map_err(|e| ChannelError::ServiceUnavailable(format!("Failed to send signal: {e}")))
    }
}

enum Step {
    Command(Option<ChannelGroupCommand>),
    Completion(Completion),
    Timer(Timer),
}

pub struct ChannelGroupService {
    config: Config,
    store: Arc<dyn LogStore>,
    transport: Arc<dyn Transport>,
    channels: HashMap<String, Channel>,
    group: GroupState,
    timers: Scheduler,
    events: Option<Sender<Event>>,
    rx: mpsc::UnboundedReceiver<ChannelGroupCommand>,
    commands_closed: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    termination_waiters: Vec<Reply<TerminationFlush>>,
    shut_down: bool,
}

impl ChannelGroupService {
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn LogStore>,
        transport: Arc<dyn Transport>,
    ) -> (Self, ChannelGroupHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let handle = ChannelGroupHandle {
            tx,
            default_channel: config.default_channel,
            termination_flush_timeout: config.termination_flush_timeout,
        };
        let service = ChannelGroupService {
            config,
            store,
            transport,
            channels: HashMap::new(),
            group: GroupState::default(),
            timers: Scheduler::new(),
            events: None,
            rx,
            commands_closed: false,
            completions_tx,
            completions_rx,
            termination_waiters: Vec::new(),
            shut_down: false,
        };
        (service, handle)
    }

    /// Builds a group from configuration alone: a sled store at
    /// `storage_path` (in memory without one) and the HTTP transport.
    pub fn from_config(config: Config) -> Result<(Self, ChannelGroupHandle), ChannelError> {
        let store: Arc<dyn LogStore> = match &config.storage_path {
            Some(path) => Arc::new(SledLogStore::open(path)?),
            None => Arc::new(MemoryLogStore::new()),
        };
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config));
        Ok(Self::new(config, store, transport))
    }

    /// Publishes delivery events to `events`.
    #[must_use]
    pub fn with_event_bus(mut self, events: Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Processes commands, transport results and timers until every handle
    /// is dropped and no batch is left in flight.
    pub async fn run(mut self) {
        debug!("CHANNEL_GROUP | Service started");
        loop {
            let step = tokio::select! {
                command = self.rx.recv(), if !self.commands_closed => Step::Command(command),
                Some(completion) = self.completions_rx.recv() => Step::Completion(completion),
                timer = self.timers.next_expired() => Step::Timer(timer),
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => {
                    debug!("CHANNEL_GROUP | All handles dropped");
                    self.commands_closed = true;
                }
                Step::Completion(completion) => self.handle_completion(completion),
                Step::Timer(timer) => self.handle_timer(&timer),
            }

            if self.commands_closed && !self.has_in_flight() {
                break;
            }
        }
        debug!("CHANNEL_GROUP | Service stopped");
    }

    fn handle_command(&mut self, command: ChannelGroupCommand) {
        match command {
            ChannelGroupCommand::AddChannel {
                name,
                config,
                response,
            } => {
                let _ = response.send(self.add_channel(&name, config));
            }
            ChannelGroupCommand::Enqueue {
                channel,
                payload,
                timestamp,
                response,
            } => {
                let entry = LogEntry::new(channel.clone(), payload, timestamp);
                let result = self.with_channel(&channel, |c, ctx| c.enqueue(ctx, &entry));
                let _ = response.send(result);
            }
            ChannelGroupCommand::Flush { channel, response } => {
                let result = self.with_channel(&channel, |c, ctx| {
                    c.flush_now(ctx);
                    Ok(())
                });
                let _ = response.send(result);
            }
            ChannelGroupCommand::SetEnabled {
                channel,
                enabled,
                purge,
                response,
            } => {
                let result = self.with_channel(&channel, |c, ctx| {
                    c.set_enabled(ctx, enabled, purge).map_err(ChannelError::from)
                });
                let _ = response.send(result);
            }
            ChannelGroupCommand::Pause { channel, response } => {
                let result = self.with_channel(&channel, |c, ctx| {
                    c.pause(ctx);
                    Ok(())
                });
                let _ = response.send(result);
            }
            ChannelGroupCommand::Resume { channel, response } => {
                let result = self.with_channel(&channel, |c, ctx| {
                    c.resume(ctx);
                    Ok(())
                });
                let _ = response.send(result);
            }
            ChannelGroupCommand::Status { channel, response } => {
                let result = self.with_channel(&channel, |c, ctx| Ok(c.snapshot(ctx.group)));
                let _ = response.send(result);
            }
            ChannelGroupCommand::ConnectivityChanged(available) => {
                self.on_connectivity_changed(available);
            }
            ChannelGroupCommand::Background => self.on_application_suspended(true),
            ChannelGroupCommand::Foreground => self.on_application_suspended(false),
            ChannelGroupCommand::Terminating(response) => self.on_terminating(response),
            ChannelGroupCommand::Shutdown(response) => {
                self.shutdown();
                let _ = response.send(Ok(()));
            }
        }
    }

    fn add_channel(
        &mut self,
        name: &str,
        config: ChannelConfiguration,
    ) -> Result<(), ChannelError> {
        if self.shut_down {
            return Err(ChannelError::ShutDown);
        }
        config
            .validate()
            .map_err(|e| ChannelError::InvalidConfiguration(e.to_string()))?;
        if self.channels.contains_key(name) {
            return Err(ChannelError::DuplicateChannel(name.to_string()));
        }

        let mut channel = Channel::new(name, config, self.store.as_ref())?;
        debug!(
            "CHANNEL_GROUP | Added channel '{}' with {} persisted logs",
            name,
            channel.snapshot(self.group).backlog
        );
        let (_, mut ctx) = self.context();
        channel.check_pending(&mut ctx);
        self.channels.insert(name.to_string(), channel);
        Ok(())
    }

    fn on_connectivity_changed(&mut self, available: bool) {
        if self.shut_down || self.group.network_available == available {
            return;
        }
        self.group.network_available = available;
        if available {
            info!("CHANNEL_GROUP | Network available, resuming channels");
            self.flush_all();
        } else {
            info!("CHANNEL_GROUP | Network unavailable, suspending channels");
        }
    }

    fn on_application_suspended(&mut self, suspended: bool) {
        if self.shut_down || self.group.application_suspended == suspended {
            return;
        }
        self.group.application_suspended = suspended;
        if suspended {
            debug!("CHANNEL_GROUP | Application in background, suspending channels");
        } else {
            debug!("CHANNEL_GROUP | Application in foreground, resuming channels");
            self.flush_all();
        }
    }

    fn on_terminating(&mut self, response: Reply<TerminationFlush>) {
        if self.shut_down {
            let _ = response.send(Err(ChannelError::ShutDown));
            return;
        }
        debug!("CHANNEL_GROUP | Application terminating, flushing all channels");
        self.group.terminating = true;
        self.flush_all();
        self.termination_waiters.push(response);
        self.resolve_termination_waiters();
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let (channels, mut ctx) = self.context();
        for channel in channels.values_mut() {
            if let Err(e) = channel.set_enabled(&mut ctx, false, false) {
                error!(
                    "CHANNEL_GROUP | Failed to disable channel '{}': {}",
                    channel.name(),
                    e
                );
            }
            channel.forget_timers();
        }
        self.timers.clear();
        self.shut_down = true;
        info!("CHANNEL_GROUP | Shut down, persisted logs are kept");
    }

    fn handle_completion(&mut self, completion: Completion) {
        let (channels, mut ctx) = self.context();
        match channels.get_mut(&completion.channel) {
            Some(channel) => channel.on_completion(&mut ctx, completion),
            None => error!(
                "CHANNEL_GROUP | Batch result for unknown channel '{}'",
                completion.channel
            ),
        }
        self.resolve_termination_waiters();
    }

    fn handle_timer(&mut self, timer: &Timer) {
        let (channels, mut ctx) = self.context();
        if let Some(channel) = channels.get_mut(&timer.channel) {
            channel.on_timer(&mut ctx, timer.kind);
        }
    }

    fn flush_all(&mut self) {
        let (channels, mut ctx) = self.context();
        for channel in channels.values_mut() {
            channel.flush_now(&mut ctx);
        }
    }

    fn resolve_termination_waiters(&mut self) {
        if self.termination_waiters.is_empty() || self.has_in_flight() {
            return;
        }
        debug!("CHANNEL_GROUP | Termination flush drained");
        // Back to regular batching if the process keeps running.
        self.group.terminating = false;
        for waiter in self.termination_waiters.drain(..) {
            let _ = waiter.send(Ok(TerminationFlush::Drained));
        }
    }

    fn has_in_flight(&self) -> bool {
        self.channels.values().any(Channel::has_in_flight)
    }

    fn with_channel<T>(
        &mut self,
        name: &str,
        operation: impl FnOnce(&mut Channel, &mut ChannelContext<'_>) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        if self.shut_down {
            return Err(ChannelError::ShutDown);
        }
        let (channels, mut ctx) = self.context();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| ChannelError::UnknownChannel(name.to_string()))?;
        operation(channel, &mut ctx)
    }

    fn context(&mut self) -> (&mut HashMap<String, Channel>, ChannelContext<'_>) {
        (
            &mut self.channels,
            ChannelContext {
                store: self.store.as_ref(),
                transport: &self.transport,
                timers: &mut self.timers,
                completions: &self.completions_tx,
                events: self.events.as_ref(),
                retry_policy: &self.config.retry_policy,
                group: self.group,
            },
        )
    }
}
