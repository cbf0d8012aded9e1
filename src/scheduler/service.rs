// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runs a [`CapacityScheduler`] on its own task.
//!
//! All mutations go through a channel and are applied one at a time, so the
//! scheduler itself needs no locking. After every successful mutation a fresh
//! [`SchedulerSnapshot`] is published, which readers load without waiting for
//! the scheduler task.

use std::sync::Arc;

use arc_swap::ArcSwap;
use fastrace::Span;
use fastrace::future::FutureExt;
use log::{info, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CapacityScheduler, ContainerAllocation, SchedulerError, SchedulerEvent, SchedulerSnapshot};
use crate::config::SchedulerConfig;
use crate::queue::QueueSettings;
use crate::resource::{ResourceTypeDescriptor, ResourceTypeRegistry, ResourceVector};
use crate::types::{AttemptId, ResourceRequest};

/// Number of commands that may queue up before senders wait.
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

#[derive(Debug)]
enum Command {
    Event {
        event: SchedulerEvent,
        reply: Reply<Vec<ContainerAllocation>>,
    },
    UpdateRequests {
        attempt_id: AttemptId,
        requests: Vec<ResourceRequest>,
        reply: Reply<()>,
    },
    Reinitialize {
        config: SchedulerConfig,
        reply: Reply<()>,
    },
    ReinitializeResourceTypes {
        descriptors: Vec<ResourceTypeDescriptor>,
        reply: Reply<()>,
    },
    SetUserLimit {
        queue: String,
        percent: u32,
        reply: Reply<()>,
    },
    SetUserLimitFactor {
        queue: String,
        factor: f64,
        reply: Reply<()>,
    },
    AddQueue {
        parent: String,
        name: String,
        settings: QueueSettings,
        reply: Reply<()>,
    },
    RemoveQueue {
        name: String,
        reply: Reply<()>,
    },
}

/// Owns the scheduler and applies commands sent through [`SchedulerHandle`].
pub struct SchedulerService {
    scheduler: CapacityScheduler,
    commands: mpsc::Receiver<Command>,
    allocations: mpsc::UnboundedSender<ContainerAllocation>,
    snapshot: Arc<ArcSwap<SchedulerSnapshot>>,
    cancel_token: CancellationToken,
}

impl SchedulerService {
    /// Starts the scheduler loop on a new task.
    ///
    /// Returns the handle to talk to the scheduler, the stream of every
    /// container allocation it makes, and the task itself. The task ends once
    /// the handle's cancellation token fires or all handles are dropped.
    #[must_use]
    pub fn spawn(
        scheduler: CapacityScheduler,
    ) -> (
        SchedulerHandle,
        mpsc::UnboundedReceiver<ContainerAllocation>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (allocation_tx, allocation_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(ArcSwap::from_pointee(scheduler.snapshot()));
        let cancel_token = CancellationToken::new();

        let handle = SchedulerHandle {
            commands: command_tx,
            snapshot: Arc::clone(&snapshot),
            registry: Arc::clone(scheduler.registry()),
            cancel_token: cancel_token.clone(),
        };
        let service = Self {
            scheduler,
            commands: command_rx,
            allocations: allocation_tx,
            snapshot,
            cancel_token,
        };
        let task = tokio::spawn(
            async move { service.run().await }
                .in_span(Span::enter_with_local_parent("scheduler loop")),
        );
        (handle, allocation_rx, task)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
                () = self.cancel_token.cancelled() => break,
            }
        }
        info!("scheduler loop stopped");
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Event { event, reply } => {
                let result = self.scheduler.handle(event);
                if let Ok(allocations) = &result {
                    for allocation in allocations {
                        if self.allocations.send(allocation.clone()).is_err() {
                            trace!("nobody listens for allocations");
                        }
                    }
                }
                self.finish(reply, result);
            }
            Command::UpdateRequests {
                attempt_id,
                requests,
                reply,
            } => {
                let result = self.scheduler.update_resource_requests(attempt_id, requests);
                self.finish(reply, result);
            }
            Command::Reinitialize { config, reply } => {
                let result = self.scheduler.reinitialize(config);
                self.finish(reply, result);
            }
            Command::ReinitializeResourceTypes { descriptors, reply } => {
                let result = self.scheduler.reinitialize_resource_types(descriptors);
                self.finish(reply, result);
            }
            Command::SetUserLimit {
                queue,
                percent,
                reply,
            } => {
                let result = self.scheduler.set_user_limit(&queue, percent);
                self.finish(reply, result);
            }
            Command::SetUserLimitFactor {
                queue,
                factor,
                reply,
            } => {
                let result = self.scheduler.set_user_limit_factor(&queue, factor);
                self.finish(reply, result);
            }
            Command::AddQueue {
                parent,
                name,
                settings,
                reply,
            } => {
                let result = self.scheduler.add_queue(&parent, &name, settings);
                self.finish(reply, result);
            }
            Command::RemoveQueue { name, reply } => {
                let result = self.scheduler.remove_queue(&name);
                self.finish(reply, result);
            }
        }
    }

    /// Publishes the new state, then answers the caller.
    fn finish<T>(&self, reply: Reply<T>, result: Result<T, SchedulerError>) {
        match &result {
            Ok(_) => self.snapshot.store(Arc::new(self.scheduler.snapshot())),
            Err(err) => warn!("scheduler rejected command: {err}"),
        }
        if reply.send(result).is_err() {
            trace!("caller stopped waiting for reply");
        }
    }
}

/// Cheap, cloneable access to a running [`SchedulerService`].
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    snapshot: Arc<ArcSwap<SchedulerSnapshot>>,
    registry: Arc<ResourceTypeRegistry>,
    cancel_token: CancellationToken,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::ServiceStopped)?;
        response.await.map_err(|_| SchedulerError::ServiceStopped)?
    }

    /// Sends a cluster event and waits for the containers it allocated.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error for this event, or
    /// [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn handle(
        &self,
        event: SchedulerEvent,
    ) -> Result<Vec<ContainerAllocation>, SchedulerError> {
        self.request(|reply| Command::Event { event, reply }).await
    }

    /// See [`CapacityScheduler::update_resource_requests`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn update_resource_requests(
        &self,
        attempt_id: AttemptId,
        requests: Vec<ResourceRequest>,
    ) -> Result<(), SchedulerError> {
        self.request(|reply| Command::UpdateRequests {
            attempt_id,
            requests,
            reply,
        })
        .await
    }

    /// See [`CapacityScheduler::reinitialize`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn reinitialize(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Reinitialize { config, reply })
            .await
    }

    /// See [`CapacityScheduler::reinitialize_resource_types`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn reinitialize_resource_types(
        &self,
        descriptors: Vec<ResourceTypeDescriptor>,
    ) -> Result<(), SchedulerError> {
        self.request(|reply| Command::ReinitializeResourceTypes { descriptors, reply })
            .await
    }

    /// See [`CapacityScheduler::set_user_limit`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn set_user_limit(&self, queue: &str, percent: u32) -> Result<(), SchedulerError> {
        let queue = queue.to_string();
        self.request(|reply| Command::SetUserLimit {
            queue,
            percent,
            reply,
        })
        .await
    }

    /// See [`CapacityScheduler::set_user_limit_factor`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn set_user_limit_factor(
        &self,
        queue: &str,
        factor: f64,
    ) -> Result<(), SchedulerError> {
        let queue = queue.to_string();
        self.request(|reply| Command::SetUserLimitFactor {
            queue,
            factor,
            reply,
        })
        .await
    }

    /// See [`CapacityScheduler::add_queue`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn add_queue(
        &self,
        parent: &str,
        name: &str,
        settings: QueueSettings,
    ) -> Result<(), SchedulerError> {
        let (parent, name) = (parent.to_string(), name.to_string());
        self.request(|reply| Command::AddQueue {
            parent,
            name,
            settings,
            reply,
        })
        .await
    }

    /// See [`CapacityScheduler::remove_queue`].
    ///
    /// # Errors
    ///
    /// Additionally returns [`SchedulerError::ServiceStopped`] if the loop is gone.
    pub async fn remove_queue(&self, name: &str) -> Result<(), SchedulerError> {
        let name = name.to_string();
        self.request(|reply| Command::RemoveQueue { name, reply })
            .await
    }

    /// Gives the state after the last successful command.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SchedulerSnapshot> {
        self.snapshot.load_full()
    }

    /// Gives the advertised maximum allocation.
    #[must_use]
    pub fn maximum_resource_capability(&self) -> ResourceVector {
        self.snapshot.load().maximum_resource_capability.clone()
    }

    /// Gives the registry's baseline maximum allocation.
    #[must_use]
    pub fn maximum_allocation(&self) -> ResourceVector {
        self.registry.maximum_allocation()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}
