// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event-driven capacity scheduler.
//!
//! The central structure is [`CapacityScheduler`]. It owns the queue tree,
//! all applications and all nodes, and reacts to one [`SchedulerEvent`] at a
//! time. Heartbeats of a node trigger an allocation pass that hands out the
//! node's free resources, producing a [`ContainerAllocation`] per container.
//!
//! [`SchedulerService`] runs a scheduler on its own task and serializes
//! every mutation through a channel, see [`SchedulerHandle`].

mod app;
mod event;
mod node;
mod service;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use thiserror::Error;

pub use self::app::{
    ApplicationUsage, AttemptState, Container, SchedulerApplication, SchedulerAttempt,
};
pub use self::event::{ContainerAllocation, SchedulerEvent};
pub use self::node::SchedulerNode;
pub use self::service::{SchedulerHandle, SchedulerService};
use crate::config::{ConfigError, SchedulerConfig};
use crate::queue::{
    QueueHierarchy, QueueId, QueueSettings, QueueStateError, QueueUsage, UsageDelta,
    UserLimitCalculator,
};
use crate::resource::{
    RegistrySnapshot, ResourceCalculator, ResourceTypeDescriptor, ResourceTypeRegistry,
    ResourceVector, ResourceVectorError,
};
use crate::types::{ApplicationId, AttemptId, ContainerId, NodeId, ResourceRequest};

/// Errors the scheduler may return for an event or an administrative call.
///
/// Whenever an error is returned, the scheduler's state is unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    QueueState(#[from] QueueStateError),
    #[error(transparent)]
    ResourceVector(#[from] ResourceVectorError),
    #[error("node `{0}` is not registered")]
    UnknownNode(NodeId),
    #[error("node `{0}` is already registered")]
    DuplicateNode(NodeId),
    #[error("application `{0}` is not known")]
    UnknownApplication(ApplicationId),
    #[error("application `{0}` already exists")]
    DuplicateApplication(ApplicationId),
    #[error("`{0}` is not the current attempt of its application")]
    UnknownAttempt(AttemptId),
    #[error("application `{0}` already has an attempt")]
    AttemptAlreadyActive(ApplicationId),
    #[error("container `{0}` is not known")]
    UnknownContainer(ContainerId),
    #[error("invalid request from `{attempt}`: {reason}")]
    InvalidRequest { attempt: AttemptId, reason: String },
    #[error("scheduler service has stopped")]
    ServiceStopped,
}

/// Immutable view of the scheduler's state after some event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulerSnapshot {
    pub registry_generation: u64,
    /// Largest container the scheduler currently accepts.
    pub maximum_resource_capability: ResourceVector,
    pub minimum_allocation: ResourceVector,
    pub cluster_resource: ResourceVector,
    pub nodes: usize,
    pub queues: BTreeMap<String, QueueUsage>,
    pub applications: BTreeMap<ApplicationId, ApplicationUsage>,
}

impl SchedulerSnapshot {
    /// Gives what `user` uses in the queue with the given path.
    #[must_use]
    pub fn user_usage(&self, queue: &str, user: &str) -> ResourceVector {
        self.queues
            .get(queue)
            .and_then(|q| q.used_by_user.get(user).cloned())
            .unwrap_or_default()
    }
}

/// Hierarchical, multi-dimensional capacity scheduler.
#[derive(Debug)]
pub struct CapacityScheduler {
    registry: Arc<ResourceTypeRegistry>,
    config: SchedulerConfig,
    calculator: Arc<dyn ResourceCalculator>,
    queues: QueueHierarchy,
    applications: BTreeMap<ApplicationId, SchedulerApplication>,
    nodes: BTreeMap<NodeId, SchedulerNode>,
    /// Sum of the capability of all nodes.
    cluster_resource: ResourceVector,
    minimum_allocation: ResourceVector,
    /// Advertised maximum allocation, may be above the registry's baseline.
    maximum_allocation: ResourceVector,
}

impl CapacityScheduler {
    /// Creates a scheduler for `config` on top of `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if `config` is invalid for the
    /// registry's current snapshot.
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ResourceTypeRegistry>,
    ) -> Result<Self, SchedulerError> {
        let snapshot = registry.snapshot();
        let (minimum_allocation, maximum_allocation) = config.allocation_bounds(&snapshot)?;
        let queues = QueueHierarchy::from_config(&config.queues)?;
        info!("capacity scheduler started with {}", config.describe_bounds());
        Ok(Self {
            registry,
            calculator: config.resource_calculator.build(),
            config,
            queues,
            applications: BTreeMap::new(),
            nodes: BTreeMap::new(),
            cluster_resource: ResourceVector::new(),
            minimum_allocation,
            maximum_allocation,
        })
    }

    /// Handles a single cluster event.
    ///
    /// Only [`SchedulerEvent::NodeUpdate`] allocates containers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the event refers to unknown entities or
    /// would violate a queue invariant.
    #[fastrace::trace(short_name = true)]
    pub fn handle(
        &mut self,
        event: SchedulerEvent,
    ) -> Result<Vec<ContainerAllocation>, SchedulerError> {
        trace!("handling {} event", event.kind());
        let snapshot = self.registry.snapshot();
        match event {
            SchedulerEvent::NodeAdded {
                node_id,
                capability,
            } => self.add_node(&snapshot, node_id, capability)?,
            SchedulerEvent::NodeRemoved { node_id } => self.remove_node(&node_id)?,
            SchedulerEvent::NodeUpdate {
                node_id,
                reported_available,
            } => {
                if let Some(reported) = &reported_available {
                    reported.validate_against(&snapshot)?;
                }
                let node = self
                    .nodes
                    .get_mut(&node_id)
                    .ok_or_else(|| SchedulerError::UnknownNode(node_id.clone()))?;
                let previous = node.set_reported_available(reported_available);
                let result = self.allocate_on_node(&snapshot, &node_id);
                if result.is_err() {
                    if let Some(node) = self.nodes.get_mut(&node_id) {
                        node.set_reported_available(previous);
                    }
                }
                return result;
            }
            SchedulerEvent::NodeResourceUpdate {
                node_id,
                capability,
            } => self.update_node_resource(&snapshot, &node_id, capability)?,
            SchedulerEvent::AppAdded {
                application_id,
                queue,
                user,
            } => self.add_application(application_id, &queue, user)?,
            SchedulerEvent::AppAttemptAdded {
                attempt_id,
                am_resource,
            } => self.add_attempt(&snapshot, attempt_id, am_resource)?,
            SchedulerEvent::AppAttemptRemoved { attempt_id } => {
                self.remove_attempt(&snapshot, attempt_id)?;
            }
            SchedulerEvent::AppRemoved { application_id } => {
                self.remove_application(&snapshot, application_id)?;
            }
            SchedulerEvent::ContainerReleased { container_id } => {
                self.release_container(container_id)?;
            }
        }
        Ok(Vec::new())
    }

    fn add_node(
        &mut self,
        snapshot: &RegistrySnapshot,
        node_id: NodeId,
        capability: ResourceVector,
    ) -> Result<(), SchedulerError> {
        if self.nodes.contains_key(&node_id) {
            return Err(SchedulerError::DuplicateNode(node_id));
        }
        capability.validate_against(snapshot)?;
        self.cluster_resource = self.cluster_resource.add(&capability);
        info!(
            "added node {node_id} with {capability}, cluster is now {}",
            self.cluster_resource
        );
        self.nodes
            .insert(node_id.clone(), SchedulerNode::new(node_id, capability));
        Ok(())
    }

    fn remove_node(&mut self, node_id: &NodeId) -> Result<(), SchedulerError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| SchedulerError::UnknownNode(node_id.clone()))?;
        // queues are resolved before anything is removed
        let mut lost = Vec::new();
        for container_id in node.containers().map(|(id, _)| *id) {
            if let Some(app) = self.applications.get(&container_id.attempt().application()) {
                lost.push((container_id, leaf_of(&self.queues, app)?));
            }
        }
        let total = node.total().clone();
        self.nodes.remove(node_id);

        let mut released = 0;
        for (container_id, queue_id) in lost {
            let attempt_id = container_id.attempt();
            let Some(app) = self.applications.get_mut(&attempt_id.application()) else {
                continue;
            };
            let container = app
                .attempt_with_id(attempt_id)
                .and_then(|attempt| attempt.release(&container_id));
            if let Some(container) = container {
                self.queues.record_delta(
                    queue_id,
                    app.user(),
                    &UsageDelta::Released(container.capability),
                )?;
                released += 1;
            }
        }
        self.cluster_resource = self.cluster_resource.subtract(&total);
        info!(
            "removed node {node_id}, {released} containers lost, cluster is now {}",
            self.cluster_resource
        );
        Ok(())
    }

    fn update_node_resource(
        &mut self,
        snapshot: &RegistrySnapshot,
        node_id: &NodeId,
        capability: ResourceVector,
    ) -> Result<(), SchedulerError> {
        capability.validate_against(snapshot)?;
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::UnknownNode(node_id.clone()))?;
        self.cluster_resource = self
            .cluster_resource
            .subtract(node.total())
            .add(&capability);
        debug!("node {node_id} now has {capability}");
        node.set_total(capability);
        Ok(())
    }

    fn add_application(
        &mut self,
        application_id: ApplicationId,
        queue: &str,
        user: String,
    ) -> Result<(), SchedulerError> {
        if self.applications.contains_key(&application_id) {
            return Err(SchedulerError::DuplicateApplication(application_id));
        }
        let queue_id = self
            .queues
            .queue_id(queue)
            .ok_or_else(|| QueueStateError::UnknownQueue(queue.to_string()))?;
        self.queues.attach_application(queue_id, application_id)?;
        let path = self.queues.queue(queue_id).path().to_string();
        info!("accepted application {application_id} from {user} into {path}");
        self.applications.insert(
            application_id,
            SchedulerApplication::new(application_id, path, user),
        );
        Ok(())
    }

    fn add_attempt(
        &mut self,
        snapshot: &RegistrySnapshot,
        attempt_id: AttemptId,
        am_resource: ResourceVector,
    ) -> Result<(), SchedulerError> {
        am_resource.validate_against(snapshot)?;
        let application_id = attempt_id.application();
        let app = self
            .applications
            .get_mut(&application_id)
            .ok_or(SchedulerError::UnknownApplication(application_id))?;
        if app.attempt().is_some() {
            return Err(SchedulerError::AttemptAlreadyActive(application_id));
        }
        app.set_attempt(Some(SchedulerAttempt::new(attempt_id, am_resource)));
        debug!("attempt {attempt_id} submitted");
        self.activate_pending(snapshot)
    }

    /// Moves submitted attempts to running as far as AM limits allow.
    fn activate_pending(&mut self, snapshot: &RegistrySnapshot) -> Result<(), SchedulerError> {
        let calculator = Arc::clone(&self.calculator);
        for app in self.applications.values_mut() {
            let queue_id = leaf_of(&self.queues, app)?;
            let user = app.user().to_string();
            let Some(attempt) = app
                .attempt_mut()
                .filter(|a| a.state() == AttemptState::Submitted)
            else {
                continue;
            };
            let am = attempt.am_resource().clone();
            if !self.queues.can_activate(
                queue_id,
                &am,
                calculator.as_ref(),
                snapshot,
                &self.cluster_resource,
            )? {
                trace!("attempt {} waits for AM headroom", attempt.id());
                continue;
            }
            self.queues.record_am(queue_id, &UsageDelta::Allocated(am))?;
            self.queues.activate_user(queue_id, &user);
            attempt.set_state(AttemptState::Running);
            info!("attempt {} is running", attempt.id());
        }
        Ok(())
    }

    fn remove_attempt(
        &mut self,
        snapshot: &RegistrySnapshot,
        attempt_id: AttemptId,
    ) -> Result<(), SchedulerError> {
        let application_id = attempt_id.application();
        let app = self
            .applications
            .get_mut(&application_id)
            .ok_or(SchedulerError::UnknownApplication(application_id))?;
        let queue_id = leaf_of(&self.queues, app)?;
        let user = app.user().to_string();
        let attempt = app
            .attempt_with_id(attempt_id)
            .ok_or(SchedulerError::UnknownAttempt(attempt_id))?;

        let was_running = attempt.state() == AttemptState::Running;
        attempt.set_state(AttemptState::Completing);
        let containers = attempt.drain();
        debug!(
            "attempt {attempt_id} completing, releasing {} containers",
            containers.len()
        );
        for container in containers {
            if let Some(node) = self.nodes.get_mut(&container.node_id) {
                node.release(&container.id);
            }
            self.queues
                .record_delta(queue_id, &user, &UsageDelta::Released(container.capability))?;
        }
        if was_running {
            let am = attempt.am_resource().clone();
            self.queues.record_am(queue_id, &UsageDelta::Released(am))?;
            self.queues.deactivate_user(queue_id, &user);
        }
        attempt.set_state(AttemptState::Removed);
        app.set_attempt(None);
        info!("attempt {attempt_id} removed");

        self.activate_pending(snapshot)
    }

    fn remove_application(
        &mut self,
        snapshot: &RegistrySnapshot,
        application_id: ApplicationId,
    ) -> Result<(), SchedulerError> {
        let attempt_id = self
            .applications
            .get(&application_id)
            .ok_or(SchedulerError::UnknownApplication(application_id))?
            .attempt()
            .map(SchedulerAttempt::id);
        if let Some(attempt_id) = attempt_id {
            self.remove_attempt(snapshot, attempt_id)?;
        }
        if let Some(app) = self.applications.remove(&application_id) {
            if let Some(queue_id) = self.queues.queue_id(app.queue()) {
                self.queues.detach_application(queue_id, application_id);
            }
        }
        info!("application {application_id} removed");
        Ok(())
    }

    fn release_container(&mut self, container_id: ContainerId) -> Result<(), SchedulerError> {
        let attempt_id = container_id.attempt();
        let app = self
            .applications
            .get_mut(&attempt_id.application())
            .ok_or(SchedulerError::UnknownContainer(container_id))?;
        let container = app
            .attempt_with_id(attempt_id)
            .and_then(|attempt| attempt.release(&container_id))
            .ok_or(SchedulerError::UnknownContainer(container_id))?;
        if let Some(node) = self.nodes.get_mut(&container.node_id) {
            node.release(&container.id);
        }
        debug!("container {container_id} released on {}", container.node_id);
        release_from_queue(&mut self.queues, app, container.capability)
    }

    /// Hands out the free resources of one node.
    ///
    /// Leaf queues are served least utilized first, applications in
    /// submission order and requests in priority order. A container is
    /// admitted only if it fits on the node, within the queue's and every
    /// ancestor's maximum capacity, and within the user's limit.
    ///
    /// If a check fails after containers were already placed, the pass stops
    /// and those containers are still returned.
    #[fastrace::trace(short_name = true)]
    fn allocate_on_node(
        &mut self,
        snapshot: &RegistrySnapshot,
        node_id: &NodeId,
    ) -> Result<Vec<ContainerAllocation>, SchedulerError> {
        let mut allocations = Vec::new();
        match self.allocation_pass(snapshot, node_id, &mut allocations) {
            Ok(()) => {}
            Err(err) if allocations.is_empty() => return Err(err),
            Err(err) => warn!(
                "stopped allocating on {node_id} after {} containers: {err}",
                allocations.len()
            ),
        }
        if !allocations.is_empty() {
            info!(
                "allocated {} containers on {node_id}, {} left",
                allocations.len(),
                self.nodes
                    .get(node_id)
                    .map(SchedulerNode::available)
                    .unwrap_or_default()
            );
        }
        Ok(allocations)
    }

    fn allocation_pass(
        &mut self,
        snapshot: &RegistrySnapshot,
        node_id: &NodeId,
        allocations: &mut Vec<ContainerAllocation>,
    ) -> Result<(), SchedulerError> {
        let calculator = Arc::clone(&self.calculator);
        let user_limits = UserLimitCalculator::new(calculator.as_ref(), snapshot);
        let cluster = self.cluster_resource.clone();
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::UnknownNode(node_id.clone()))?;

        for leaf in self.queues.leaf_order(calculator.as_ref(), snapshot, &cluster)? {
            let applications = self.queues.queue(leaf).applications().to_vec();
            for application_id in applications {
                let Some(app) = self.applications.get_mut(&application_id) else {
                    continue;
                };
                let user = app.user().to_string();
                let Some(attempt) = app
                    .attempt_mut()
                    .filter(|a| a.state() == AttemptState::Running)
                else {
                    continue;
                };
                for index in 0..attempt.requests().len() {
                    let request = &attempt.requests()[index];
                    if !request.matches_node(node_id.as_str()) {
                        continue;
                    }
                    let capability = request.capability.clone();
                    let mut budget = calculator
                        .compute_available_containers(snapshot, &node.available(), &capability)
                        .min(u64::from(request.num_containers));
                    while budget > 0 {
                        if !capability.fits_in(&node.available())
                            || !self.queues.has_headroom(
                                leaf,
                                &capability,
                                calculator.as_ref(),
                                snapshot,
                                &cluster,
                            )?
                            || !user_limits.can_assign_to_user(
                                &self.queues,
                                leaf,
                                &user,
                                &cluster,
                                &capability,
                            )?
                        {
                            break;
                        }

                        self.queues.record_delta(
                            leaf,
                            &user,
                            &UsageDelta::Allocated(capability.clone()),
                        )?;
                        let container = attempt.allocate(index, node_id.clone());
                        node.allocate(container.id, capability.clone());
                        budget -= 1;
                        debug!(
                            "allocated {} with {capability} on {node_id} for {user}",
                            container.id
                        );
                        allocations.push(ContainerAllocation {
                            container_id: container.id,
                            application_id,
                            attempt_id: attempt.id(),
                            node_id: node_id.clone(),
                            capability: capability.clone(),
                            priority: container.priority,
                        });
                    }
                }
                attempt.prune_requests();
            }
        }
        Ok(())
    }

    /// Merges new outstanding requests of an attempt.
    ///
    /// Requests are checked against the registry and the advertised maximum
    /// allocation, then normalized to the minimum allocation.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidRequest`] if a request names an
    /// unregistered dimension or exceeds the maximum allocation, and
    /// [`SchedulerError::UnknownAttempt`] if `attempt_id` is not current.
    pub fn update_resource_requests(
        &mut self,
        attempt_id: AttemptId,
        requests: Vec<ResourceRequest>,
    ) -> Result<(), SchedulerError> {
        let snapshot = self.registry.snapshot();
        let invalid = |reason: String| SchedulerError::InvalidRequest {
            attempt: attempt_id,
            reason,
        };
        let mut normalized = Vec::with_capacity(requests.len());
        for mut request in requests {
            request
                .capability
                .validate_against(&snapshot)
                .map_err(|e| invalid(e.to_string()))?;
            if !request.capability.fits_in(&self.maximum_allocation) {
                return Err(invalid(format!(
                    "{} exceeds maximum allocation {}",
                    request.capability, self.maximum_allocation
                )));
            }
            request.capability = request.capability.normalize(
                &snapshot,
                &self.minimum_allocation,
                &self.maximum_allocation,
            );
            normalized.push(request);
        }

        let application_id = attempt_id.application();
        let attempt = self
            .applications
            .get_mut(&application_id)
            .ok_or(SchedulerError::UnknownApplication(application_id))?
            .attempt_with_id(attempt_id)
            .ok_or(SchedulerError::UnknownAttempt(attempt_id))?;
        trace!("attempt {attempt_id} updated {} requests", normalized.len());
        attempt.update_requests(normalized);
        Ok(())
    }

    /// Replaces the active configuration.
    ///
    /// The advertised maximum allocation may only grow. The new queue tree is
    /// built and checked aside and carries over all usage.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if the configuration is invalid, would
    /// lower an advertised maximum, or would drop a queue still in use.
    /// Nothing is changed in that case.
    #[fastrace::trace(short_name = true)]
    pub fn reinitialize(&mut self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        let snapshot = self.registry.snapshot();
        let (minimum, maximum) = config.allocation_bounds(&snapshot)?;
        SchedulerConfig::check_maximum_not_decreased(&snapshot, &self.maximum_allocation, &maximum)?;
        let queues = self.queues.merge_from(&config.queues)?;

        self.calculator = config.resource_calculator.build();
        self.queues = queues;
        self.minimum_allocation = minimum;
        self.maximum_allocation = maximum;
        self.config = config;
        info!(
            "scheduler reinitialized, maximum allocation is now {}",
            self.maximum_allocation
        );
        Ok(())
    }

    /// Replaces the resource types of the registry.
    ///
    /// Dimensions still in use by nodes, queues or requests cannot be dropped.
    /// Advertised maxima of dimensions that stay registered never shrink.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if the descriptors are invalid, drop
    /// a dimension in use, or do not fit the active configuration.
    pub fn reinitialize_resource_types(
        &mut self,
        descriptors: Vec<ResourceTypeDescriptor>,
    ) -> Result<(), SchedulerError> {
        let candidate = self.registry.prepare(descriptors)?;
        if let Some(name) = self
            .dimensions_in_use()
            .into_iter()
            .find(|name| !candidate.contains(name))
        {
            return Err(ConfigError::ResourceTypeInUse(name).into());
        }
        let (minimum, maximum) = self.config.allocation_bounds(&candidate)?;
        let maximum: ResourceVector = candidate
            .names()
            .map(|name| (name, maximum.get(name).max(self.maximum_allocation.get(name))))
            .collect();

        let snapshot = self.registry.install(candidate);
        self.minimum_allocation = minimum;
        self.maximum_allocation = maximum;
        info!(
            "scheduler picked up resource types generation {}, maximum allocation is now {}",
            snapshot.generation(),
            self.maximum_allocation
        );
        Ok(())
    }

    fn dimensions_in_use(&self) -> BTreeSet<String> {
        let mut vectors = vec![
            &self.cluster_resource,
            self.queues.queue(QueueId::ROOT).used(),
        ];
        for attempt in self.applications.values().filter_map(SchedulerApplication::attempt) {
            vectors.push(attempt.am_resource());
            vectors.extend(attempt.requests().iter().map(|r| &r.capability));
        }
        vectors
            .into_iter()
            .flat_map(|v| v.iter().map(|(name, _)| name.to_string()))
            .collect()
    }

    /// Sets the minimum user limit percent of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QueueState`] if the queue does not exist or
    /// the percentage is out of range.
    pub fn set_user_limit(&mut self, queue: &str, percent: u32) -> Result<(), SchedulerError> {
        self.queues.set_user_limit(queue, percent)?;
        Ok(())
    }

    /// Sets the user limit factor of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QueueState`] if the queue does not exist or
    /// the factor is not positive.
    pub fn set_user_limit_factor(
        &mut self,
        queue: &str,
        factor: f64,
    ) -> Result<(), SchedulerError> {
        self.queues.set_user_limit_factor(queue, factor)?;
        Ok(())
    }

    /// Adds a leaf queue at runtime.
    ///
    /// The next [`Self::reinitialize`] replaces the tree with the configured one.
    ///
    /// # Errors
    ///
    /// See [`QueueHierarchy::add_queue`].
    pub fn add_queue(
        &mut self,
        parent: &str,
        name: &str,
        settings: QueueSettings,
    ) -> Result<(), SchedulerError> {
        self.queues.add_queue(parent, name, settings)?;
        Ok(())
    }

    /// Removes an idle leaf queue at runtime.
    ///
    /// # Errors
    ///
    /// See [`QueueHierarchy::remove_queue`].
    pub fn remove_queue(&mut self, name: &str) -> Result<(), SchedulerError> {
        self.queues.remove_queue(name)?;
        Ok(())
    }

    /// Gives the advertised maximum allocation.
    #[must_use]
    pub const fn maximum_resource_capability(&self) -> &ResourceVector {
        &self.maximum_allocation
    }

    /// Gives the registry's baseline maximum allocation.
    #[must_use]
    pub fn maximum_allocation(&self) -> ResourceVector {
        self.registry.maximum_allocation()
    }

    #[must_use]
    pub const fn minimum_allocation(&self) -> &ResourceVector {
        &self.minimum_allocation
    }

    #[must_use]
    pub const fn cluster_resource(&self) -> &ResourceVector {
        &self.cluster_resource
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub const fn queues(&self) -> &QueueHierarchy {
        &self.queues
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ResourceTypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn application(&self, id: ApplicationId) -> Option<&SchedulerApplication> {
        self.applications.get(&id)
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&SchedulerNode> {
        self.nodes.get(id)
    }

    /// Captures the current state for read-only queries.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            registry_generation: self.registry.snapshot().generation(),
            maximum_resource_capability: self.maximum_allocation.clone(),
            minimum_allocation: self.minimum_allocation.clone(),
            cluster_resource: self.cluster_resource.clone(),
            nodes: self.nodes.len(),
            queues: self.queues.usage_report(),
            applications: self
                .applications
                .iter()
                .map(|(id, app)| (*id, ApplicationUsage::from(app)))
                .collect(),
        }
    }
}

fn leaf_of(queues: &QueueHierarchy, app: &SchedulerApplication) -> Result<QueueId, QueueStateError> {
    let id = queues
        .queue_id(app.queue())
        .ok_or_else(|| QueueStateError::UnknownQueue(app.queue().to_string()))?;
    if !queues.queue(id).is_leaf() {
        return Err(QueueStateError::NotALeaf(app.queue().to_string()));
    }
    Ok(id)
}

fn release_from_queue(
    queues: &mut QueueHierarchy,
    app: &SchedulerApplication,
    capability: ResourceVector,
) -> Result<(), SchedulerError> {
    let queue_id = leaf_of(queues, app)?;
    queues.record_delta(queue_id, app.user(), &UsageDelta::Released(capability))?;
    Ok(())
}
