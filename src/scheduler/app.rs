// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Applications, their attempts and the containers they hold.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::resource::ResourceVector;
use crate::types::{ApplicationId, AttemptId, ContainerId, NodeId, Priority, ResourceRequest};

/// Lifecycle of an application attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    /// Waiting for its queue to admit another application master.
    Submitted,
    /// May receive containers.
    Running,
    /// Releasing its containers.
    Completing,
    Removed,
}

/// A container held by an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub node_id: NodeId,
    pub capability: ResourceVector,
    pub priority: Priority,
}

/// One attempt at running an application.
#[derive(Clone, Debug)]
pub struct SchedulerAttempt {
    id: AttemptId,
    state: AttemptState,
    am_resource: ResourceVector,
    consumption: ResourceVector,
    /// Outstanding requests ordered by priority.
    requests: Vec<ResourceRequest>,
    containers: BTreeMap<ContainerId, Container>,
    next_sequence: u64,
}

impl SchedulerAttempt {
    pub(super) fn new(id: AttemptId, am_resource: ResourceVector) -> Self {
        Self {
            id,
            state: AttemptState::Submitted,
            am_resource,
            consumption: ResourceVector::new(),
            requests: Vec::new(),
            containers: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> AttemptState {
        self.state
    }

    #[must_use]
    pub const fn am_resource(&self) -> &ResourceVector {
        &self.am_resource
    }

    /// Gives the resources held by all containers of this attempt.
    #[must_use]
    pub const fn consumption(&self) -> &ResourceVector {
        &self.consumption
    }

    #[must_use]
    pub fn requests(&self) -> &[ResourceRequest] {
        &self.requests
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Gives the total of all outstanding requests.
    #[must_use]
    pub fn pending(&self) -> ResourceVector {
        self.requests.iter().fold(ResourceVector::new(), |acc, r| {
            acc.add(&r.capability.multiply(u64::from(r.num_containers)))
        })
    }

    pub(super) fn set_state(&mut self, state: AttemptState) {
        self.state = state;
    }

    /// Merges new requests into the outstanding ones.
    ///
    /// A request replaces any outstanding request for the same priority,
    /// resource name and capability. A request for zero containers removes it.
    pub(super) fn update_requests(&mut self, requests: Vec<ResourceRequest>) {
        for request in requests {
            self.requests.retain(|r| !r.same_slot(&request));
            if request.num_containers > 0 {
                self.requests.push(request);
            }
        }
        // stable, so equal priorities keep their arrival order
        self.requests.sort_by_key(|r| r.priority);
    }

    /// Hands out one container for the request at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds or the request has no containers left.
    pub(super) fn allocate(&mut self, index: usize, node_id: NodeId) -> Container {
        let request = &mut self.requests[index];
        assert!(request.num_containers > 0, "request already satisfied");
        request.num_containers -= 1;
        let container = Container {
            id: ContainerId::new(self.id, self.next_sequence),
            node_id,
            capability: request.capability.clone(),
            priority: request.priority,
        };
        self.next_sequence += 1;
        self.consumption = self.consumption.add(&container.capability);
        self.containers.insert(container.id, container.clone());
        container
    }

    /// Drops all fully satisfied requests.
    pub(super) fn prune_requests(&mut self) {
        self.requests.retain(|r| r.num_containers > 0);
    }

    pub(super) fn release(&mut self, container: &ContainerId) -> Option<Container> {
        let container = self.containers.remove(container)?;
        self.consumption = self.consumption.subtract(&container.capability);
        Some(container)
    }

    /// Removes every container and outstanding request.
    pub(super) fn drain(&mut self) -> Vec<Container> {
        self.requests.clear();
        self.consumption = ResourceVector::new();
        std::mem::take(&mut self.containers).into_values().collect()
    }
}

/// A submitted application.
#[derive(Clone, Debug)]
pub struct SchedulerApplication {
    id: ApplicationId,
    /// Full path of the leaf queue.
    queue: String,
    user: String,
    attempt: Option<SchedulerAttempt>,
}

impl SchedulerApplication {
    pub(super) fn new(id: ApplicationId, queue: String, user: String) -> Self {
        Self {
            id,
            queue,
            user,
            attempt: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ApplicationId {
        self.id
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Gives the current attempt, if there is one.
    #[must_use]
    pub const fn attempt(&self) -> Option<&SchedulerAttempt> {
        self.attempt.as_ref()
    }

    pub(super) fn attempt_mut(&mut self) -> Option<&mut SchedulerAttempt> {
        self.attempt.as_mut()
    }

    pub(super) fn set_attempt(&mut self, attempt: Option<SchedulerAttempt>) {
        self.attempt = attempt;
    }

    /// Gives the current attempt if it has the given id.
    pub(super) fn attempt_with_id(&mut self, id: AttemptId) -> Option<&mut SchedulerAttempt> {
        self.attempt.as_mut().filter(|a| a.id == id)
    }
}

/// Read-only usage report of a single application.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApplicationUsage {
    pub queue: String,
    pub user: String,
    pub state: Option<AttemptState>,
    pub consumption: ResourceVector,
    pub pending: ResourceVector,
    pub containers: usize,
}

impl From<&SchedulerApplication> for ApplicationUsage {
    fn from(app: &SchedulerApplication) -> Self {
        let attempt = app.attempt();
        Self {
            queue: app.queue.clone(),
            user: app.user.clone(),
            state: attempt.map(SchedulerAttempt::state),
            consumption: attempt.map(|a| a.consumption.clone()).unwrap_or_default(),
            pending: attempt.map(SchedulerAttempt::pending).unwrap_or_default(),
            containers: attempt.map_or(0, |a| a.containers.len()),
        }
    }
}
