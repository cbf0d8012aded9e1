// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Defines the [`SchedulerNode`] type.

use std::collections::BTreeMap;

use crate::resource::ResourceVector;
use crate::types::{ContainerId, NodeId};

/// Scheduler-side view of a cluster node.
#[derive(Clone, Debug)]
pub struct SchedulerNode {
    id: NodeId,
    total: ResourceVector,
    allocated: ResourceVector,
    /// Availability the node last reported about itself, if any.
    reported_available: Option<ResourceVector>,
    containers: BTreeMap<ContainerId, ResourceVector>,
}

impl SchedulerNode {
    #[must_use]
    pub fn new(id: NodeId, total: ResourceVector) -> Self {
        Self {
            id,
            total,
            allocated: ResourceVector::new(),
            reported_available: None,
            containers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub const fn total(&self) -> &ResourceVector {
        &self.total
    }

    #[must_use]
    pub const fn allocated(&self) -> &ResourceVector {
        &self.allocated
    }

    /// Gives what is still free on this node.
    ///
    /// This is the total minus all tracked containers, further limited by
    /// the node's own report if it sent one.
    #[must_use]
    pub fn available(&self) -> ResourceVector {
        let tracked = self.total.subtract(&self.allocated);
        match &self.reported_available {
            Some(reported) => tracked.component_min(reported),
            None => tracked,
        }
    }

    /// Iterates over all containers running on this node.
    pub fn containers(&self) -> impl Iterator<Item = (&ContainerId, &ResourceVector)> {
        self.containers.iter()
    }

    /// Replaces the node's own report and gives back the previous one.
    pub(super) fn set_reported_available(
        &mut self,
        reported: Option<ResourceVector>,
    ) -> Option<ResourceVector> {
        std::mem::replace(&mut self.reported_available, reported)
    }

    pub(super) fn set_total(&mut self, total: ResourceVector) {
        self.total = total;
    }

    /// Places a container on this node.
    ///
    /// A reported availability shrinks as well and stays that way until the
    /// next report replaces it.
    pub(super) fn allocate(&mut self, container: ContainerId, capability: ResourceVector) {
        self.allocated = self.allocated.add(&capability);
        if let Some(reported) = &mut self.reported_available {
            *reported = reported.subtract(&capability);
        }
        self.containers.insert(container, capability);
    }

    pub(super) fn release(&mut self, container: &ContainerId) -> Option<ResourceVector> {
        let capability = self.containers.remove(container)?;
        self.allocated = self.allocated.subtract(&capability);
        Some(capability)
    }
}
