// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Events consumed and decisions emitted by the scheduler.

use serde::Serialize;

use crate::resource::ResourceVector;
use crate::types::{ApplicationId, AttemptId, ContainerId, NodeId, Priority};

/// Cluster events the scheduler reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A node joined the cluster.
    NodeAdded {
        node_id: NodeId,
        capability: ResourceVector,
    },
    /// A node left the cluster, all its containers are lost.
    NodeRemoved { node_id: NodeId },
    /// Heartbeat of a node, triggers an allocation pass on it.
    NodeUpdate {
        node_id: NodeId,
        reported_available: Option<ResourceVector>,
    },
    /// The total capability of a node changed.
    NodeResourceUpdate {
        node_id: NodeId,
        capability: ResourceVector,
    },
    AppAdded {
        application_id: ApplicationId,
        queue: String,
        user: String,
    },
    /// A new attempt whose application master needs `am_resource`.
    AppAttemptAdded {
        attempt_id: AttemptId,
        am_resource: ResourceVector,
    },
    AppAttemptRemoved { attempt_id: AttemptId },
    AppRemoved { application_id: ApplicationId },
    /// A single container finished.
    ContainerReleased { container_id: ContainerId },
}

impl SchedulerEvent {
    /// Gives a short name for logging and tracing.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NodeAdded { .. } => "node added",
            Self::NodeRemoved { .. } => "node removed",
            Self::NodeUpdate { .. } => "node update",
            Self::NodeResourceUpdate { .. } => "node resource update",
            Self::AppAdded { .. } => "app added",
            Self::AppAttemptAdded { .. } => "app attempt added",
            Self::AppAttemptRemoved { .. } => "app attempt removed",
            Self::AppRemoved { .. } => "app removed",
            Self::ContainerReleased { .. } => "container released",
        }
    }
}

/// Notification about a newly admitted container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerAllocation {
    /// Also serves as the token to launch the container with.
    pub container_id: ContainerId,
    pub application_id: ApplicationId,
    pub attempt_id: AttemptId,
    pub node_id: NodeId,
    pub capability: ResourceVector,
    pub priority: Priority,
}
