// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Defines the [`ResourceRequest`] type.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceVector;

/// Resource name of a request that may be placed on any node.
pub const ANY: &str = "*";

/// Priority of a request, lower values are served first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u32);

/// Request for a number of equally sized containers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub priority: Priority,
    /// Either [`ANY`] or the id of the node the containers should go to.
    pub resource_name: String,
    pub capability: ResourceVector,
    pub num_containers: u32,
}

impl ResourceRequest {
    /// Creates a request that may be placed on any node.
    #[must_use]
    pub fn new(priority: u32, capability: ResourceVector, num_containers: u32) -> Self {
        Self {
            priority: Priority(priority),
            resource_name: ANY.to_string(),
            capability,
            num_containers,
        }
    }

    /// Restricts the request to the given node.
    #[must_use]
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.resource_name = node.into();
        self
    }

    /// Returns `true` iff this request may be placed on the node with the given id.
    #[must_use]
    pub fn matches_node(&self, node: &str) -> bool {
        self.resource_name == ANY || self.resource_name == node
    }

    /// Returns `true` iff `other` targets the same request slot as `self`.
    ///
    /// Requests for the same slot replace each other.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.resource_name == other.resource_name
            && self.capability == other.capability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_matching() {
        let r = ResourceRequest::new(1, ResourceVector::of(1024, 1), 2);
        assert!(r.matches_node("host1"));
        let r = r.on_node("host1");
        assert!(r.matches_node("host1"));
        assert!(!r.matches_node("host2"));
    }

    #[test]
    fn slot_identity() {
        let a = ResourceRequest::new(1, ResourceVector::of(1024, 1), 2);
        let b = ResourceRequest::new(1, ResourceVector::of(1024, 1), 5);
        let c = ResourceRequest::new(2, ResourceVector::of(1024, 1), 2);
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
        assert!(!a.same_slot(&b.clone().on_node("host1")));
    }
}
