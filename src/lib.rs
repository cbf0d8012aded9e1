// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! capsched: Hierarchical Multi-Dimensional Capacity Scheduler
//!
//! Shares a cluster's resources among a tree of queues. Every resource is a
//! vector over an open-ended set of named dimensions, beyond memory and
//! virtual cores. Queues get guaranteed and maximum shares of the cluster,
//! users get fair limits within their queue, and containers are admitted on
//! node heartbeats under dominant resource fairness.
//!
//! The main entry points are:
//! - [`ResourceTypeRegistry`] for the catalog of known dimensions.
//! - [`SchedulerConfig`] for queues and allocation bounds.
//! - [`CapacityScheduler`] for the event-driven scheduler itself.
//! - [`SchedulerService`] for running a scheduler on its own task.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod logging;
pub mod queue;
pub mod resource;
pub mod scheduler;
#[cfg(test)]
pub mod test_utils;
pub mod types;

pub use self::config::{ConfigError, SchedulerConfig};
pub use self::resource::{ResourceTypeRegistry, ResourceVector};
pub use self::scheduler::{
    CapacityScheduler, SchedulerError, SchedulerEvent, SchedulerHandle, SchedulerService,
};
