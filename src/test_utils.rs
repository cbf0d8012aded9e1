// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for tests.

use crate::resource::{ResourceTypeDescriptor, ResourceTypeRegistry, ResourceVector};
use crate::scheduler::{CapacityScheduler, SchedulerEvent};
use crate::types::{ApplicationId, AttemptId};

/// One gigabyte, in the units of the memory dimension.
pub const GB: u64 = 1024;

/// Cluster timestamp shared by all test identifiers.
const CLUSTER_TIMESTAMP: u64 = 1_700_000_000_000;

/// Creates a registry with the default mandatory dimensions plus the given
/// `(name, minimum, maximum)` countable dimensions.
///
/// # Panics
///
/// Panics if the extra dimensions are invalid.
#[must_use]
pub fn registry_with(extra: &[(&str, u64, u64)]) -> ResourceTypeRegistry {
    let mut descriptors = ResourceTypeDescriptor::mandatory_defaults();
    descriptors.extend(
        extra
            .iter()
            .map(|&(name, min, max)| ResourceTypeDescriptor::countable(name, "", min, max)),
    );
    ResourceTypeRegistry::initialize(descriptors).unwrap()
}

#[must_use]
pub const fn app_id(id: u32) -> ApplicationId {
    ApplicationId::new(CLUSTER_TIMESTAMP, id)
}

/// Gives the first attempt of application `id`.
#[must_use]
pub const fn attempt_id(id: u32) -> AttemptId {
    AttemptId::new(app_id(id), 1)
}

/// Submits application `id` and its first attempt with no AM resource.
///
/// # Panics
///
/// Panics if the scheduler rejects either event.
pub fn submit(scheduler: &mut CapacityScheduler, id: u32, queue: &str, user: &str) {
    scheduler
        .handle(SchedulerEvent::AppAdded {
            application_id: app_id(id),
            queue: queue.to_string(),
            user: user.to_string(),
        })
        .unwrap();
    scheduler
        .handle(SchedulerEvent::AppAttemptAdded {
            attempt_id: attempt_id(id),
            am_resource: ResourceVector::new(),
        })
        .unwrap();
}
