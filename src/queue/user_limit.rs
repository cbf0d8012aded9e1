// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-user resource ceilings within a leaf queue.
//!
//! Every step of the computation works on whole resource vectors, so a
//! user's ceiling in an extended dimension scales with the same fraction as
//! memory and cores.

use log::trace;

use super::{QueueHierarchy, QueueId};
use crate::resource::{RegistrySnapshot, ResourceCalculator, ResourceVector, ResourceVectorError};

/// Computes user limits under a given calculator and registry snapshot.
#[derive(Clone, Copy, Debug)]
pub struct UserLimitCalculator<'a> {
    calculator: &'a dyn ResourceCalculator,
    snapshot: &'a RegistrySnapshot,
}

impl<'a> UserLimitCalculator<'a> {
    #[must_use]
    pub const fn new(calculator: &'a dyn ResourceCalculator, snapshot: &'a RegistrySnapshot) -> Self {
        Self {
            calculator,
            snapshot,
        }
    }

    /// Gives the most resources `user` may hold in the leaf queue `id`.
    ///
    /// `required` is the size of the container about to be placed, it lets a
    /// queue that is already at its guarantee grow toward its maximum.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if any vector names a dimension the
    /// snapshot does not know.
    pub fn compute_user_limit(
        &self,
        queues: &QueueHierarchy,
        id: QueueId,
        user: &str,
        cluster: &ResourceVector,
        required: &ResourceVector,
    ) -> Result<ResourceVector, ResourceVectorError> {
        let queue = queues.queue(id);
        let settings = queue.settings();
        let queue_capacity = queues.guaranteed(id, cluster);

        let current_capacity = if self
            .calculator
            .compare(self.snapshot, cluster, queue.used(), &queue_capacity)?
            .is_lt()
        {
            queue_capacity.clone()
        } else {
            queue.used().add(required)
        };

        let active_users = queue.active_user_count().max(1) as u64;
        let equal_share = current_capacity.divide_and_ceil(active_users);
        let floor = current_capacity.multiply_by_fraction(f64::from(settings.user_limit_percent) / 100.0);
        let limit = self.calculator.max(self.snapshot, cluster, &equal_share, &floor)?;

        let cap = queue_capacity
            .multiply_by_fraction(settings.user_limit_factor)
            .component_min(&queues.maximum(id, cluster));
        let limit = self.calculator.min(self.snapshot, cluster, &limit, &cap)?;

        trace!(
            "user limit for {user} in {}: {limit} ({active_users} active users)",
            queue.path()
        );
        Ok(limit)
    }

    /// Returns `true` iff `user` may take `required` more resources in queue `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if any vector names a dimension the
    /// snapshot does not know.
    pub fn can_assign_to_user(
        &self,
        queues: &QueueHierarchy,
        id: QueueId,
        user: &str,
        cluster: &ResourceVector,
        required: &ResourceVector,
    ) -> Result<bool, ResourceVectorError> {
        let limit = self.compute_user_limit(queues, id, user, cluster, required)?;
        let after = queues.queue(id).used_by_user(user).add(required);
        self.calculator
            .fits_within_limit(self.snapshot, cluster, &after, &limit)
    }
}
