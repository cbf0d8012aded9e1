// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable strategies for ordering resource vectors.
//!
//! Every ordering is relative to a reference vector (usually the cluster's
//! total capacity), which normalizes dimensions of different units.
//! [`DominantResourceCalculator`] looks at every registered dimension,
//! [`DefaultResourceCalculator`] only looks at memory.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::RegistrySnapshot;
use super::vector::{ResourceVector, ResourceVectorError};
use super::MEMORY;

/// Strategy deciding how resource vectors compare.
pub trait ResourceCalculator: Debug + Send + Sync {
    /// Orders `lhs` relative to `rhs`, normalized by `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if any vector names a dimension the
    /// snapshot does not know.
    fn compare(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        lhs: &ResourceVector,
        rhs: &ResourceVector,
    ) -> Result<Ordering, ResourceVectorError>;

    /// Gives how often `required` fits into `available`.
    ///
    /// Returns `u64::MAX` if `required` is empty in every considered dimension.
    fn compute_available_containers(
        &self,
        snapshot: &RegistrySnapshot,
        available: &ResourceVector,
        required: &ResourceVector,
    ) -> u64;

    /// Gives the size of `numerator` relative to `denominator` as a single number.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if any vector names a dimension the
    /// snapshot does not know.
    fn ratio(
        &self,
        snapshot: &RegistrySnapshot,
        numerator: &ResourceVector,
        denominator: &ResourceVector,
    ) -> Result<f64, ResourceVectorError>;

    /// Gives whichever of `lhs` and `rhs` is larger, preferring `lhs` on ties.
    ///
    /// # Errors
    ///
    /// See [`ResourceCalculator::compare`].
    fn max(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        lhs: &ResourceVector,
        rhs: &ResourceVector,
    ) -> Result<ResourceVector, ResourceVectorError> {
        Ok(match self.compare(snapshot, cluster, lhs, rhs)? {
            Ordering::Less => rhs.clone(),
            _ => lhs.clone(),
        })
    }

    /// Gives whichever of `lhs` and `rhs` is smaller, preferring `lhs` on ties.
    ///
    /// # Errors
    ///
    /// See [`ResourceCalculator::compare`].
    fn min(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        lhs: &ResourceVector,
        rhs: &ResourceVector,
    ) -> Result<ResourceVector, ResourceVectorError> {
        Ok(match self.compare(snapshot, cluster, lhs, rhs)? {
            Ordering::Greater => rhs.clone(),
            _ => lhs.clone(),
        })
    }

    /// Returns `true` iff `value` does not compare greater than `limit`.
    ///
    /// # Errors
    ///
    /// See [`ResourceCalculator::compare`].
    fn fits_within_limit(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        value: &ResourceVector,
        limit: &ResourceVector,
    ) -> Result<bool, ResourceVectorError> {
        Ok(self.compare(snapshot, cluster, value, limit)? != Ordering::Greater)
    }
}

/// Orders vectors by dominant share.
///
/// The dominant share is the largest fraction of the cluster a vector takes
/// in any single dimension. Ties are broken by the sum of all shares, then by
/// comparing shares dimension by dimension in registry priority order.
#[derive(Clone, Copy, Debug, Default)]
pub struct DominantResourceCalculator;

impl ResourceCalculator for DominantResourceCalculator {
    fn compare(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        lhs: &ResourceVector,
        rhs: &ResourceVector,
    ) -> Result<Ordering, ResourceVectorError> {
        if lhs == rhs {
            cluster.validate_against(snapshot)?;
            lhs.validate_against(snapshot)?;
            return Ok(Ordering::Equal);
        }
        let lhs_shares = lhs.shares(snapshot, cluster)?;
        let rhs_shares = rhs.shares(snapshot, cluster)?;

        let dominant = |shares: &[f64]| shares.iter().copied().fold(0.0, f64::max);
        let total = |shares: &[f64]| shares.iter().sum::<f64>();

        let ordering = dominant(&lhs_shares)
            .total_cmp(&dominant(&rhs_shares))
            .then_with(|| total(&lhs_shares).total_cmp(&total(&rhs_shares)))
            .then_with(|| {
                lhs_shares
                    .iter()
                    .zip(&rhs_shares)
                    .map(|(l, r)| l.total_cmp(r))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        Ok(ordering)
    }

    fn compute_available_containers(
        &self,
        snapshot: &RegistrySnapshot,
        available: &ResourceVector,
        required: &ResourceVector,
    ) -> u64 {
        snapshot
            .names()
            .filter_map(|name| match required.get(name) {
                0 => None,
                r => Some(available.get(name) / r),
            })
            .min()
            .unwrap_or(u64::MAX)
    }

    fn ratio(
        &self,
        snapshot: &RegistrySnapshot,
        numerator: &ResourceVector,
        denominator: &ResourceVector,
    ) -> Result<f64, ResourceVectorError> {
        numerator.dominant_share(snapshot, denominator)
    }
}

/// Orders vectors by memory alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResourceCalculator;

impl ResourceCalculator for DefaultResourceCalculator {
    fn compare(
        &self,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
        lhs: &ResourceVector,
        rhs: &ResourceVector,
    ) -> Result<Ordering, ResourceVectorError> {
        cluster.validate_against(snapshot)?;
        lhs.validate_against(snapshot)?;
        rhs.validate_against(snapshot)?;
        Ok(lhs.get(MEMORY).cmp(&rhs.get(MEMORY)))
    }

    fn compute_available_containers(
        &self,
        _snapshot: &RegistrySnapshot,
        available: &ResourceVector,
        required: &ResourceVector,
    ) -> u64 {
        match required.get(MEMORY) {
            0 => u64::MAX,
            r => available.get(MEMORY) / r,
        }
    }

    fn ratio(
        &self,
        snapshot: &RegistrySnapshot,
        numerator: &ResourceVector,
        denominator: &ResourceVector,
    ) -> Result<f64, ResourceVectorError> {
        numerator.validate_against(snapshot)?;
        denominator.validate_against(snapshot)?;
        Ok(match (numerator.get(MEMORY), denominator.get(MEMORY)) {
            (0, _) => 0.0,
            (_, 0) => f64::INFINITY,
            (n, d) => n as f64 / d as f64,
        })
    }
}

/// Configurable choice of [`ResourceCalculator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculatorKind {
    #[default]
    Dominant,
    Default,
}

impl CalculatorKind {
    /// Instantiates the selected calculator.
    #[must_use]
    pub fn build(self) -> Arc<dyn ResourceCalculator> {
        match self {
            Self::Dominant => Arc::new(DominantResourceCalculator),
            Self::Default => Arc::new(DefaultResourceCalculator),
        }
    }
}
