// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Defines the [`ResourceVector`] type.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::registry::RegistrySnapshot;
use super::{MEMORY, VCORES};

/// Errors raised when a vector is interpreted against a registry snapshot.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceVectorError {
    #[error("dimension `{dimension}` is not registered in resource types generation {generation}")]
    UnknownDimension { dimension: String, generation: u64 },
}

/// Quantities keyed by dimension name.
///
/// Any dimension that is not present is implicitly zero.
/// Zero entries are never stored, so two vectors are equal iff they hold the
/// same quantity in every dimension.
///
/// All arithmetic produces a new vector, vectors are never partially mutated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct ResourceVector(BTreeMap<String, u64>);

impl ResourceVector {
    /// Creates an empty (all-zero) vector.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Creates a vector holding only the two mandatory dimensions.
    #[must_use]
    pub fn of(memory_mb: u64, vcores: u64) -> Self {
        Self::new().with(MEMORY, memory_mb).with(VCORES, vcores)
    }

    /// Returns a copy of this vector with `dimension` set to `value`.
    #[must_use]
    pub fn with(mut self, dimension: impl Into<String>, value: u64) -> Self {
        let dimension = dimension.into();
        if value == 0 {
            self.0.remove(&dimension);
        } else {
            self.0.insert(dimension, value);
        }
        self
    }

    /// Gives the quantity in the given dimension.
    #[must_use]
    pub fn get(&self, dimension: &str) -> u64 {
        self.0.get(dimension).copied().unwrap_or(0)
    }

    /// Gives the memory quantity.
    #[must_use]
    pub fn memory_mb(&self) -> u64 {
        self.get(MEMORY)
    }

    /// Gives the virtual core quantity.
    #[must_use]
    pub fn vcores(&self) -> u64 {
        self.get(VCORES)
    }

    /// Iterates over all non-zero dimensions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Returns `true` iff at least one dimension is non-zero.
    #[must_use]
    pub fn is_any_non_zero(&self) -> bool {
        !self.0.is_empty()
    }

    /// Returns `true` iff every dimension is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Component-wise sum.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn add(&self, other: &Self) -> Self {
        self.combine(other, u64::saturating_add)
    }

    /// Component-wise difference, saturating at zero in every dimension.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        self.combine(other, u64::saturating_sub)
    }

    /// Component-wise minimum.
    #[must_use]
    pub fn component_min(&self, other: &Self) -> Self {
        self.combine(other, u64::min)
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn component_max(&self, other: &Self) -> Self {
        self.combine(other, u64::max)
    }

    /// Scales every dimension by `factor`, saturating at `u64::MAX`.
    #[must_use]
    pub fn multiply(&self, factor: u64) -> Self {
        self.map(|value| value.saturating_mul(factor))
    }

    /// Scales every dimension by `fraction`, rounding down.
    ///
    /// Negative or NaN fractions yield the zero vector.
    #[must_use]
    pub fn multiply_by_fraction(&self, fraction: f64) -> Self {
        if fraction.is_nan() || fraction <= 0.0 {
            return Self::new();
        }
        self.map(|value| (value as f64 * fraction).floor() as u64)
    }

    /// Divides every dimension by `divisor`, rounding up.
    ///
    /// # Panics
    ///
    /// Panics if `divisor` is zero.
    #[must_use]
    pub fn divide_and_ceil(&self, divisor: u64) -> Self {
        assert!(divisor > 0, "cannot divide resources by zero");
        self.map(|value| value.div_ceil(divisor))
    }

    /// Returns `true` iff every dimension of `self` is at most the one in `other`.
    #[must_use]
    pub fn fits_in(&self, other: &Self) -> bool {
        self.0.iter().all(|(name, value)| *value <= other.get(name))
    }

    /// Checks that every non-zero dimension is registered in `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError::UnknownDimension`] for the first dimension
    /// the snapshot does not know.
    pub fn validate_against(&self, snapshot: &RegistrySnapshot) -> Result<(), ResourceVectorError> {
        match self.0.keys().find(|name| !snapshot.contains(name)) {
            Some(name) => Err(ResourceVectorError::UnknownDimension {
                dimension: name.clone(),
                generation: snapshot.generation(),
            }),
            None => Ok(()),
        }
    }

    /// Gives the share of `reference` this vector occupies in each dimension.
    ///
    /// Shares are ordered like the dimensions in `snapshot`.
    /// A zero quantity has share 0. A non-zero quantity in a dimension where
    /// `reference` is zero has share `+inf`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if either vector names a dimension that
    /// is not registered in `snapshot`.
    pub fn shares(
        &self,
        snapshot: &RegistrySnapshot,
        reference: &Self,
    ) -> Result<Vec<f64>, ResourceVectorError> {
        self.validate_against(snapshot)?;
        reference.validate_against(snapshot)?;
        Ok(snapshot
            .names()
            .map(|name| share(self.get(name), reference.get(name)))
            .collect())
    }

    /// Gives the largest per-dimension share of `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if either vector names a dimension that
    /// is not registered in `snapshot`.
    pub fn dominant_share(
        &self,
        snapshot: &RegistrySnapshot,
        reference: &Self,
    ) -> Result<f64, ResourceVectorError> {
        let shares = self.shares(snapshot, reference)?;
        Ok(shares.into_iter().fold(0.0, f64::max))
    }

    /// Raises every registered dimension to its minimum, rounds it up to a
    /// multiple of that minimum and caps it at its maximum.
    #[must_use]
    pub fn normalize(&self, snapshot: &RegistrySnapshot, minimum: &Self, maximum: &Self) -> Self {
        let mut normalized = self.clone();
        for name in snapshot.names() {
            let step = minimum.get(name);
            let mut value = self.get(name).max(step);
            if step > 0 {
                value = value.div_ceil(step).saturating_mul(step);
            }
            if let Some(max) = maximum.0.get(name) {
                value = value.min(*max);
            }
            normalized = normalized.with(name, value);
        }
        normalized
    }

    fn map(&self, f: impl Fn(u64) -> u64) -> Self {
        Self(
            self.0
                .iter()
                .map(|(name, value)| (name.clone(), f(*value)))
                .filter(|(_, value)| *value > 0)
                .collect(),
        )
    }

    fn combine(&self, other: &Self, f: impl Fn(u64, u64) -> u64) -> Self {
        let mut result = BTreeMap::new();
        for name in self.0.keys().chain(other.0.keys()) {
            if result.contains_key(name) {
                continue;
            }
            let value = f(self.get(name), other.get(name));
            if value > 0 {
                result.insert(name.clone(), value);
            }
        }
        Self(result)
    }
}

fn share(value: u64, reference: u64) -> f64 {
    match (value, reference) {
        (0, _) => 0.0,
        (_, 0) => f64::INFINITY,
        (value, reference) => value as f64 / reference as f64,
    }
}

impl From<BTreeMap<String, u64>> for ResourceVector {
    fn from(map: BTreeMap<String, u64>) -> Self {
        Self(map.into_iter().filter(|(_, value)| *value > 0).collect())
    }
}

impl From<ResourceVector> for BTreeMap<String, u64> {
    fn from(vector: ResourceVector) -> Self {
        vector.0
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for ResourceVector {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |vector, (name, value)| vector.with(name, value))
    }
}

impl Display for ResourceVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}:{value}")?;
        }
        write!(f, ">")
    }
}
