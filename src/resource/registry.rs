// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide catalog of resource dimensions.
//!
//! The registry is built once at process start. Readers take an immutable
//! [`RegistrySnapshot`] without locking. Only an explicit administrative
//! [`ResourceTypeRegistry::reinitialize`] call replaces the snapshot, and it
//! does so atomically with a single pointer swap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::info;
use serde::{Deserialize, Serialize};

use super::{MEMORY, ResourceVector, VCORES};
use crate::config::ConfigError;

/// Units the memory dimension must be expressed in.
pub const MEMORY_UNITS: &str = "Mi";
/// Default smallest memory allocation.
pub const DEFAULT_MINIMUM_ALLOCATION_MB: u64 = 1024;
/// Default largest memory allocation.
pub const DEFAULT_MAXIMUM_ALLOCATION_MB: u64 = 8192;
/// Default smallest virtual core allocation.
pub const DEFAULT_MINIMUM_ALLOCATION_VCORES: u64 = 1;
/// Default largest virtual core allocation.
pub const DEFAULT_MAXIMUM_ALLOCATION_VCORES: u64 = 4;

/// How quantities of a dimension are measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Countable,
}

/// Definition of a single resource dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeDescriptor {
    pub name: String,
    pub units: String,
    pub kind: ResourceKind,
    pub minimum_allocation: u64,
    pub maximum_allocation: u64,
}

impl ResourceTypeDescriptor {
    /// Creates a descriptor for the mandatory memory dimension.
    #[must_use]
    pub fn memory(minimum_allocation: u64, maximum_allocation: u64) -> Self {
        Self::countable(MEMORY, MEMORY_UNITS, minimum_allocation, maximum_allocation)
    }

    /// Creates a descriptor for the mandatory virtual core dimension.
    #[must_use]
    pub fn vcores(minimum_allocation: u64, maximum_allocation: u64) -> Self {
        Self::countable(VCORES, "", minimum_allocation, maximum_allocation)
    }

    /// Creates a descriptor for an arbitrary countable dimension.
    #[must_use]
    pub fn countable(
        name: impl Into<String>,
        units: impl Into<String>,
        minimum_allocation: u64,
        maximum_allocation: u64,
    ) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            kind: ResourceKind::Countable,
            minimum_allocation,
            maximum_allocation,
        }
    }

    /// Gives the default descriptors of the two mandatory dimensions.
    #[must_use]
    pub fn mandatory_defaults() -> Vec<Self> {
        vec![
            Self::memory(DEFAULT_MINIMUM_ALLOCATION_MB, DEFAULT_MAXIMUM_ALLOCATION_MB),
            Self::vcores(
                DEFAULT_MINIMUM_ALLOCATION_VCORES,
                DEFAULT_MAXIMUM_ALLOCATION_VCORES,
            ),
        ]
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyResourceTypeName);
        }
        if self.minimum_allocation > self.maximum_allocation {
            return Err(ConfigError::InvalidAllocationBounds {
                name: self.name.clone(),
                minimum: self.minimum_allocation,
                maximum: self.maximum_allocation,
            });
        }
        let expected_units = match self.name.as_str() {
            MEMORY => Some(MEMORY_UNITS),
            VCORES => Some(""),
            _ => None,
        };
        match expected_units {
            Some(expected) if self.units != expected => Err(ConfigError::InvalidUnits {
                name: self.name.clone(),
                expected: expected.to_string(),
                found: self.units.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Immutable, versioned set of resource dimensions.
///
/// Dimensions are ordered by priority: memory, virtual cores, then every
/// other dimension in registration order.
#[derive(Clone, Debug)]
pub struct RegistrySnapshot {
    generation: u64,
    descriptors: Vec<ResourceTypeDescriptor>,
    index: HashMap<String, usize>,
}

impl RegistrySnapshot {
    fn build(generation: u64, descriptors: Vec<ResourceTypeDescriptor>) -> Result<Self, ConfigError> {
        let mut mandatory = [None, None];
        let mut extended = Vec::new();
        let mut seen = HashSet::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.clone()) {
                return Err(ConfigError::DuplicateResourceType(descriptor.name));
            }
            match descriptor.name.as_str() {
                MEMORY => mandatory[0] = Some(descriptor),
                VCORES => mandatory[1] = Some(descriptor),
                _ => extended.push(descriptor),
            }
        }
        let [memory, vcores] = mandatory;
        let memory = memory.ok_or_else(|| ConfigError::MissingMandatoryResource(MEMORY.into()))?;
        let vcores = vcores.ok_or_else(|| ConfigError::MissingMandatoryResource(VCORES.into()))?;

        let mut ordered = vec![memory, vcores];
        ordered.extend(extended);
        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Ok(Self {
            generation,
            descriptors: ordered,
            index,
        })
    }

    /// Gives the generation of this snapshot, starting at 0.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Gives all descriptors in priority order.
    #[must_use]
    pub fn descriptors(&self) -> &[ResourceTypeDescriptor] {
        &self.descriptors
    }

    /// Gives the descriptor of the given dimension, if it is registered.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ResourceTypeDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Returns `true` iff the given dimension is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates over dimension names in priority order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Gives the number of registered dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` iff no dimension is registered (never the case for a built snapshot).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Gives the per-dimension minimum allocation.
    #[must_use]
    pub fn minimum_allocation(&self) -> ResourceVector {
        self.descriptors
            .iter()
            .map(|d| (d.name.as_str(), d.minimum_allocation))
            .collect()
    }

    /// Gives the per-dimension maximum allocation.
    #[must_use]
    pub fn maximum_allocation(&self) -> ResourceVector {
        self.descriptors
            .iter()
            .map(|d| (d.name.as_str(), d.maximum_allocation))
            .collect()
    }
}

/// Owner of the active [`RegistrySnapshot`].
///
/// Writers are serialized by the scheduler that owns the registry,
/// readers may load the snapshot from any thread at any time.
#[derive(Debug)]
pub struct ResourceTypeRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl ResourceTypeRegistry {
    /// Builds the registry from the given descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any descriptor is invalid, a name is
    /// duplicated or a mandatory dimension is missing or uses the wrong units.
    pub fn initialize(descriptors: Vec<ResourceTypeDescriptor>) -> Result<Self, ConfigError> {
        let snapshot = RegistrySnapshot::build(0, descriptors)?;
        info!(
            "initialized {} resource types: {}",
            snapshot.len(),
            snapshot.maximum_allocation()
        );
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// Gives the currently active snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Replaces the active snapshot if `descriptors` are internally valid.
    ///
    /// This does not check the new set against values a running scheduler has in use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] under the same conditions as [`Self::initialize`].
    /// The active snapshot is left unchanged in that case.
    pub fn reinitialize(
        &self,
        descriptors: Vec<ResourceTypeDescriptor>,
    ) -> Result<Arc<RegistrySnapshot>, ConfigError> {
        let snapshot = self.prepare(descriptors)?;
        Ok(self.install(snapshot))
    }

    /// Builds the snapshot [`Self::reinitialize`] would install, without installing it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] under the same conditions as [`Self::initialize`].
    pub fn prepare(
        &self,
        descriptors: Vec<ResourceTypeDescriptor>,
    ) -> Result<RegistrySnapshot, ConfigError> {
        RegistrySnapshot::build(self.current.load().generation + 1, descriptors)
    }

    /// Makes a prepared snapshot the active one.
    pub fn install(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));
        info!(
            "resource types reinitialized to generation {}: {}",
            snapshot.generation,
            snapshot.maximum_allocation()
        );
        snapshot
    }

    /// Gives the baseline maximum allocation of the active snapshot.
    #[must_use]
    pub fn maximum_allocation(&self) -> ResourceVector {
        self.current.load().maximum_allocation()
    }

    /// Gives the baseline minimum allocation of the active snapshot.
    #[must_use]
    pub fn minimum_allocation(&self) -> ResourceVector {
        self.current.load().minimum_allocation()
    }
}
