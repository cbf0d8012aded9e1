// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scheduler configuration.
//!
//! A [`SchedulerConfig`] is read from TOML. It declares per-dimension
//! allocation bounds, the resource calculator, and the queue tree.
//!
//! # Examples
//!
//! ```
//! use capsched::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_toml_str(r#"
//!     resource_calculator = "dominant"
//!
//!     [[resource_types]]
//!     name = "res_1"
//!     maximum_allocation = 3333
//!
//!     [[queues]]
//!     path = "root"
//!
//!     [[queues]]
//!     path = "root.default"
//!     capacity = 100.0
//! "#).unwrap();
//! assert_eq!(config.queues.len(), 2);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{QueueHierarchy, QueueSettings, QueueState, QueueStateError};
use crate::resource::{
    CalculatorKind, MEMORY, RegistrySnapshot, ResourceTypeDescriptor, ResourceVector, VCORES,
};

/// Path of the root queue.
pub const ROOT_QUEUE: &str = "root";
/// Default number of applications a leaf queue accepts.
pub const DEFAULT_MAXIMUM_APPLICATIONS: usize = 10_000;
/// Default share of a queue that application masters may take, in percent.
pub const DEFAULT_MAXIMUM_AM_RESOURCE_PERCENT: f64 = 10.0;

/// Errors raised while loading or validating configuration.
///
/// Whenever one of these is returned for a reconfiguration, the active
/// configuration is left completely unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("resource type name must not be empty")]
    EmptyResourceTypeName,
    #[error("resource type `{name}` has minimum allocation {minimum} above maximum {maximum}")]
    InvalidAllocationBounds {
        name: String,
        minimum: u64,
        maximum: u64,
    },
    #[error("mandatory resource type `{0}` is missing")]
    MissingMandatoryResource(String),
    #[error("resource type `{name}` must use units `{expected}`, found `{found}`")]
    InvalidUnits {
        name: String,
        expected: String,
        found: String,
    },
    #[error("resource type `{0}` is declared more than once")]
    DuplicateResourceType(String),
    #[error("resource type `{0}` is not registered")]
    UnregisteredResourceType(String),
    #[error("resource type `{0}` is still in use and cannot be unregistered")]
    ResourceTypeInUse(String),
    #[error("maximum allocation of `{name}` cannot decrease from {current} to {proposed}")]
    MaximumAllocationDecreased {
        name: String,
        current: u64,
        proposed: u64,
    },
    #[error("root queue `{ROOT_QUEUE}` is not declared")]
    MissingRootQueue,
    #[error("queue path `{0}` is invalid")]
    InvalidQueuePath(String),
    #[error("queue `{0}` is declared more than once")]
    DuplicateQueue(String),
    #[error("queue `{queue}` has undeclared parent `{parent}`")]
    UnknownParent { queue: String, parent: String },
    #[error("leaf queue name `{0}` is used more than once")]
    AmbiguousLeafName(String),
    #[error("children of `{parent}` sum to {total}% capacity")]
    ChildCapacityExceeded { parent: String, total: f64 },
    #[error("invalid setting for queue `{queue}`: {reason}")]
    InvalidQueueSetting { queue: String, reason: String },
    #[error(transparent)]
    QueueState(#[from] QueueStateError),
}

/// Allocation bounds for a single resource dimension.
///
/// Anything left out falls back to the registry's value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceTypeConfig {
    pub name: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub minimum_allocation: Option<u64>,
    #[serde(default)]
    pub maximum_allocation: Option<u64>,
}

/// Settings of one queue, addressed by its full dotted path.
///
/// Percentages are relative to the parent queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub path: String,
    #[serde(default)]
    pub capacity: f64,
    #[serde(default = "default_percent")]
    pub maximum_capacity: f64,
    #[serde(default = "default_user_limit_percent")]
    pub user_limit_percent: u32,
    #[serde(default = "default_user_limit_factor")]
    pub user_limit_factor: f64,
    #[serde(default = "default_am_percent")]
    pub maximum_am_resource_percent: f64,
    #[serde(default = "default_maximum_applications")]
    pub maximum_applications: usize,
    #[serde(default)]
    pub state: QueueState,
}

const fn default_percent() -> f64 {
    100.0
}

const fn default_user_limit_percent() -> u32 {
    100
}

const fn default_user_limit_factor() -> f64 {
    1.0
}

const fn default_am_percent() -> f64 {
    DEFAULT_MAXIMUM_AM_RESOURCE_PERCENT
}

const fn default_maximum_applications() -> usize {
    DEFAULT_MAXIMUM_APPLICATIONS
}

impl QueueConfig {
    /// Creates a queue with the given capacity and default settings.
    #[must_use]
    pub fn new(path: impl Into<String>, capacity: f64) -> Self {
        Self {
            path: path.into(),
            capacity,
            maximum_capacity: default_percent(),
            user_limit_percent: default_user_limit_percent(),
            user_limit_factor: default_user_limit_factor(),
            maximum_am_resource_percent: default_am_percent(),
            maximum_applications: default_maximum_applications(),
            state: QueueState::Running,
        }
    }

    /// Sets the maximum capacity in percent of the parent.
    #[must_use]
    pub const fn with_maximum_capacity(mut self, percent: f64) -> Self {
        self.maximum_capacity = percent;
        self
    }

    /// Sets the minimum user limit percent.
    #[must_use]
    pub const fn with_user_limit_percent(mut self, percent: u32) -> Self {
        self.user_limit_percent = percent;
        self
    }

    /// Sets the user limit factor.
    #[must_use]
    pub const fn with_user_limit_factor(mut self, factor: f64) -> Self {
        self.user_limit_factor = factor;
        self
    }

    /// Sets the share of the queue application masters may take, in percent.
    #[must_use]
    pub const fn with_maximum_am_resource_percent(mut self, percent: f64) -> Self {
        self.maximum_am_resource_percent = percent;
        self
    }

    /// Sets the maximum number of applications.
    #[must_use]
    pub const fn with_maximum_applications(mut self, limit: usize) -> Self {
        self.maximum_applications = limit;
        self
    }

    /// Sets the queue state.
    #[must_use]
    pub const fn with_state(mut self, state: QueueState) -> Self {
        self.state = state;
        self
    }

    /// Validates ranges and converts percentages into fractions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidQueueSetting`] for any out-of-range value.
    pub fn settings(&self) -> Result<QueueSettings, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidQueueSetting {
            queue: self.path.clone(),
            reason,
        };
        let percent_ok = |p: f64| (0.0..=100.0).contains(&p);
        if !percent_ok(self.capacity) {
            return Err(invalid(format!("capacity {} not in [0, 100]", self.capacity)));
        }
        if !percent_ok(self.maximum_capacity) {
            return Err(invalid(format!(
                "maximum capacity {} not in [0, 100]",
                self.maximum_capacity
            )));
        }
        if self.maximum_capacity < self.capacity {
            return Err(invalid(format!(
                "maximum capacity {} below capacity {}",
                self.maximum_capacity, self.capacity
            )));
        }
        if self.user_limit_percent == 0 || self.user_limit_percent > 100 {
            return Err(invalid(format!(
                "user limit percent {} not in (0, 100]",
                self.user_limit_percent
            )));
        }
        if self.user_limit_factor.is_nan() || self.user_limit_factor <= 0.0 {
            return Err(invalid(format!(
                "user limit factor {} must be positive",
                self.user_limit_factor
            )));
        }
        if !percent_ok(self.maximum_am_resource_percent) {
            return Err(invalid(format!(
                "maximum AM resource percent {} not in [0, 100]",
                self.maximum_am_resource_percent
            )));
        }
        let is_root = self.path == ROOT_QUEUE;
        Ok(QueueSettings {
            capacity: if is_root { 1.0 } else { self.capacity / 100.0 },
            maximum_capacity: if is_root { 1.0 } else { self.maximum_capacity / 100.0 },
            user_limit_percent: self.user_limit_percent,
            user_limit_factor: self.user_limit_factor,
            maximum_am_resource_fraction: self.maximum_am_resource_percent / 100.0,
            maximum_applications: self.maximum_applications,
            state: self.state,
        })
    }
}

/// Complete scheduler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub resource_calculator: CalculatorKind,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeConfig>,
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueConfig>,
}

fn default_queues() -> Vec<QueueConfig> {
    vec![
        QueueConfig::new(ROOT_QUEUE, 100.0),
        QueueConfig::new("root.default", 100.0),
    ]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resource_calculator: CalculatorKind::default(),
            resource_types: Vec::new(),
            queues: default_queues(),
        }
    }
}

impl SchedulerConfig {
    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the string is not a valid configuration.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Sets the maximum allocation of a dimension, adding it if needed.
    #[must_use]
    pub fn with_maximum_allocation(mut self, name: &str, maximum: u64) -> Self {
        self.resource_type_mut(name).maximum_allocation = Some(maximum);
        self
    }

    /// Sets the minimum allocation of a dimension, adding it if needed.
    #[must_use]
    pub fn with_minimum_allocation(mut self, name: &str, minimum: u64) -> Self {
        self.resource_type_mut(name).minimum_allocation = Some(minimum);
        self
    }

    /// Selects the resource calculator.
    #[must_use]
    pub const fn with_calculator(mut self, kind: CalculatorKind) -> Self {
        self.resource_calculator = kind;
        self
    }

    /// Adds or replaces a queue declaration.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        match self.queues.iter_mut().find(|q| q.path == queue.path) {
            Some(existing) => *existing = queue,
            None => self.queues.push(queue),
        }
        self
    }

    /// Removes a queue declaration.
    #[must_use]
    pub fn without_queue(mut self, path: &str) -> Self {
        self.queues.retain(|q| q.path != path);
        self
    }

    fn resource_type_mut(&mut self, name: &str) -> &mut ResourceTypeConfig {
        let pos = match self.resource_types.iter().position(|r| r.name == name) {
            Some(pos) => pos,
            None => {
                self.resource_types.push(ResourceTypeConfig {
                    name: name.to_string(),
                    ..Default::default()
                });
                self.resource_types.len() - 1
            }
        };
        &mut self.resource_types[pos]
    }

    /// Builds registry descriptors from this configuration.
    ///
    /// Used once at process start. Mandatory dimensions fall back to their
    /// defaults, other dimensions to a minimum of 0 and no maximum.
    #[must_use]
    pub fn resource_type_descriptors(&self) -> Vec<ResourceTypeDescriptor> {
        let mut descriptors = ResourceTypeDescriptor::mandatory_defaults();
        for rt in &self.resource_types {
            let pos = match descriptors.iter().position(|d| d.name == rt.name) {
                Some(pos) => pos,
                None => {
                    descriptors.push(ResourceTypeDescriptor::countable(&rt.name, "", 0, u64::MAX));
                    descriptors.len() - 1
                }
            };
            let descriptor = &mut descriptors[pos];
            if let Some(units) = &rt.units {
                descriptor.units.clone_from(units);
            }
            if let Some(min) = rt.minimum_allocation {
                descriptor.minimum_allocation = min;
            }
            if let Some(max) = rt.maximum_allocation {
                descriptor.maximum_allocation = max;
            }
        }
        descriptors
    }

    /// Resolves the scheduler's per-dimension allocation bounds.
    ///
    /// Every dimension of `snapshot` is covered. Values this configuration
    /// does not set are taken from the registry.
    ///
    /// # Errors
    ///
    /// - Returns [`ConfigError::UnregisteredResourceType`] if the configuration
    ///   names a dimension the registry does not know.
    /// - Returns [`ConfigError::InvalidAllocationBounds`] if a resolved minimum
    ///   exceeds its maximum.
    /// - Returns [`ConfigError::DuplicateResourceType`] if a dimension is
    ///   configured twice.
    pub fn allocation_bounds(
        &self,
        snapshot: &RegistrySnapshot,
    ) -> Result<(ResourceVector, ResourceVector), ConfigError> {
        for (i, rt) in self.resource_types.iter().enumerate() {
            if !snapshot.contains(&rt.name) {
                return Err(ConfigError::UnregisteredResourceType(rt.name.clone()));
            }
            if self.resource_types[..i].iter().any(|r| r.name == rt.name) {
                return Err(ConfigError::DuplicateResourceType(rt.name.clone()));
            }
        }

        let mut minimum = ResourceVector::new();
        let mut maximum = ResourceVector::new();
        for descriptor in snapshot.descriptors() {
            let configured = self.resource_types.iter().find(|r| r.name == descriptor.name);
            let min = configured
                .and_then(|r| r.minimum_allocation)
                .unwrap_or(descriptor.minimum_allocation);
            let max = configured
                .and_then(|r| r.maximum_allocation)
                .unwrap_or(descriptor.maximum_allocation);
            if min > max {
                return Err(ConfigError::InvalidAllocationBounds {
                    name: descriptor.name.clone(),
                    minimum: min,
                    maximum: max,
                });
            }
            minimum = minimum.with(descriptor.name.as_str(), min);
            maximum = maximum.with(descriptor.name.as_str(), max);
        }
        Ok((minimum, maximum))
    }

    /// Checks this configuration against `snapshot` without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the allocation bounds or the queue tree are invalid.
    pub fn validate(&self, snapshot: &RegistrySnapshot) -> Result<(), ConfigError> {
        self.allocation_bounds(snapshot)?;
        QueueHierarchy::from_config(&self.queues)?;
        Ok(())
    }

    /// Checks the proposed maxima never fall below the currently advertised ones.
    ///
    /// Only dimensions that are advertised and still registered in `snapshot`
    /// are compared.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MaximumAllocationDecreased`] for the first
    /// dimension that would shrink.
    pub fn check_maximum_not_decreased(
        snapshot: &RegistrySnapshot,
        current: &ResourceVector,
        proposed: &ResourceVector,
    ) -> Result<(), ConfigError> {
        for (name, current) in current.iter().filter(|(name, _)| snapshot.contains(name)) {
            let proposed = proposed.get(name);
            if proposed < current {
                return Err(ConfigError::MaximumAllocationDecreased {
                    name: name.to_string(),
                    current,
                    proposed,
                });
            }
        }
        Ok(())
    }

    /// Gives the configured maximum for the mandatory dimensions, for logging.
    #[must_use]
    pub fn describe_bounds(&self) -> String {
        let find = |name: &str| {
            self.resource_types
                .iter()
                .find(|r| r.name == name)
                .and_then(|r| r.maximum_allocation)
        };
        format!(
            "{} queues, {MEMORY} max {:?}, {VCORES} max {:?}, {} extra resource types",
            self.queues.len(),
            find(MEMORY),
            find(VCORES),
            self.resource_types
                .iter()
                .filter(|r| r.name != MEMORY && r.name != VCORES)
                .count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceTypeRegistry;
    use crate::test_utils::registry_with;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.resource_calculator, CalculatorKind::Dominant);
        assert_eq!(config.queues[1].path, "root.default");
        assert_eq!(config.queues[1].user_limit_percent, 100);
        assert_eq!(config.queues[1].maximum_am_resource_percent, 10.0);
    }

    #[test]
    fn parse_errors_are_reported() {
        let res = SchedulerConfig::from_toml_str("unknown_key = 1");
        assert!(matches!(res, Err(ConfigError::Parse(_))));
        let res = SchedulerConfig::from_toml_str("[[queues]]\ncapacity = 10.0");
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn descriptors_from_config() {
        let config = SchedulerConfig::default()
            .with_maximum_allocation("res_1", 3333)
            .with_maximum_allocation(MEMORY, 16384);
        let descriptors = config.resource_type_descriptors();
        let registry = ResourceTypeRegistry::initialize(descriptors).unwrap();
        let max = registry.maximum_allocation();
        assert_eq!(max.get("res_1"), 3333);
        assert_eq!(max.memory_mb(), 16384);
        assert_eq!(max.vcores(), 4);
        assert_eq!(registry.minimum_allocation().get("res_1"), 0);
    }

    #[test]
    fn allocation_bounds_fall_back_to_registry() {
        let registry = registry_with(&[("res_1", 0, 3333)]);
        let snapshot = registry.snapshot();

        let (min, max) = SchedulerConfig::default()
            .with_maximum_allocation("res_1", 3334)
            .allocation_bounds(&snapshot)
            .unwrap();
        assert_eq!(max.get("res_1"), 3334);
        assert_eq!(max.memory_mb(), 8192);
        assert_eq!(min.memory_mb(), 1024);

        let res = SchedulerConfig::default()
            .with_maximum_allocation("gpu", 1)
            .allocation_bounds(&snapshot);
        assert_eq!(res, Err(ConfigError::UnregisteredResourceType("gpu".into())));

        let res = SchedulerConfig::default()
            .with_minimum_allocation(VCORES, 10)
            .allocation_bounds(&snapshot);
        assert!(matches!(res, Err(ConfigError::InvalidAllocationBounds { .. })));
    }

    #[test]
    fn maximum_may_only_grow() {
        let registry = registry_with(&[("res_1", 0, 3333)]);
        let snapshot = registry.snapshot();
        let current = ResourceVector::of(8192, 4).with("res_1", 3333);
        let same = current.clone();
        let grown = current.clone().with("res_1", 3334);
        let shrunk = current.clone().with("res_1", 3332);
        let check = |proposed: &ResourceVector| {
            SchedulerConfig::check_maximum_not_decreased(&snapshot, &current, proposed)
        };

        assert!(check(&same).is_ok());
        assert!(check(&grown).is_ok());
        // dimensions no longer registered are not compared
        let with_gpu = current.clone().with("gpu", 4);
        assert!(
            SchedulerConfig::check_maximum_not_decreased(&snapshot, &with_gpu, &grown).is_ok()
        );
        assert_eq!(
            check(&shrunk),
            Err(ConfigError::MaximumAllocationDecreased {
                name: "res_1".into(),
                current: 3333,
                proposed: 3332,
            })
        );
    }

    #[test]
    fn validate_checks_queues() {
        let registry = registry_with(&[]);
        let snapshot = registry.snapshot();
        assert!(SchedulerConfig::default().validate(&snapshot).is_ok());
        let config = SchedulerConfig::default().with_queue(QueueConfig::new("root.other", 10.0));
        assert!(matches!(
            config.validate(&snapshot),
            Err(ConfigError::ChildCapacityExceeded { .. })
        ));
        let config = SchedulerConfig::default().without_queue(ROOT_QUEUE);
        assert_eq!(config.validate(&snapshot), Err(ConfigError::MissingRootQueue));
    }

    #[test]
    fn queue_settings_ranges() {
        assert!(QueueConfig::new("root.a", 50.0).settings().is_ok());
        assert!(QueueConfig::new("root.a", 150.0).settings().is_err());
        assert!(
            QueueConfig::new("root.a", 50.0)
                .with_maximum_capacity(40.0)
                .settings()
                .is_err()
        );
        assert!(
            QueueConfig::new("root.a", 50.0)
                .with_user_limit_percent(0)
                .settings()
                .is_err()
        );
        assert!(
            QueueConfig::new("root.a", 50.0)
                .with_user_limit_factor(0.0)
                .settings()
                .is_err()
        );

        let root = QueueConfig::new(ROOT_QUEUE, 0.0).settings().unwrap();
        assert_eq!(root.capacity, 1.0);
        let leaf = QueueConfig::new("root.a", 25.0)
            .with_maximum_am_resource_percent(50.0)
            .settings()
            .unwrap();
        assert_eq!(leaf.capacity, 0.25);
        assert_eq!(leaf.maximum_am_resource_fraction, 0.5);
    }
}
