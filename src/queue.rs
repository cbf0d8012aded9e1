// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hierarchy of capacity queues.
//!
//! Queues form a tree rooted at `root`. Parent queues split their capacity
//! among their children, leaf queues hold applications.
//! The tree is stored as an arena of [`Queue`] records addressed by
//! [`QueueId`], where each record keeps the index of its parent.
//! Usage changes are applied with [`QueueHierarchy::record_delta`], which
//! walks up the parent indices so that the usage of every parent is always
//! the sum of the usage of its children.
//!
//! Per-user ceilings are computed on demand by [`UserLimitCalculator`].

mod user_limit;

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::user_limit::UserLimitCalculator;
use crate::config::{ConfigError, QueueConfig, ROOT_QUEUE};
use crate::resource::{RegistrySnapshot, ResourceCalculator, ResourceVector, ResourceVectorError};
use crate::types::ApplicationId;

/// Tolerance used when summing child capacities.
const CAPACITY_EPSILON: f64 = 1e-9;

/// Errors the [`QueueHierarchy`] may return when it is mutated.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueueStateError {
    #[error("queue `{0}` does not exist")]
    UnknownQueue(String),
    #[error("queue `{0}` already exists")]
    QueueExists(String),
    #[error("queue `{0}` still has applications or resources in use")]
    InUse(String),
    #[error("queue `{0}` still has child queues")]
    HasChildren(String),
    #[error("the root queue cannot be removed")]
    RemoveRoot,
    #[error("queue `{0}` is not a leaf queue")]
    NotALeaf(String),
    #[error("leaf queue `{0}` has applications and cannot become a parent queue")]
    LeafHasApplications(String),
    #[error("children of `{parent}` would sum to {total} of its capacity")]
    CapacityExceeded { parent: String, total: f64 },
    #[error("queue `{0}` is stopped")]
    Stopped(String),
    #[error("queue `{queue}` already holds its maximum of {limit} applications")]
    TooManyApplications { queue: String, limit: usize },
    #[error("invalid setting for queue `{queue}`: {reason}")]
    InvalidSetting { queue: String, reason: String },
    #[error("`{0}` is not a valid queue name")]
    InvalidName(String),
}

/// Whether a queue accepts new applications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    #[default]
    Running,
    Stopped,
}

/// Validated settings of a single queue.
///
/// Capacities are fractions of the parent's capacity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueSettings {
    pub capacity: f64,
    pub maximum_capacity: f64,
    pub user_limit_percent: u32,
    pub user_limit_factor: f64,
    pub maximum_am_resource_fraction: f64,
    pub maximum_applications: usize,
    pub state: QueueState,
}

impl QueueSettings {
    /// Creates leaf settings with the given capacity fraction and defaults otherwise.
    #[must_use]
    pub fn with_capacity(capacity: f64) -> Self {
        Self {
            capacity,
            maximum_capacity: 1.0,
            user_limit_percent: 100,
            user_limit_factor: 1.0,
            maximum_am_resource_fraction: crate::config::DEFAULT_MAXIMUM_AM_RESOURCE_PERCENT
                / 100.0,
            maximum_applications: crate::config::DEFAULT_MAXIMUM_APPLICATIONS,
            state: QueueState::Running,
        }
    }
}

/// Index of a queue inside its [`QueueHierarchy`].
///
/// Ids are only meaningful for the hierarchy that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(usize);

impl QueueId {
    /// Id of the root queue in every hierarchy.
    pub const ROOT: Self = Self(0);
}

/// A change in resource usage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsageDelta {
    Allocated(ResourceVector),
    Released(ResourceVector),
}

/// A single queue record.
#[derive(Clone, Debug)]
pub struct Queue {
    name: String,
    path: String,
    parent: Option<QueueId>,
    children: Vec<QueueId>,
    settings: QueueSettings,
    used: ResourceVector,
    used_by_user: BTreeMap<String, ResourceVector>,
    am_used: ResourceVector,
    applications: Vec<ApplicationId>,
    /// Number of running applications per user.
    active_users: BTreeMap<String, usize>,
}

impl Queue {
    fn new(path: &str, parent: Option<QueueId>, settings: QueueSettings) -> Self {
        let name = path.rsplit('.').next().unwrap_or(path).to_string();
        Self {
            name,
            path: path.to_string(),
            parent,
            children: Vec::new(),
            settings,
            used: ResourceVector::new(),
            used_by_user: BTreeMap::new(),
            am_used: ResourceVector::new(),
            applications: Vec::new(),
            active_users: BTreeMap::new(),
        }
    }

    /// Gives the last segment of the queue's path.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gives the full dotted path, e.g. `root.a.b`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn parent(&self) -> Option<QueueId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[QueueId] {
        &self.children
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub const fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Gives the resources currently used in this queue and all its descendants.
    #[must_use]
    pub const fn used(&self) -> &ResourceVector {
        &self.used
    }

    /// Gives the resources the given user currently uses in this queue.
    #[must_use]
    pub fn used_by_user(&self, user: &str) -> ResourceVector {
        self.used_by_user.get(user).cloned().unwrap_or_default()
    }

    /// Gives the resources currently used by application masters.
    #[must_use]
    pub const fn am_used(&self) -> &ResourceVector {
        &self.am_used
    }

    /// Gives the applications of this leaf queue in submission order.
    #[must_use]
    pub fn applications(&self) -> &[ApplicationId] {
        &self.applications
    }

    /// Gives the number of users with at least one running application.
    #[must_use]
    pub fn active_user_count(&self) -> usize {
        self.active_users.len()
    }

    /// Gives the number of running applications.
    #[must_use]
    pub fn active_application_count(&self) -> usize {
        self.active_users.values().sum()
    }

    fn is_idle(&self) -> bool {
        self.used.is_zero() && self.applications.is_empty()
    }

    fn apply(&mut self, user: &str, delta: &UsageDelta) {
        match delta {
            UsageDelta::Allocated(r) => {
                self.used = self.used.add(r);
                let user_used = self.used_by_user(user).add(r);
                self.used_by_user.insert(user.to_string(), user_used);
            }
            UsageDelta::Released(r) => {
                self.used = self.used.subtract(r);
                let user_used = self.used_by_user(user).subtract(r);
                if user_used.is_zero() {
                    self.used_by_user.remove(user);
                } else {
                    self.used_by_user.insert(user.to_string(), user_used);
                }
            }
        }
    }
}

/// Read-only usage report of a single queue.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueueUsage {
    pub path: String,
    pub absolute_capacity: f64,
    pub absolute_maximum_capacity: f64,
    pub used: ResourceVector,
    pub used_by_user: BTreeMap<String, ResourceVector>,
    pub am_used: ResourceVector,
    pub applications: usize,
    pub active_users: usize,
}

/// Arena-backed tree of queues.
#[derive(Clone, Debug)]
pub struct QueueHierarchy {
    queues: Vec<Option<Queue>>,
    by_path: HashMap<String, QueueId>,
}

impl QueueHierarchy {
    /// Builds the queue tree described by `configs`.
    ///
    /// Parents may be declared in any order relative to their children.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a queue setting is out of range, the root is
    /// missing, a path is malformed or duplicated, a parent is undeclared,
    /// children of one parent exceed 100% capacity, or two leaves share a name.
    pub fn from_config(configs: &[QueueConfig]) -> Result<Self, ConfigError> {
        let mut sorted: Vec<&QueueConfig> = Vec::with_capacity(configs.len());
        for config in configs {
            if !is_valid_path(&config.path) {
                return Err(ConfigError::InvalidQueuePath(config.path.clone()));
            }
            if sorted.iter().any(|c| c.path == config.path) {
                return Err(ConfigError::DuplicateQueue(config.path.clone()));
            }
            sorted.push(config);
        }
        // parents before children, declaration order otherwise
        sorted.sort_by_key(|c| c.path.matches('.').count());
        if sorted.first().is_none_or(|c| c.path != ROOT_QUEUE) {
            return Err(ConfigError::MissingRootQueue);
        }

        let mut hierarchy = Self {
            queues: Vec::with_capacity(sorted.len()),
            by_path: HashMap::with_capacity(sorted.len()),
        };
        for config in sorted {
            let settings = config.settings()?;
            let parent = match config.path.rsplit_once('.') {
                None => None,
                Some((parent_path, _)) => match hierarchy.by_path.get(parent_path) {
                    Some(&id) => Some(id),
                    None => {
                        return Err(ConfigError::UnknownParent {
                            queue: config.path.clone(),
                            parent: parent_path.to_string(),
                        });
                    }
                },
            };
            hierarchy.insert(Queue::new(&config.path, parent, settings));
        }

        for queue in hierarchy.iter() {
            let total: f64 = queue
                .children
                .iter()
                .map(|&c| hierarchy.queue(c).settings.capacity)
                .sum();
            if total > 1.0 + CAPACITY_EPSILON {
                return Err(ConfigError::ChildCapacityExceeded {
                    parent: queue.path.clone(),
                    total: total * 100.0,
                });
            }
        }
        let mut leaf_names = HashSet::new();
        for queue in hierarchy.iter().filter(|q| q.is_leaf()) {
            if !leaf_names.insert(queue.name.as_str()) {
                return Err(ConfigError::AmbiguousLeafName(queue.name.clone()));
            }
        }
        Ok(hierarchy)
    }

    fn insert(&mut self, queue: Queue) -> QueueId {
        let id = QueueId(self.queues.len());
        if let Some(parent) = queue.parent {
            self.queue_mut(parent).children.push(id);
        }
        self.by_path.insert(queue.path.clone(), id);
        self.queues.push(Some(queue));
        id
    }

    /// Iterates over all queues, parents before their children.
    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.iter().flatten()
    }

    /// Iterates over the ids of all leaf queues.
    pub fn leaves(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.queues
            .iter()
            .enumerate()
            .filter_map(|(i, q)| q.as_ref().filter(|q| q.is_leaf()).map(|_| QueueId(i)))
    }

    /// Resolves a queue by full path, or by name if exactly one leaf has it.
    #[must_use]
    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        if let Some(&id) = self.by_path.get(name) {
            return Some(id);
        }
        let mut matching = self.leaves().filter(|&id| self.queue(id).name == name);
        match (matching.next(), matching.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// Gives the queue with the given full path or unique leaf name.
    #[must_use]
    pub fn get_queue(&self, name: &str) -> Option<&Queue> {
        self.queue_id(name).map(|id| self.queue(id))
    }

    /// Gives the queue with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` refers to a removed queue or was issued by another hierarchy.
    #[must_use]
    pub fn queue(&self, id: QueueId) -> &Queue {
        self.queues[id.0].as_ref().expect("stale queue id")
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut Queue {
        self.queues[id.0].as_mut().expect("stale queue id")
    }

    fn resolve(&self, name: &str) -> Result<QueueId, QueueStateError> {
        self.queue_id(name)
            .ok_or_else(|| QueueStateError::UnknownQueue(name.to_string()))
    }

    fn leaf(&self, id: QueueId) -> Result<&Queue, QueueStateError> {
        let queue = self.queue(id);
        if queue.is_leaf() {
            Ok(queue)
        } else {
            Err(QueueStateError::NotALeaf(queue.path.clone()))
        }
    }

    /// Adds a new leaf queue called `name` below `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError`] if the parent does not exist or is a leaf
    /// with applications, the name is invalid or taken, or the parent's
    /// children would exceed its capacity.
    pub fn add_queue(
        &mut self,
        parent: &str,
        name: &str,
        settings: QueueSettings,
    ) -> Result<QueueId, QueueStateError> {
        let parent_id = self.resolve(parent)?;
        if name.is_empty() || name.contains('.') {
            return Err(QueueStateError::InvalidName(name.to_string()));
        }
        let parent_queue = self.queue(parent_id);
        let path = format!("{}.{name}", parent_queue.path);
        if self.by_path.contains_key(&path) || self.queue_id(name).is_some() {
            return Err(QueueStateError::QueueExists(path));
        }
        if !parent_queue.is_idle() && parent_queue.is_leaf() {
            return Err(QueueStateError::LeafHasApplications(parent_queue.path.clone()));
        }
        let total = settings.capacity
            + parent_queue
                .children
                .iter()
                .map(|&c| self.queue(c).settings.capacity)
                .sum::<f64>();
        if total > 1.0 + CAPACITY_EPSILON {
            return Err(QueueStateError::CapacityExceeded {
                parent: parent_queue.path.clone(),
                total,
            });
        }
        let id = self.insert(Queue::new(&path, Some(parent_id), settings));
        info!("added queue {path}");
        Ok(id)
    }

    /// Removes an idle leaf queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError`] if the queue does not exist, is the root,
    /// has children, or still has applications or resources in use.
    pub fn remove_queue(&mut self, name: &str) -> Result<(), QueueStateError> {
        let id = self.resolve(name)?;
        let queue = self.queue(id);
        if id == QueueId::ROOT {
            return Err(QueueStateError::RemoveRoot);
        }
        if !queue.is_leaf() {
            return Err(QueueStateError::HasChildren(queue.path.clone()));
        }
        if !queue.is_idle() {
            return Err(QueueStateError::InUse(queue.path.clone()));
        }
        let path = queue.path.clone();
        if let Some(parent) = queue.parent {
            self.queue_mut(parent).children.retain(|&c| c != id);
        }
        self.by_path.remove(&path);
        self.queues[id.0] = None;
        info!("removed queue {path}");
        Ok(())
    }

    /// Applies a usage change to a leaf and every ancestor.
    ///
    /// Releases are capped at what the leaf actually uses, so parents stay
    /// equal to the sum of their children.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError::NotALeaf`] if `id` is not a leaf queue.
    pub fn record_delta(
        &mut self,
        id: QueueId,
        user: &str,
        delta: &UsageDelta,
    ) -> Result<(), QueueStateError> {
        let leaf = self.leaf(id)?;
        let delta = match delta {
            UsageDelta::Released(r) => UsageDelta::Released(r.component_min(&leaf.used_by_user(user))),
            allocated => allocated.clone(),
        };
        let mut current = Some(id);
        while let Some(qid) = current {
            let queue = self.queue_mut(qid);
            queue.apply(user, &delta);
            current = queue.parent;
        }
        Ok(())
    }

    /// Applies a change in application master usage to a leaf.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError::NotALeaf`] if `id` is not a leaf queue.
    pub fn record_am(&mut self, id: QueueId, delta: &UsageDelta) -> Result<(), QueueStateError> {
        self.leaf(id)?;
        let queue = self.queue_mut(id);
        queue.am_used = match delta {
            UsageDelta::Allocated(r) => queue.am_used.add(r),
            UsageDelta::Released(r) => queue.am_used.subtract(r),
        };
        Ok(())
    }

    /// Sets the minimum user limit percent of a queue.
    ///
    /// This does not touch any usage, ceilings are computed on demand.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError`] if the queue does not exist or `percent`
    /// is not in `(0, 100]`.
    pub fn set_user_limit(&mut self, name: &str, percent: u32) -> Result<(), QueueStateError> {
        let id = self.resolve(name)?;
        let queue = self.queue_mut(id);
        if percent == 0 || percent > 100 {
            return Err(QueueStateError::InvalidSetting {
                queue: queue.path.clone(),
                reason: format!("user limit percent {percent} not in (0, 100]"),
            });
        }
        queue.settings.user_limit_percent = percent;
        debug!("user limit of {} set to {percent}%", queue.path);
        Ok(())
    }

    /// Sets the user limit factor of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError`] if the queue does not exist or `factor`
    /// is not positive.
    pub fn set_user_limit_factor(&mut self, name: &str, factor: f64) -> Result<(), QueueStateError> {
        let id = self.resolve(name)?;
        let queue = self.queue_mut(id);
        if factor.is_nan() || factor <= 0.0 {
            return Err(QueueStateError::InvalidSetting {
                queue: queue.path.clone(),
                reason: format!("user limit factor {factor} must be positive"),
            });
        }
        queue.settings.user_limit_factor = factor;
        Ok(())
    }

    /// Gives the capacity of a queue as a fraction of the whole cluster.
    #[must_use]
    pub fn absolute_capacity(&self, id: QueueId) -> f64 {
        self.ancestry(id).map(|q| q.settings.capacity).product()
    }

    /// Gives the maximum capacity of a queue as a fraction of the whole cluster.
    #[must_use]
    pub fn absolute_maximum_capacity(&self, id: QueueId) -> f64 {
        self.ancestry(id).map(|q| q.settings.maximum_capacity).product()
    }

    /// Gives the resources guaranteed to a queue.
    #[must_use]
    pub fn guaranteed(&self, id: QueueId, cluster: &ResourceVector) -> ResourceVector {
        cluster.multiply_by_fraction(self.absolute_capacity(id))
    }

    /// Gives the most resources a queue may ever use.
    #[must_use]
    pub fn maximum(&self, id: QueueId, cluster: &ResourceVector) -> ResourceVector {
        cluster.multiply_by_fraction(self.absolute_maximum_capacity(id))
    }

    fn ancestry(&self, id: QueueId) -> impl Iterator<Item = &Queue> {
        std::iter::successors(Some(self.queue(id)), |q| q.parent.map(|p| self.queue(p)))
    }

    /// Gives all leaf queues in the order they should be offered resources.
    ///
    /// At every level, children with the lowest utilization of their
    /// guaranteed capacity come first, ties are broken by path.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if usage names an unregistered dimension.
    pub fn leaf_order(
        &self,
        calculator: &dyn ResourceCalculator,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
    ) -> Result<Vec<QueueId>, ResourceVectorError> {
        let mut order = Vec::new();
        let mut stack = vec![QueueId::ROOT];
        while let Some(id) = stack.pop() {
            let queue = self.queue(id);
            if queue.is_leaf() {
                order.push(id);
                continue;
            }
            let mut children = Vec::with_capacity(queue.children.len());
            for &child in &queue.children {
                let guaranteed = self.guaranteed(child, cluster);
                let utilization = calculator.ratio(snapshot, &self.queue(child).used, &guaranteed)?;
                children.push((utilization, child));
            }
            children.sort_by(|(ua, a), (ub, b)| {
                ua.total_cmp(ub)
                    .then_with(|| self.queue(*a).path.cmp(&self.queue(*b).path))
            });
            // stack is LIFO
            stack.extend(children.into_iter().rev().map(|(_, c)| c));
        }
        Ok(order)
    }

    /// Returns `true` iff `required` more resources keep the queue and every
    /// ancestor within its maximum capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if `required` names an unregistered dimension.
    pub fn has_headroom(
        &self,
        id: QueueId,
        required: &ResourceVector,
        calculator: &dyn ResourceCalculator,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
    ) -> Result<bool, ResourceVectorError> {
        let mut current = Some(id);
        while let Some(qid) = current {
            let queue = self.queue(qid);
            let after = queue.used.add(required);
            let maximum = self.maximum(qid, cluster);
            if !calculator.fits_within_limit(snapshot, cluster, &after, &maximum)? {
                return Ok(false);
            }
            current = queue.parent;
        }
        Ok(true)
    }

    /// Returns `true` iff a new application master of size `am` may start.
    ///
    /// The first running application of a queue is always allowed, afterwards
    /// all application masters together may take at most the queue's
    /// guaranteed capacity times its AM fraction.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceVectorError`] if `am` names an unregistered dimension.
    pub fn can_activate(
        &self,
        id: QueueId,
        am: &ResourceVector,
        calculator: &dyn ResourceCalculator,
        snapshot: &RegistrySnapshot,
        cluster: &ResourceVector,
    ) -> Result<bool, ResourceVectorError> {
        let queue = self.queue(id);
        if queue.active_application_count() == 0 {
            return Ok(true);
        }
        let limit = self
            .guaranteed(id, cluster)
            .multiply_by_fraction(queue.settings.maximum_am_resource_fraction);
        calculator.fits_within_limit(snapshot, cluster, &queue.am_used.add(am), &limit)
    }

    /// Adds an application to a leaf queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStateError`] if the queue is not a leaf, is stopped,
    /// or already holds its maximum number of applications.
    pub fn attach_application(
        &mut self,
        id: QueueId,
        application: ApplicationId,
    ) -> Result<(), QueueStateError> {
        let queue = self.leaf(id)?;
        if queue.settings.state == QueueState::Stopped {
            return Err(QueueStateError::Stopped(queue.path.clone()));
        }
        if queue.applications.len() >= queue.settings.maximum_applications {
            return Err(QueueStateError::TooManyApplications {
                queue: queue.path.clone(),
                limit: queue.settings.maximum_applications,
            });
        }
        self.queue_mut(id).applications.push(application);
        Ok(())
    }

    /// Removes an application from a leaf queue, if it is there.
    pub fn detach_application(&mut self, id: QueueId, application: ApplicationId) {
        self.queue_mut(id).applications.retain(|&a| a != application);
    }

    /// Marks one more application of `user` as running.
    pub fn activate_user(&mut self, id: QueueId, user: &str) {
        *self
            .queue_mut(id)
            .active_users
            .entry(user.to_string())
            .or_default() += 1;
    }

    /// Marks one application of `user` as no longer running.
    pub fn deactivate_user(&mut self, id: QueueId, user: &str) {
        let active = &mut self.queue_mut(id).active_users;
        if let Some(count) = active.get_mut(user) {
            *count -= 1;
            if *count == 0 {
                active.remove(user);
            }
        }
    }

    /// Builds the hierarchy for `configs`, carrying over all usage of `self`.
    ///
    /// `self` is never modified, so a failed merge leaves it fully intact.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the new tree is invalid, drops a queue that
    /// still has applications or usage, or turns such a leaf into a parent.
    pub fn merge_from(&self, configs: &[QueueConfig]) -> Result<Self, ConfigError> {
        let mut merged = Self::from_config(configs)?;
        for old in self.iter().filter(|q| q.is_leaf()) {
            match merged.by_path.get(&old.path).copied() {
                None if !old.is_idle() => {
                    return Err(QueueStateError::InUse(old.path.clone()).into());
                }
                None => {}
                Some(id) if !merged.queue(id).is_leaf() => {
                    if !old.is_idle() {
                        return Err(QueueStateError::LeafHasApplications(old.path.clone()).into());
                    }
                }
                Some(id) => {
                    let new = merged.queue_mut(id);
                    new.applications.clone_from(&old.applications);
                    new.active_users.clone_from(&old.active_users);
                    new.am_used = old.am_used.clone();
                    for (user, used) in &old.used_by_user {
                        merged.record_delta(id, user, &UsageDelta::Allocated(used.clone()))?;
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Reports the usage of every queue, keyed by path.
    #[must_use]
    pub fn usage_report(&self) -> BTreeMap<String, QueueUsage> {
        self.by_path
            .iter()
            .map(|(path, &id)| {
                let queue = self.queue(id);
                let usage = QueueUsage {
                    path: path.clone(),
                    absolute_capacity: self.absolute_capacity(id),
                    absolute_maximum_capacity: self.absolute_maximum_capacity(id),
                    used: queue.used.clone(),
                    used_by_user: queue.used_by_user.clone(),
                    am_used: queue.am_used.clone(),
                    applications: queue.applications.len(),
                    active_users: queue.active_user_count(),
                };
                (path.clone(), usage)
            })
            .collect()
    }
}

fn is_valid_path(path: &str) -> bool {
    let mut segments = path.split('.');
    segments.next() == Some(ROOT_QUEUE)
        && segments.all(|s| !s.is_empty() && s.chars().all(|c| !c.is_whitespace()))
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::resource::DominantResourceCalculator;
    use crate::test_utils::{app_id, registry_with};

    fn two_level() -> QueueHierarchy {
        QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 40.0),
            QueueConfig::new("root.b", 60.0).with_maximum_capacity(80.0),
            QueueConfig::new("root.a.a1", 50.0),
            QueueConfig::new("root.a.a2", 50.0),
        ])
        .unwrap()
    }

    fn assert_parents_are_sums(queues: &QueueHierarchy) {
        for queue in queues.iter().filter(|q| !q.is_leaf()) {
            let sum = queue
                .children()
                .iter()
                .fold(ResourceVector::new(), |acc, &c| acc.add(queues.queue(c).used()));
            assert_eq!(queue.used(), &sum, "parent {} out of sync", queue.path());
        }
    }

    #[test]
    fn build_from_config() {
        let queues = two_level();
        let a1 = queues.queue_id("a1").unwrap();
        assert_eq!(queues.queue(a1).path(), "root.a.a1");
        assert_eq!(queues.queue_id("root.a.a1"), Some(a1));
        assert!((queues.absolute_capacity(a1) - 0.2).abs() < 1e-12);
        let b = queues.queue_id("b").unwrap();
        assert!((queues.absolute_maximum_capacity(b) - 0.8).abs() < 1e-12);
        // parent names are only resolvable by path
        assert!(queues.get_queue("a").is_none());
        assert!(queues.get_queue("root.a").is_some());
    }

    #[test]
    fn invalid_trees_are_rejected() {
        let res = QueueHierarchy::from_config(&[QueueConfig::new("root.a", 10.0)]);
        assert_eq!(res.unwrap_err(), ConfigError::MissingRootQueue);

        let res = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a.b", 10.0),
        ]);
        assert!(matches!(res, Err(ConfigError::UnknownParent { .. })));

        let res = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 60.0),
            QueueConfig::new("root.b", 60.0),
        ]);
        assert!(matches!(res, Err(ConfigError::ChildCapacityExceeded { .. })));

        let res = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 50.0),
            QueueConfig::new("root.b", 50.0),
            QueueConfig::new("root.a.x", 50.0),
            QueueConfig::new("root.b.x", 50.0),
        ]);
        assert_eq!(res.unwrap_err(), ConfigError::AmbiguousLeafName("x".into()));

        let res = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root..a", 50.0),
        ]);
        assert!(matches!(res, Err(ConfigError::InvalidQueuePath(_))));
    }

    #[test]
    fn record_delta_walks_up() {
        let mut queues = two_level();
        let a1 = queues.queue_id("a1").unwrap();
        let a2 = queues.queue_id("a2").unwrap();
        let r = ResourceVector::of(1024, 1).with("res_1", 10);

        queues.record_delta(a1, "alice", &UsageDelta::Allocated(r.clone())).unwrap();
        queues.record_delta(a2, "bob", &UsageDelta::Allocated(r.clone())).unwrap();
        assert_eq!(queues.get_queue("root").unwrap().used(), &r.add(&r));
        assert_eq!(queues.get_queue("root.a").unwrap().used_by_user("alice"), r);
        assert_parents_are_sums(&queues);

        // over-release is capped at what the user holds
        let big = ResourceVector::of(4096, 4).with("res_1", 40);
        queues.record_delta(a1, "alice", &UsageDelta::Released(big)).unwrap();
        assert!(queues.queue(a1).used().is_zero());
        assert_eq!(queues.get_queue("root").unwrap().used(), &r);
        assert_parents_are_sums(&queues);

        let root_a = queues.queue_id("root.a").unwrap();
        let res = queues.record_delta(root_a, "alice", &UsageDelta::Allocated(r));
        assert_eq!(res, Err(QueueStateError::NotALeaf("root.a".into())));
    }

    #[test]
    fn random_deltas_keep_parents_in_sync() {
        let mut rng = rand::rng();
        let mut queues = two_level();
        let leaves: Vec<_> = queues.leaves().collect();
        let users = ["alice", "bob", "carol"];
        for _ in 0..1000 {
            let leaf = leaves[rng.random_range(0..leaves.len())];
            let user = users[rng.random_range(0..users.len())];
            let r = ResourceVector::of(rng.random_range(0..4096), rng.random_range(0..8))
                .with("res_1", rng.random_range(0..20));
            let delta = if rng.random_bool(0.6) {
                UsageDelta::Allocated(r)
            } else {
                UsageDelta::Released(r)
            };
            queues.record_delta(leaf, user, &delta).unwrap();
            assert_parents_are_sums(&queues);
        }
    }

    #[test]
    fn add_and_remove_queues() {
        let mut queues = two_level();
        let err = queues.add_queue("root.a", "a3", QueueSettings::with_capacity(0.1));
        assert!(matches!(err, Err(QueueStateError::CapacityExceeded { .. })));
        let err = queues.add_queue("root.missing", "x", QueueSettings::with_capacity(0.1));
        assert_eq!(err, Err(QueueStateError::UnknownQueue("root.missing".into())));
        let err = queues.add_queue("root.b", "a1", QueueSettings::with_capacity(0.1));
        assert!(matches!(err, Err(QueueStateError::QueueExists(_))));

        let id = queues.add_queue("root.b", "b1", QueueSettings::with_capacity(1.0)).unwrap();
        assert_eq!(queues.queue(id).path(), "root.b.b1");
        assert!(!queues.get_queue("root.b").unwrap().is_leaf());

        queues
            .record_delta(id, "alice", &UsageDelta::Allocated(ResourceVector::of(1, 1)))
            .unwrap();
        assert_eq!(
            queues.remove_queue("b1"),
            Err(QueueStateError::InUse("root.b.b1".into()))
        );
        assert_eq!(
            queues.remove_queue("root.b"),
            Err(QueueStateError::HasChildren("root.b".into()))
        );
        assert_eq!(queues.remove_queue("root"), Err(QueueStateError::RemoveRoot));

        queues
            .record_delta(id, "alice", &UsageDelta::Released(ResourceVector::of(1, 1)))
            .unwrap();
        queues.remove_queue("b1").unwrap();
        assert!(queues.get_queue("b1").is_none());
        assert!(queues.get_queue("root.b").unwrap().is_leaf());
        assert_eq!(
            queues.remove_queue("b1"),
            Err(QueueStateError::UnknownQueue("b1".into()))
        );
    }

    #[test]
    fn user_limit_setters() {
        let mut queues = two_level();
        queues.set_user_limit("a1", 25).unwrap();
        assert_eq!(queues.get_queue("a1").unwrap().settings().user_limit_percent, 25);
        assert!(queues.set_user_limit("a1", 0).is_err());
        assert!(queues.set_user_limit("a1", 101).is_err());
        assert!(queues.set_user_limit("nope", 50).is_err());
        queues.set_user_limit_factor("a1", 2.0).unwrap();
        assert!(queues.set_user_limit_factor("a1", -1.0).is_err());
    }

    #[test]
    fn leaf_order_prefers_least_utilized() {
        let registry = registry_with(&[]);
        let snapshot = registry.snapshot();
        let cluster = ResourceVector::of(100 * 1024, 100);
        let mut queues = two_level();
        let a1 = queues.queue_id("a1").unwrap();
        let a2 = queues.queue_id("a2").unwrap();
        let b = queues.queue_id("b").unwrap();

        let order = queues
            .leaf_order(&DominantResourceCalculator, &snapshot, &cluster)
            .unwrap();
        assert_eq!(order, vec![a1, a2, b]);

        // a is now at 50% of its guarantee while b is idle
        queues
            .record_delta(a1, "alice", &UsageDelta::Allocated(ResourceVector::of(20 * 1024, 10)))
            .unwrap();
        let order = queues
            .leaf_order(&DominantResourceCalculator, &snapshot, &cluster)
            .unwrap();
        assert_eq!(order, vec![b, a2, a1]);
    }

    #[test]
    fn headroom_respects_ancestors() {
        let registry = registry_with(&[]);
        let snapshot = registry.snapshot();
        let cluster = ResourceVector::of(100 * 1024, 100);
        let queues = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.p", 50.0).with_maximum_capacity(50.0),
            QueueConfig::new("root.p.leaf", 100.0),
            QueueConfig::new("root.other", 50.0),
        ])
        .unwrap();
        let leaf = queues.queue_id("leaf").unwrap();
        let calc = DominantResourceCalculator;

        let half = ResourceVector::of(50 * 1024, 50);
        let more = ResourceVector::of(51 * 1024, 50);
        assert!(queues.has_headroom(leaf, &half, &calc, &snapshot, &cluster).unwrap());
        assert!(!queues.has_headroom(leaf, &more, &calc, &snapshot, &cluster).unwrap());
    }

    #[test]
    fn application_membership() {
        let mut queues = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.small", 50.0).with_maximum_applications(1),
            QueueConfig::new("root.off", 50.0).with_state(QueueState::Stopped),
        ])
        .unwrap();
        let small = queues.queue_id("small").unwrap();
        let off = queues.queue_id("off").unwrap();

        queues.attach_application(small, app_id(1)).unwrap();
        assert_eq!(
            queues.attach_application(small, app_id(2)),
            Err(QueueStateError::TooManyApplications {
                queue: "root.small".into(),
                limit: 1,
            })
        );
        assert_eq!(
            queues.attach_application(off, app_id(3)),
            Err(QueueStateError::Stopped("root.off".into()))
        );
        assert_eq!(
            queues.attach_application(QueueId::ROOT, app_id(4)),
            Err(QueueStateError::NotALeaf("root".into()))
        );
        assert_eq!(
            queues.remove_queue("small"),
            Err(QueueStateError::InUse("root.small".into()))
        );
        queues.detach_application(small, app_id(1));
        assert!(queues.queue(small).applications().is_empty());
    }

    #[test]
    fn am_limit_after_first_application() {
        let registry = registry_with(&[]);
        let snapshot = registry.snapshot();
        let cluster = ResourceVector::of(100 * 1024, 100);
        let calc = DominantResourceCalculator;
        let mut queues = QueueHierarchy::from_config(&[
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.q", 100.0).with_maximum_am_resource_percent(10.0),
        ])
        .unwrap();
        let q = queues.queue_id("q").unwrap();

        // first application is always allowed, even if its AM is huge
        let huge = ResourceVector::of(50 * 1024, 1);
        assert!(queues.can_activate(q, &huge, &calc, &snapshot, &cluster).unwrap());
        queues.record_am(q, &UsageDelta::Allocated(huge)).unwrap();
        queues.activate_user(q, "alice");

        let small = ResourceVector::of(1024, 1);
        assert!(!queues.can_activate(q, &small, &calc, &snapshot, &cluster).unwrap());

        queues.activate_user(q, "alice");
        queues.activate_user(q, "bob");
        assert_eq!(queues.queue(q).active_user_count(), 2);
        assert_eq!(queues.queue(q).active_application_count(), 3);
        queues.deactivate_user(q, "bob");
        assert_eq!(queues.queue(q).active_user_count(), 1);
    }

    #[test]
    fn merge_keeps_usage() {
        let mut queues = two_level();
        let a1 = queues.queue_id("a1").unwrap();
        let r = ResourceVector::of(2048, 2);
        queues.attach_application(a1, app_id(1)).unwrap();
        queues.record_delta(a1, "alice", &UsageDelta::Allocated(r.clone())).unwrap();

        let configs = [
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 40.0),
            QueueConfig::new("root.b", 60.0).with_maximum_capacity(80.0),
            QueueConfig::new("root.a.a1", 50.0),
            QueueConfig::new("root.a.a2", 50.0),
        ];
        let merged = queues.merge_from(&configs).unwrap();
        assert_eq!(merged.usage_report(), queues.usage_report());

        // dropping an idle queue is fine, dropping a busy one is not
        let without_a2 = [
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 40.0),
            QueueConfig::new("root.b", 60.0),
            QueueConfig::new("root.a.a1", 100.0),
        ];
        let merged = queues.merge_from(&without_a2).unwrap();
        assert_eq!(merged.get_queue("root").unwrap().used(), &r);
        let without_a1 = [
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 40.0),
            QueueConfig::new("root.b", 60.0),
            QueueConfig::new("root.a.a2", 100.0),
        ];
        assert_eq!(
            queues.merge_from(&without_a1).unwrap_err(),
            ConfigError::QueueState(QueueStateError::InUse("root.a.a1".into()))
        );

        let a1_as_parent = [
            QueueConfig::new("root", 100.0),
            QueueConfig::new("root.a", 40.0),
            QueueConfig::new("root.b", 60.0),
            QueueConfig::new("root.a.a1", 50.0),
            QueueConfig::new("root.a.a2", 50.0),
            QueueConfig::new("root.a.a1.x", 100.0),
        ];
        assert_eq!(
            queues.merge_from(&a1_as_parent).unwrap_err(),
            ConfigError::QueueState(QueueStateError::LeafHasApplications("root.a.a1".into()))
        );
    }
}
