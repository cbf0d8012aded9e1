// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Identifiers of applications, attempts, containers and nodes.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifier of a submitted application.
///
/// Applications are numbered per cluster start, which is identified by its
/// timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    cluster_timestamp: u64,
    id: u32,
}

impl ApplicationId {
    #[must_use]
    pub const fn new(cluster_timestamp: u64, id: u32) -> Self {
        Self {
            cluster_timestamp,
            id,
        }
    }

    #[must_use]
    pub const fn cluster_timestamp(&self) -> u64 {
        self.cluster_timestamp
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }
}

impl Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_timestamp, self.id)
    }
}

/// Identifier of one attempt at running an application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttemptId {
    application: ApplicationId,
    attempt: u32,
}

impl AttemptId {
    #[must_use]
    pub const fn new(application: ApplicationId, attempt: u32) -> Self {
        Self {
            application,
            attempt,
        }
    }

    #[must_use]
    pub const fn application(&self) -> ApplicationId {
        self.application
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "appattempt_{}_{:04}_{:06}",
            self.application.cluster_timestamp, self.application.id, self.attempt
        )
    }
}

/// Identifier of an allocated container.
///
/// It doubles as the token a launcher presents to start the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    attempt: AttemptId,
    sequence: u64,
}

impl ContainerId {
    #[must_use]
    pub const fn new(attempt: AttemptId, sequence: u64) -> Self {
        Self { attempt, sequence }
    }

    #[must_use]
    pub const fn attempt(&self) -> AttemptId {
        self.attempt
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let app = self.attempt.application;
        write!(
            f,
            "container_{}_{:04}_{:02}_{:06}",
            app.cluster_timestamp, app.id, self.attempt.attempt, self.sequence
        )
    }
}

/// Identifier of a cluster node, usually `host:port`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let app = ApplicationId::new(1_700_000_000, 7);
        let attempt = AttemptId::new(app, 1);
        let container = ContainerId::new(attempt, 42);
        assert_eq!(app.to_string(), "application_1700000000_0007");
        assert_eq!(attempt.to_string(), "appattempt_1700000000_0007_000001");
        assert_eq!(container.to_string(), "container_1700000000_0007_01_000042");
        assert_eq!(NodeId::new("host1:8041").to_string(), "host1:8041");
    }

    #[test]
    fn ordering_follows_submission() {
        let a = ApplicationId::new(1, 2);
        let b = ApplicationId::new(1, 10);
        assert!(a < b);
        assert!(AttemptId::new(a, 3) < AttemptId::new(b, 1));
    }
}
