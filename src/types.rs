// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod ids;
pub mod request;

pub use self::ids::{ApplicationId, AttemptId, ContainerId, NodeId};
pub use self::request::{ANY, Priority, ResourceRequest};
