// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Multi-dimensional resources.
//!
//! Resources are described by an open-ended set of named dimensions.
//! The [`ResourceTypeRegistry`] holds the catalog of known dimensions,
//! [`ResourceVector`] holds quantities keyed by dimension name, and a
//! [`ResourceCalculator`] decides how two vectors are ordered relative to
//! the cluster's total capacity.

mod calculator;
mod registry;
mod vector;

pub use calculator::{
    CalculatorKind, DefaultResourceCalculator, DominantResourceCalculator, ResourceCalculator,
};
pub use registry::{
    DEFAULT_MAXIMUM_ALLOCATION_MB, DEFAULT_MAXIMUM_ALLOCATION_VCORES, DEFAULT_MINIMUM_ALLOCATION_MB,
    DEFAULT_MINIMUM_ALLOCATION_VCORES, MEMORY_UNITS, RegistrySnapshot, ResourceKind,
    ResourceTypeDescriptor, ResourceTypeRegistry,
};
pub use vector::{ResourceVector, ResourceVectorError};

/// Name of the mandatory memory dimension.
pub const MEMORY: &str = "memory-mb";
/// Name of the mandatory virtual core dimension.
pub const VCORES: &str = "vcores";
