// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use capsched::config::SchedulerConfig;
use capsched::resource::{
    DominantResourceCalculator, ResourceCalculator, ResourceTypeDescriptor, ResourceTypeRegistry,
    ResourceVector,
};
use capsched::scheduler::{CapacityScheduler, SchedulerEvent};
use capsched::types::{ApplicationId, AttemptId, NodeId, ResourceRequest};
use divan::counter::ItemsCount;
use rand::Rng;

fn main() {
    // run registered benchmarks.
    divan::main();
}

/// Registry with the mandatory dimensions plus `extra` countable ones.
fn registry(extra: usize) -> ResourceTypeRegistry {
    let mut descriptors = ResourceTypeDescriptor::mandatory_defaults();
    descriptors.extend(
        (0..extra).map(|i| ResourceTypeDescriptor::countable(format!("res_{i}"), "", 0, 1000)),
    );
    ResourceTypeRegistry::initialize(descriptors).unwrap()
}

fn random_vector(extra: usize, rng: &mut impl Rng) -> ResourceVector {
    (0..extra).fold(
        ResourceVector::of(rng.random_range(1..65_536), rng.random_range(1..64)),
        |v, i| v.with(format!("res_{i}"), rng.random_range(0..1000)),
    )
}

#[divan::bench(consts = [0, 4, 16])]
fn dominant_compare<const N: usize>(bencher: divan::Bencher) {
    let registry = registry(N);
    let snapshot = registry.snapshot();
    let mut rng = rand::rng();
    let cluster = random_vector(N, &mut rng).with("memory-mb", 1 << 30);
    bencher
        .counter(ItemsCount::new(1_usize))
        .with_inputs(|| (random_vector(N, &mut rand::rng()), random_vector(N, &mut rand::rng())))
        .bench_refs(|(lhs, rhs)| {
            DominantResourceCalculator
                .compare(&snapshot, &cluster, lhs, rhs)
                .unwrap()
        });
}

#[divan::bench(consts = [1, 16, 128])]
fn heartbeat<const APPS: u32>(bencher: divan::Bencher) {
    bencher
        .counter(ItemsCount::new(APPS as usize))
        .with_inputs(|| {
            let mut scheduler =
                CapacityScheduler::new(SchedulerConfig::default(), Arc::new(registry(0))).unwrap();
            let node_id = NodeId::new("n1");
            scheduler
                .handle(SchedulerEvent::NodeAdded {
                    node_id: node_id.clone(),
                    capability: ResourceVector::of(1 << 20, 1024),
                })
                .unwrap();
            for app in 1..=APPS {
                let application_id = ApplicationId::new(1, app);
                let attempt_id = AttemptId::new(application_id, 1);
                scheduler
                    .handle(SchedulerEvent::AppAdded {
                        application_id,
                        queue: "default".into(),
                        user: format!("user_{}", app % 8),
                    })
                    .unwrap();
                scheduler
                    .handle(SchedulerEvent::AppAttemptAdded {
                        attempt_id,
                        am_resource: ResourceVector::new(),
                    })
                    .unwrap();
                scheduler
                    .update_resource_requests(
                        attempt_id,
                        vec![ResourceRequest::new(1, ResourceVector::of(1024, 1), 4)],
                    )
                    .unwrap();
            }
            (scheduler, node_id)
        })
        .bench_values(|(mut scheduler, node_id)| {
            scheduler
                .handle(SchedulerEvent::NodeUpdate {
                    node_id,
                    reported_available: None,
                })
                .unwrap()
        });
}
