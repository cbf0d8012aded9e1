// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use capsched::config::{ConfigError, SchedulerConfig};
use capsched::resource::{ResourceTypeDescriptor, ResourceTypeRegistry, ResourceVector};
use capsched::scheduler::{
    CapacityScheduler, ContainerAllocation, SchedulerError, SchedulerEvent, SchedulerHandle,
    SchedulerService,
};
use capsched::types::{ApplicationId, AttemptId, NodeId, ResourceRequest};
use tokio::sync::mpsc::UnboundedReceiver;

const GB: u64 = 1024;

const CONFIG: &str = r#"
resource_calculator = "dominant"

[[resource_types]]
name = "res_1"
maximum_allocation = 3333

[[queues]]
path = "root"

[[queues]]
path = "root.default"
capacity = 100.0
user_limit_percent = 25
"#;

fn start(config: &SchedulerConfig) -> (SchedulerHandle, UnboundedReceiver<ContainerAllocation>) {
    let registry =
        Arc::new(ResourceTypeRegistry::initialize(config.resource_type_descriptors()).unwrap());
    let scheduler = CapacityScheduler::new(config.clone(), registry).unwrap();
    let (handle, allocations, _task) = SchedulerService::spawn(scheduler);
    (handle, allocations)
}

fn attempt(app: u32) -> AttemptId {
    AttemptId::new(ApplicationId::new(42, app), 1)
}

async fn add_node(handle: &SchedulerHandle, name: &str, capability: ResourceVector) -> NodeId {
    let node_id = NodeId::new(name);
    handle
        .handle(SchedulerEvent::NodeAdded {
            node_id: node_id.clone(),
            capability,
        })
        .await
        .unwrap();
    node_id
}

async fn submit(handle: &SchedulerHandle, app: u32, user: &str) {
    handle
        .handle(SchedulerEvent::AppAdded {
            application_id: attempt(app).application(),
            queue: "default".into(),
            user: user.into(),
        })
        .await
        .unwrap();
    handle
        .handle(SchedulerEvent::AppAttemptAdded {
            attempt_id: attempt(app),
            am_resource: ResourceVector::new(),
        })
        .await
        .unwrap();
}

async fn heartbeat(handle: &SchedulerHandle, node_id: &NodeId) -> Vec<ContainerAllocation> {
    handle
        .handle(SchedulerEvent::NodeUpdate {
            node_id: node_id.clone(),
            reported_available: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn maximum_allocation_is_monotonic() {
    let config = SchedulerConfig::from_toml_str(CONFIG).unwrap();
    let (handle, _allocations) = start(&config);
    assert_eq!(handle.maximum_resource_capability().get("res_1"), 3333);

    let err = handle
        .reinitialize(config.clone().with_maximum_allocation("res_1", 3332))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SchedulerError::Config(ConfigError::MaximumAllocationDecreased {
            name: "res_1".into(),
            current: 3333,
            proposed: 3332,
        })
    );
    assert_eq!(handle.maximum_resource_capability().get("res_1"), 3333);

    handle
        .reinitialize(config.with_maximum_allocation("res_1", 3334))
        .await
        .unwrap();
    assert_eq!(handle.maximum_resource_capability().get("res_1"), 3334);
    assert_eq!(handle.maximum_allocation().get("res_1"), 3333);
}

#[tokio::test]
async fn extended_resource_user_limit() {
    let config = SchedulerConfig::from_toml_str(CONFIG).unwrap();
    let (handle, mut allocations) = start(&config);
    let node_id = add_node(&handle, "n1", ResourceVector::of(2048 * GB, 100).with("res_1", 80)).await;
    submit(&handle, 1, "user_0").await;

    let capability = ResourceVector::of(GB, 1).with("res_1", 10);
    for _ in 0..8 {
        handle
            .update_resource_requests(
                attempt(1),
                vec![ResourceRequest::new(1, capability.clone(), 1)],
            )
            .await
            .unwrap();
        assert_eq!(heartbeat(&handle, &node_id).await.len(), 1);
    }

    let expected = ResourceVector::of(8 * GB, 8).with("res_1", 80);
    let snapshot = handle.snapshot();
    let usage = &snapshot.applications[&attempt(1).application()];
    assert_eq!(usage.consumption, expected);
    assert_eq!(usage.containers, 8);
    assert_eq!(snapshot.user_usage("root.default", "user_0"), expected);
    assert_eq!(snapshot.queues["root"].used, expected);

    let mut streamed = Vec::new();
    while let Ok(allocation) = allocations.try_recv() {
        streamed.push(allocation);
    }
    assert_eq!(streamed.len(), 8);
    assert!(streamed.iter().all(|a| a.capability == capability));
}

#[tokio::test]
async fn users_share_extended_resource() {
    let config = SchedulerConfig::from_toml_str(CONFIG).unwrap();
    let (handle, _allocations) = start(&config);
    let node_id = add_node(&handle, "n1", ResourceVector::of(2048 * GB, 100).with("res_1", 80)).await;
    submit(&handle, 1, "user_0").await;
    submit(&handle, 2, "user_1").await;

    let capability = ResourceVector::of(GB, 1).with("res_1", 10);
    for app in [1, 2] {
        handle
            .update_resource_requests(
                attempt(app),
                vec![ResourceRequest::new(1, capability.clone(), 8)],
            )
            .await
            .unwrap();
    }

    // two active users split the queue, so each stops at half of res_1
    let allocations = heartbeat(&handle, &node_id).await;
    assert_eq!(allocations.len(), 8);
    let snapshot = handle.snapshot();
    let half = ResourceVector::of(4 * GB, 4).with("res_1", 40);
    assert_eq!(snapshot.user_usage("root.default", "user_0"), half);
    assert_eq!(snapshot.user_usage("root.default", "user_1"), half);
}

#[tokio::test]
async fn new_resource_type_becomes_schedulable() {
    let config = SchedulerConfig::from_toml_str(CONFIG).unwrap();
    let (handle, _allocations) = start(&config);
    submit(&handle, 1, "user_0").await;

    let gpu_request = vec![ResourceRequest::new(
        1,
        ResourceVector::of(GB, 1).with("gpu", 1),
        1,
    )];
    let err = handle
        .update_resource_requests(attempt(1), gpu_request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidRequest { .. }));

    let mut descriptors = config.resource_type_descriptors();
    descriptors.push(ResourceTypeDescriptor::countable("gpu", "", 0, 4));
    handle
        .reinitialize_resource_types(descriptors)
        .await
        .unwrap();
    assert_eq!(handle.snapshot().registry_generation, 1);
    assert_eq!(handle.maximum_resource_capability().get("gpu"), 4);
    assert_eq!(handle.maximum_resource_capability().get("res_1"), 3333);

    let node_id = add_node(&handle, "n1", ResourceVector::of(8 * GB, 8).with("gpu", 2)).await;
    handle
        .update_resource_requests(attempt(1), gpu_request)
        .await
        .unwrap();
    let allocations = heartbeat(&handle, &node_id).await;
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].capability.get("gpu"), 1);
}
