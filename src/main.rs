// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use capsched::config::SchedulerConfig;
use capsched::logging;
use capsched::resource::{ResourceTypeRegistry, ResourceVector};
use capsched::scheduler::{CapacityScheduler, SchedulerEvent, SchedulerService};
use capsched::types::NodeId;
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::Context;
use fastrace::collector::Config;
use fastrace::prelude::*;
use fastrace_opentelemetry::OpenTelemetryReporter;
use log::{info, warn};
use opentelemetry::trace::SpanKind;
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;

/// Hierarchical multi-dimensional capacity scheduler.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Scheduler configuration file (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Only validates the configuration and exits.
    #[arg(long)]
    check: bool,
    /// Exports tracing spans to this OTLP gRPC endpoint.
    #[arg(long)]
    otlp_endpoint: Option<String>,
    /// Registers this many simulated nodes at startup.
    #[arg(long, default_value_t = 0)]
    nodes: u32,
    /// Memory of each simulated node in MB.
    #[arg(long, default_value_t = 8192)]
    node_memory_mb: u64,
    /// Virtual cores of each simulated node.
    #[arg(long, default_value_t = 8)]
    node_vcores: u64,
    /// Uses the full log layout with timestamps.
    #[arg(long)]
    verbose_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // enable fancy `color_eyre` error messages
    color_eyre::install()?;
    let args = Args::parse();

    // enable `fastrace` tracing
    if let Some(endpoint) = &args.otlp_endpoint {
        let reporter = OpenTelemetryReporter::new(
            SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .with_protocol(opentelemetry_otlp::Protocol::Grpc)
                .with_timeout(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT)
                .build()
                .context("initialize otlp exporter")?,
            SpanKind::Server,
            Cow::Owned(
                Resource::builder()
                    .with_attributes([KeyValue::new("service.name", "capsched")])
                    .build(),
            ),
            InstrumentationScope::builder("capsched")
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
        );
        fastrace::set_reporter(reporter, Config::default());
    }

    if args.verbose_log {
        logging::enable_logforth_stderr();
    } else {
        logging::enable_logforth();
    }

    let config = SchedulerConfig::from_file(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    let registry = Arc::new(
        ResourceTypeRegistry::initialize(config.resource_type_descriptors())
            .context("initialize resource types")?,
    );
    config
        .validate(&registry.snapshot())
        .context("validate config")?;
    if args.check {
        info!("config is valid: {}", config.describe_bounds());
        return Ok(());
    }

    {
        let root = Span::root("capsched", SpanContext::random());
        let _guard = root.set_local_parent();

        let scheduler = CapacityScheduler::new(config, registry).context("start scheduler")?;
        let (handle, mut allocations, task) = SchedulerService::spawn(scheduler);

        for i in 0..args.nodes {
            let capability = ResourceVector::of(args.node_memory_mb, args.node_vcores);
            handle
                .handle(SchedulerEvent::NodeAdded {
                    node_id: NodeId::new(format!("node-{i}")),
                    capability,
                })
                .await
                .context("register simulated node")?;
        }
        info!(
            "scheduler ready, advertising {}",
            handle.maximum_resource_capability()
        );

        let cancel_token = handle.cancel_token();
        let printer = tokio::spawn(async move {
            while let Some(allocation) = allocations.recv().await {
                info!(
                    "{} -> {} on {} ({})",
                    allocation.container_id,
                    allocation.application_id,
                    allocation.node_id,
                    allocation.capability
                );
            }
        });

        tokio::signal::ctrl_c().await?;
        warn!("shutting down scheduler");
        cancel_token.cancel();
        task.await?;
        drop(handle);
        printer.await?;
    }

    fastrace::flush();

    Ok(())
}
