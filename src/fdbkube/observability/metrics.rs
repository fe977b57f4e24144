/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::error::Error;
use std::sync::OnceLock;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static CONTROLLER_RECONCILES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static PODS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static POD_CREATION_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static FAULT_TOLERANCE_UNKNOWN_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("fdbkube".to_string()), None)
            .expect("failed to initialise fdbkube metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register fdbkube metric collector");
    collector
}

fn counter_vec(
    cell: &'static OnceLock<IntCounterVec>,
    name: &str,
    help: &str,
    labels: &[&str],
) -> &'static IntCounterVec {
    cell.get_or_init(|| {
        let counter = IntCounterVec::new(Opts::new(name, help), labels)
            .unwrap_or_else(|err| panic!("failed to build counter {name}: {err}"));
        register_collector(counter)
    })
}

fn controller_reconciles_total() -> &'static IntCounterVec {
    counter_vec(
        &CONTROLLER_RECONCILES_TOTAL,
        "controller_reconciles_total",
        "Reconciliation passes grouped by controller step and result",
        &["controller", "result"],
    )
}

fn pods_created_total() -> &'static IntCounterVec {
    counter_vec(
        &PODS_CREATED_TOTAL,
        "pods_created_total",
        "Pods created for process groups grouped by process class",
        &["process_class"],
    )
}

fn pod_creation_failures_total() -> &'static IntCounterVec {
    counter_vec(
        &POD_CREATION_FAILURES_TOTAL,
        "pod_creation_failures_total",
        "Failed pod creations grouped by process class and failure reason",
        &["process_class", "reason"],
    )
}

fn fault_tolerance_unknown_total() -> &'static IntCounterVec {
    counter_vec(
        &FAULT_TOLERANCE_UNKNOWN_TOTAL,
        "fault_tolerance_unknown_total",
        "Passes that fell back to the conservative fault tolerance assessment",
        &["reason"],
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerReconcileResult {
    Success,
    Requeue,
    Error,
}

impl ControllerReconcileResult {
    fn as_label(self) -> &'static str {
        match self {
            ControllerReconcileResult::Success => "success",
            ControllerReconcileResult::Requeue => "requeue",
            ControllerReconcileResult::Error => "error",
        }
    }
}

pub fn record_controller_reconcile(controller: &str, result: ControllerReconcileResult) {
    controller_reconciles_total()
        .with_label_values(&[controller, result.as_label()])
        .inc();
}

pub fn record_pod_created(process_class: &str) {
    pods_created_total().with_label_values(&[process_class]).inc();
}

pub fn record_pod_creation_failure(process_class: &str, reason: &str) {
    pod_creation_failures_total()
        .with_label_values(&[process_class, reason])
        .inc();
}

pub fn record_fault_tolerance_unknown(reason: &str) {
    fault_tolerance_unknown_total()
        .with_label_values(&[reason])
        .inc();
}

/// Encodes all registered metrics using the Prometheus text exposition
/// format.
pub fn gather() -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let metric_families = registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)?;
    Ok(buffer)
}
