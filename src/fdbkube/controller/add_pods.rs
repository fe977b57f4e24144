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

//! Creates the pods that process groups are missing.
//!
//! The step only ever adds pods. Groups marked for removal are recreated
//! unless the cluster can afford to leave them down; see
//! [`must_have_pod`].

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::fdbkube::api::cluster::FoundationDBCluster;
use crate::fdbkube::api::process_group::{ProcessClass, ProcessGroupId, ProcessGroupStatus};
use crate::fdbkube::config::Config;
use crate::fdbkube::controller::inventory::{
    PodExistenceIndex, PodLister, ProcessGroupInventory,
};
use crate::fdbkube::controller::materializer::{MaterializeError, PodMaterializer};
use crate::fdbkube::controller::reconcile::{ReconcileContext, ReconcileStep, Requeue};
use crate::fdbkube::controller::safety::must_have_pod;
use crate::fdbkube::fdb::admin::{FaultToleranceAssessment, FaultToleranceOracle};
use crate::fdbkube::k8s::event::{EventRecorder, EventType};
use crate::fdbkube::logger::{log_debug, log_error, log_info, log_warn};
use crate::fdbkube::observability::metrics;

const COMPONENT: &str = "add-pods";
const FAILURE_REASON: &str = "PodCreationFailed";

/// One pod that the pass intends to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPod {
    pub process_group_id: ProcessGroupId,
    pub process_class: ProcessClass,
}

#[derive(Debug)]
pub struct PodCreationFailure {
    pub process_group_id: ProcessGroupId,
    pub process_class: ProcessClass,
    pub error: MaterializeError,
}

/// Every pod creation that failed during one pass.
#[derive(Debug)]
pub struct AddPodsError {
    pub failures: Vec<PodCreationFailure>,
}

impl AddPodsError {
    /// True when retrying right away cannot help: every failure is a quota
    /// rejection or an error the materializer will keep returning.
    pub fn needs_backoff(&self) -> bool {
        !self.failures.is_empty()
            && self.failures.iter().all(|failure| {
                failure.error.is_quota_exceeded() || !failure.error.is_retryable()
            })
    }
}

impl Display for AddPodsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to create {} pod(s)", self.failures.len())?;
        for (index, failure) in self.failures.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(
                f,
                "{}{}: {}",
                separator, failure.process_group_id, failure.error
            )?;
        }
        Ok(())
    }
}

impl Error for AddPodsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failures
            .first()
            .map(|failure| &failure.error as &(dyn Error + 'static))
    }
}

/// Pass-wide fault-tolerance assessment, fetched on first use.
struct LazyAssessment<'a> {
    oracle: &'a dyn FaultToleranceOracle,
    cluster: &'a FoundationDBCluster,
    value: Option<FaultToleranceAssessment>,
}

impl<'a> LazyAssessment<'a> {
    fn new(oracle: &'a dyn FaultToleranceOracle, cluster: &'a FoundationDBCluster) -> Self {
        Self {
            oracle,
            cluster,
            value: None,
        }
    }

    fn get(&mut self) -> FaultToleranceAssessment {
        if let Some(value) = self.value {
            return value;
        }
        let key = self.cluster.key();
        let value = match self.oracle.assess(&key) {
            Ok(assessment) => assessment,
            Err(err) => {
                let cluster = key.to_string();
                let error = err.to_string();
                log_warn(
                    COMPONENT,
                    "Fault tolerance unknown; treating cluster as unable to lose a zone",
                    &[("cluster", cluster.as_str()), ("error", error.as_str())],
                );
                metrics::record_fault_tolerance_unknown(err.reason());
                FaultToleranceAssessment::unknown()
            }
        };
        self.value = Some(value);
        value
    }
}

struct Collaborators {
    inventory: Arc<dyn ProcessGroupInventory>,
    pods: Arc<dyn PodLister>,
    oracle: Arc<dyn FaultToleranceOracle>,
    materializer: Arc<dyn PodMaterializer>,
    recorder: Arc<dyn EventRecorder>,
}

impl Collaborators {
    fn resolve(ctx: &ReconcileContext) -> Result<Self, Requeue> {
        Ok(Self {
            inventory: ctx.require::<dyn ProcessGroupInventory>("process group inventory")?,
            pods: ctx.require::<dyn PodLister>("pod lister")?,
            oracle: ctx.require::<dyn FaultToleranceOracle>("fault tolerance oracle")?,
            materializer: ctx.require::<dyn PodMaterializer>("pod materializer")?,
            recorder: ctx.require::<dyn EventRecorder>("event recorder")?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AddPods;

impl AddPods {
    pub fn new() -> Self {
        Self
    }

    /// Selects the process groups that need a pod, in inventory order.
    ///
    /// `oracle` is consulted at most once, and only when a group marked for
    /// removal lacks a pod.
    pub fn plan(
        &self,
        cluster: &FoundationDBCluster,
        process_groups: &[ProcessGroupStatus],
        index: &PodExistenceIndex,
        oracle: &dyn FaultToleranceOracle,
    ) -> Vec<PlannedPod> {
        let mut assessment = LazyAssessment::new(oracle, cluster);
        let mut seen: HashSet<&ProcessGroupId> = HashSet::new();
        let mut planned = Vec::new();

        for group in process_groups {
            if !seen.insert(&group.process_group_id) {
                log_warn(
                    COMPONENT,
                    "Skipping duplicate process group",
                    &[
                        ("cluster", cluster.name()),
                        ("process_group_id", group.process_group_id.as_str()),
                    ],
                );
                continue;
            }
            if index.pod_exists_for(&group.process_group_id) {
                continue;
            }
            if group.is_marked_for_removal() && !must_have_pod(group, &assessment.get()) {
                log_debug(
                    COMPONENT,
                    "Leaving process group marked for removal without a pod",
                    &[
                        ("cluster", cluster.name()),
                        ("process_group_id", group.process_group_id.as_str()),
                    ],
                );
                continue;
            }
            planned.push(PlannedPod {
                process_group_id: group.process_group_id.clone(),
                process_class: group.process_class.clone(),
            });
        }
        planned
    }

    /// Creates every planned pod, continuing past failures.
    pub fn apply(
        &self,
        cluster: &FoundationDBCluster,
        plan: Vec<PlannedPod>,
        materializer: &dyn PodMaterializer,
        recorder: &dyn EventRecorder,
    ) -> Result<usize, AddPodsError> {
        let mut created = 0;
        let mut failures = Vec::new();

        for planned in plan {
            let class = planned.process_class.as_str();
            log_info(
                COMPONENT,
                "Creating pod",
                &[
                    ("cluster", cluster.name()),
                    ("process_group_id", planned.process_group_id.as_str()),
                    ("process_class", class),
                ],
            );
            match materializer.create_pod(cluster, &planned.process_group_id, &planned.process_class)
            {
                Ok(_) => {
                    metrics::record_pod_created(class);
                    created += 1;
                }
                Err(err) => {
                    let error = err.to_string();
                    log_error(
                        COMPONENT,
                        "Failed to create pod",
                        &[
                            ("cluster", cluster.name()),
                            ("process_group_id", planned.process_group_id.as_str()),
                            ("error", error.as_str()),
                        ],
                    );
                    metrics::record_pod_creation_failure(class, err.reason());
                    recorder.record(
                        cluster,
                        EventType::Warning,
                        FAILURE_REASON,
                        &format!(
                            "failed to create pod for process group {}: {}",
                            planned.process_group_id, error
                        ),
                    );
                    failures.push(PodCreationFailure {
                        process_group_id: planned.process_group_id,
                        process_class: planned.process_class,
                        error: err,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(created)
        } else {
            Err(AddPodsError { failures })
        }
    }
}

impl ReconcileStep for AddPods {
    fn name(&self) -> &'static str {
        "add_pods"
    }

    fn reconcile(&self, ctx: &ReconcileContext, cluster: &FoundationDBCluster) -> Option<Requeue> {
        let collaborators = match Collaborators::resolve(ctx) {
            Ok(resolved) => resolved,
            Err(requeue) => return Some(requeue),
        };
        let Collaborators {
            inventory,
            pods,
            oracle,
            materializer,
            recorder,
        } = collaborators;

        let key = cluster.key();
        let observed = inventory
            .list_process_groups(&key)
            .and_then(|groups| pods.list_pods(&key).map(|pods| (groups, pods)));
        let (process_groups, existing_pods) = match observed {
            Ok(observed) => observed,
            Err(err) => {
                let cluster_name = key.to_string();
                let error = err.to_string();
                log_error(
                    COMPONENT,
                    "Failed to read process groups or pods",
                    &[("cluster", cluster_name.as_str()), ("error", error.as_str())],
                );
                return Some(Requeue::with_error(Arc::new(err)));
            }
        };

        let index = PodExistenceIndex::from_pods(cluster.name(), &existing_pods);
        let plan = self.plan(cluster, &process_groups, &index, oracle.as_ref());
        if plan.is_empty() {
            return None;
        }

        match self.apply(cluster, plan, materializer.as_ref(), recorder.as_ref()) {
            Ok(_) => None,
            Err(err) => {
                let needs_backoff = err.needs_backoff();
                let mut requeue = Requeue::with_error(Arc::new(err));
                if needs_backoff {
                    requeue.delayed = true;
                    requeue.delay = Some(Config::QuotaRequeueDelay.get_duration());
                }
                Some(requeue)
            }
        }
    }
}
