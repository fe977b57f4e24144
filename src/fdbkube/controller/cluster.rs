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

//! Control loop driving reconciliation passes for FoundationDB clusters.

use std::sync::Arc;

use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;

use crate::fdbkube::api::cluster::ClusterKey;
use crate::fdbkube::config::Config;
use crate::fdbkube::controller::add_pods::AddPods;
use crate::fdbkube::controller::inventory::{PodLister, ProcessGroupInventory};
use crate::fdbkube::controller::materializer::{PodMaterializer, TemplatePodMaterializer};
use crate::fdbkube::controller::reconcile::{ClusterReconciler, ReconcileStep, Requeue};
use crate::fdbkube::controller::runtime::ControllerRuntime;
use crate::fdbkube::fdb::admin::FaultToleranceOracle;
use crate::fdbkube::k8s::event::EventRecorder;
use crate::fdbkube::k8s::store::ObjectStore;
use crate::fdbkube::logger::{self, log_debug, log_error, log_info, log_warn};
use crate::fdbkube::observability::metrics::{self, ControllerReconcileResult};
use crate::fdbkube::observability::tracing::{self, bind_current, with_span};
use crate::fdbkube::util::{new_error, with_context};

const COMPONENT: &str = "cluster-controller";
const CONTROLLER_NAME: &str = "foundationdbcluster";

pub struct ClusterController {
    runtime: Arc<ControllerRuntime>,
    store: Arc<ObjectStore>,
    reconciler: Arc<ClusterReconciler>,
}

impl ClusterController {
    pub fn new(
        runtime: Arc<ControllerRuntime>,
        store: Arc<ObjectStore>,
        reconciler: ClusterReconciler,
    ) -> Self {
        Self {
            runtime,
            store,
            reconciler: Arc::new(reconciler),
        }
    }

    /// Wires the store-backed collaborators and `oracle` into `runtime` and
    /// builds the default step list.
    pub fn with_defaults(
        runtime: Arc<ControllerRuntime>,
        store: Arc<ObjectStore>,
        oracle: Arc<dyn FaultToleranceOracle>,
    ) -> Self {
        register_store_dependencies(&runtime, &store);
        runtime.register_handle::<dyn FaultToleranceOracle>(oracle);
        Self::new(runtime, store, ClusterReconciler::new(default_steps()))
    }

    pub fn runtime(&self) -> &Arc<ControllerRuntime> {
        &self.runtime
    }

    pub async fn enqueue(&self, key: ClusterKey) -> Result<(), SendError<ClusterKey>> {
        self.runtime.work_queue().enqueue(key).await
    }

    /// Runs one reconciliation pass for `key`. A cluster that no longer
    /// exists needs no work. The steps run on the blocking pool because the
    /// oracle and store calls are synchronous.
    pub async fn run_once(&self, key: &ClusterKey) -> Option<Requeue> {
        let span_name = format!("reconcile {}", key);
        let requeue = with_span(COMPONENT, span_name, async {
            let cluster_name = key.to_string();
            let cluster = match self.store.get_cluster(key) {
                Ok(Some(cluster)) => cluster,
                Ok(None) => {
                    log_debug(
                        COMPONENT,
                        "Cluster no longer exists; nothing to reconcile",
                        &[("cluster", cluster_name.as_str())],
                    );
                    return None;
                }
                Err(err) => {
                    let err = with_context(err, format!("loading cluster {}", key));
                    return Some(Requeue::with_error(Arc::from(err)));
                }
            };

            let runtime = Arc::clone(&self.runtime);
            let reconciler = Arc::clone(&self.reconciler);
            let pass = tokio::task::spawn_blocking(bind_current(move || {
                reconciler.run(&runtime.context(), &cluster)
            }))
            .await;
            let requeue = match pass {
                Ok(requeue) => requeue,
                Err(join_err) => {
                    let error_message = join_err.to_string();
                    log_error(
                        COMPONENT,
                        "Reconcile pass panicked",
                        &[
                            ("cluster", cluster_name.as_str()),
                            ("error", error_message.as_str()),
                        ],
                    );
                    Some(Requeue::with_error(Arc::from(new_error(format!(
                        "reconcile pass for {} panicked: {}",
                        key, error_message
                    )))))
                }
            };
            match &requeue {
                Some(requeue) => {
                    let message = requeue.to_string();
                    log_info(
                        COMPONENT,
                        "Cluster needs another pass",
                        &[
                            ("cluster", cluster_name.as_str()),
                            ("requeue", message.as_str()),
                        ],
                    );
                }
                None => log_debug(
                    COMPONENT,
                    "Cluster reconciled",
                    &[("cluster", cluster_name.as_str())],
                ),
            }
            requeue
        })
        .await;

        let result = match &requeue {
            None => ControllerReconcileResult::Success,
            Some(requeue) if requeue.is_error() => ControllerReconcileResult::Error,
            Some(_) => ControllerReconcileResult::Requeue,
        };
        metrics::record_controller_reconcile(CONTROLLER_NAME, result);
        requeue
    }

    /// Starts the executor. Keys that need another pass are enqueued again
    /// after the requeue delay, or `FDBKUBE_REQUEUE_DELAY_SECS` when the
    /// requeue names none.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        logger::init_from_config();
        tracing::init();
        let controller = Arc::clone(&self);
        self.runtime.spawn_executor(move |key| {
            let controller = Arc::clone(&controller);
            async move {
                let Some(requeue) = controller.run_once(&key).await else {
                    return;
                };
                let delay = requeue
                    .delay
                    .unwrap_or_else(|| Config::RequeueDelay.get_duration());
                let queue = controller.runtime.work_queue();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(SendError(key)) = queue.enqueue(key).await {
                        let cluster = key.to_string();
                        log_warn(
                            COMPONENT,
                            "Work queue closed; dropping requeue",
                            &[("cluster", cluster.as_str())],
                        );
                    }
                });
            }
        })
    }
}

/// Registers `store` as inventory, pod lister and event recorder, plus a
/// materializer writing into it.
pub fn register_store_dependencies(runtime: &ControllerRuntime, store: &Arc<ObjectStore>) {
    runtime.register_handle::<dyn ProcessGroupInventory>(store.clone());
    runtime.register_handle::<dyn PodLister>(store.clone());
    runtime.register_handle::<dyn EventRecorder>(store.clone());
    runtime.register_handle::<dyn PodMaterializer>(Arc::new(TemplatePodMaterializer::new(
        Arc::clone(store),
    )));
}

pub fn default_steps() -> Vec<Box<dyn ReconcileStep>> {
    vec![Box::new(AddPods::new())]
}
