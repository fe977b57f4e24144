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

//! Helpers shared by unit and integration tests.

use std::sync::Arc;

use crate::fdbkube::api::cluster::{
    ClusterKey, ClusterSpec, ClusterStatus, FoundationDBCluster, StorageSpec,
};
use crate::fdbkube::api::process_group::{ProcessClass, ProcessGroupId, ProcessGroupStatus};
use crate::fdbkube::controller::cluster::{
    default_steps, register_store_dependencies, ClusterController,
};
use crate::fdbkube::controller::reconcile::{ClusterReconciler, Requeue};
use crate::fdbkube::controller::runtime::ControllerRuntime;
use crate::fdbkube::fdb::admin::FaultToleranceOracle;
use crate::fdbkube::fdb::fixtures::FixtureOracle;
use crate::fdbkube::k8s::pod::Pod;
use crate::fdbkube::k8s::store::ObjectStore;

pub const TEST_CLUSTER_NAME: &str = "operator-test-1";
pub const TEST_NAMESPACE: &str = "my-ns";

/// Cluster with four storage, four log and four stateless process groups
/// plus a cluster controller, none marked for removal.
pub fn default_cluster() -> FoundationDBCluster {
    let spec = ClusterSpec {
        version: "7.1.26".to_string(),
        image: None,
        storage: StorageSpec {
            size: Some("16G".to_string()),
            storage_class_name: None,
        },
        ..Default::default()
    };
    let mut cluster = FoundationDBCluster::new(Some(TEST_NAMESPACE), TEST_CLUSTER_NAME, spec);
    let mut groups = Vec::new();
    for class in [ProcessClass::Storage, ProcessClass::Log, ProcessClass::Stateless] {
        for number in 1..=4 {
            groups.push(ProcessGroupStatus::new(
                ProcessGroupId::new(&class, number),
                class.clone(),
                Vec::new(),
            ));
        }
    }
    groups.push(ProcessGroupStatus::new(
        ProcessGroupId::new(&ProcessClass::ClusterController, 1),
        ProcessClass::ClusterController,
        Vec::new(),
    ));
    cluster.status = ClusterStatus {
        process_groups: groups,
    };
    cluster
}

/// Store, runtime and oracle wired together around [`default_cluster`].
pub struct TestHarness {
    pub runtime: Arc<ControllerRuntime>,
    pub store: Arc<ObjectStore>,
    pub oracle: Arc<FixtureOracle>,
    pub key: ClusterKey,
}

impl TestHarness {
    /// Persists the default cluster without creating any pods.
    pub fn new(oracle: FixtureOracle) -> Self {
        let runtime = Arc::new(ControllerRuntime::with_capacity(16));
        let store = Arc::new(ObjectStore::new());
        let oracle = Arc::new(oracle);
        register_store_dependencies(&runtime, &store);
        runtime.register_handle::<dyn FaultToleranceOracle>(oracle.clone());
        let cluster = store
            .create_cluster(default_cluster())
            .expect("persist default cluster");
        Self {
            runtime,
            store,
            oracle,
            key: cluster.key(),
        }
    }

    /// Like [`TestHarness::new`], with a pod already running for every
    /// process group.
    pub fn reconciled(oracle: FixtureOracle) -> Self {
        let harness = Self::new(oracle);
        assert!(
            harness.reconcile().is_none(),
            "initial reconciliation should converge"
        );
        harness
    }

    pub fn cluster(&self) -> FoundationDBCluster {
        self.store
            .get_cluster(&self.key)
            .expect("read cluster")
            .expect("cluster exists")
    }

    /// Applies `mutate` to the stored cluster status.
    pub fn update_status(&self, mutate: impl FnOnce(&mut ClusterStatus)) {
        let mut cluster = self.cluster();
        mutate(&mut cluster.status);
        self.store.update_cluster(cluster).expect("update cluster");
    }

    pub fn add_process_group(&self, class: ProcessClass, number: u32) -> ProcessGroupId {
        let id = ProcessGroupId::new(&class, number);
        let status = ProcessGroupStatus::new(id.clone(), class, Vec::new());
        self.update_status(|current| current.process_groups.push(status));
        id
    }

    pub fn mark_for_removal(&self, id: &ProcessGroupId) {
        self.update_status(|current| {
            for group in current
                .process_groups
                .iter_mut()
                .filter(|group| &group.process_group_id == id)
            {
                group.mark_for_removal();
            }
        });
    }

    pub fn delete_pod(&self, id: &ProcessGroupId) {
        let name = self.cluster().pod_name(id);
        self.store
            .delete_pod(Some(self.key.namespace.as_str()), &name)
            .expect("delete pod");
    }

    /// Runs the default step list once against the stored cluster.
    pub fn reconcile(&self) -> Option<Requeue> {
        ClusterReconciler::new(default_steps()).run(&self.runtime.context(), &self.cluster())
    }

    pub fn controller(&self) -> ClusterController {
        ClusterController::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.store),
            ClusterReconciler::new(default_steps()),
        )
    }

    /// Pods of the cluster, sorted by name.
    pub fn pods(&self) -> Vec<Pod> {
        self.store
            .list_pods(Some(self.key.namespace.as_str()), &[])
            .expect("list pods")
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods()
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect()
    }
}
