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

//! Read side of a reconciliation pass: persisted process groups and the
//! pods currently backing them.

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::fdbkube::api::cluster::{ClusterKey, LABEL_CLUSTER_NAME, LABEL_PROCESS_GROUP_ID};
use crate::fdbkube::api::process_group::{ProcessGroupId, ProcessGroupStatus};
use crate::fdbkube::k8s::pod::Pod;
use crate::fdbkube::k8s::store::{ObjectStore, StoreError};

#[derive(Debug)]
pub enum InventoryError {
    ClusterNotFound(ClusterKey),
    Store(StoreError),
}

impl Display for InventoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InventoryError::ClusterNotFound(key) => write!(f, "cluster {} not found", key),
            InventoryError::Store(err) => write!(f, "inventory read failed: {}", err),
        }
    }
}

impl Error for InventoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InventoryError::Store(err) => Some(err),
            InventoryError::ClusterNotFound(_) => None,
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        InventoryError::Store(err)
    }
}

/// Source of the process groups recorded on a cluster's status.
pub trait ProcessGroupInventory: Send + Sync {
    fn list_process_groups(
        &self,
        cluster: &ClusterKey,
    ) -> Result<Vec<ProcessGroupStatus>, InventoryError>;
}

/// Source of the pods that belong to a cluster.
pub trait PodLister: Send + Sync {
    fn list_pods(&self, cluster: &ClusterKey) -> Result<Vec<Pod>, InventoryError>;
}

impl ProcessGroupInventory for ObjectStore {
    fn list_process_groups(
        &self,
        cluster: &ClusterKey,
    ) -> Result<Vec<ProcessGroupStatus>, InventoryError> {
        self.get_cluster(cluster)?
            .map(|stored| stored.status.process_groups)
            .ok_or_else(|| InventoryError::ClusterNotFound(cluster.clone()))
    }
}

impl PodLister for ObjectStore {
    fn list_pods(&self, cluster: &ClusterKey) -> Result<Vec<Pod>, InventoryError> {
        Ok(ObjectStore::list_pods(
            self,
            Some(cluster.namespace.as_str()),
            &[(LABEL_CLUSTER_NAME, cluster.name.as_str())],
        )?)
    }
}

/// Process-group ids that currently have a pod, taken from pod labels.
#[derive(Debug, Default, Clone)]
pub struct PodExistenceIndex {
    process_groups: HashSet<ProcessGroupId>,
}

impl PodExistenceIndex {
    /// Indexes pods labelled with `cluster_name`; pods of other clusters and
    /// pods without a parseable process-group label are ignored.
    pub fn from_pods(cluster_name: &str, pods: &[Pod]) -> Self {
        let process_groups = pods
            .iter()
            .filter(|pod| pod.metadata.label(LABEL_CLUSTER_NAME) == Some(cluster_name))
            .filter_map(|pod| pod.metadata.label(LABEL_PROCESS_GROUP_ID))
            .filter_map(|value| ProcessGroupId::parse(value).ok())
            .collect();
        Self { process_groups }
    }

    pub fn pod_exists_for(&self, process_group_id: &ProcessGroupId) -> bool {
        self.process_groups.contains(process_group_id)
    }

    pub fn len(&self) -> usize {
        self.process_groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.process_groups.is_empty()
    }
}
