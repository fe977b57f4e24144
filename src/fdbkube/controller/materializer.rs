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

//! Builds and submits the pod backing a process group.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::fdbkube::api::cluster::{
    FoundationDBCluster, LABEL_CLUSTER_NAME, LABEL_PROCESS_CLASS, LABEL_PROCESS_GROUP_ID,
};
use crate::fdbkube::api::process_group::{ProcessClass, ProcessGroupId};
use crate::fdbkube::k8s::persistentvolumeclaim::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec,
};
use crate::fdbkube::k8s::pod::{
    ContainerEnvVar, ContainerSpec, EmptyDirVolumeSource, ObjectMeta, OwnerReference,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, VolumeMount, VolumeSpec,
};
use crate::fdbkube::k8s::store::{ObjectStore, StoreError};
use crate::fdbkube::logger::log_debug;

const COMPONENT: &str = "pod-materializer";
const MAIN_CONTAINER: &str = "foundationdb";
const DATA_VOLUME: &str = "data";
const DATA_MOUNT_PATH: &str = "/var/fdb/data";

#[derive(Debug)]
pub enum MaterializeError {
    Store(StoreError),
    InvalidProcessGroup(String),
}

impl MaterializeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MaterializeError::Store(err) => err.is_retryable(),
            MaterializeError::InvalidProcessGroup(_) => false,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, MaterializeError::Store(err) if err.is_quota_exceeded())
    }

    /// Short machine-readable reason used for metrics labels.
    pub fn reason(&self) -> &'static str {
        match self {
            MaterializeError::Store(err) => err.reason(),
            MaterializeError::InvalidProcessGroup(_) => "invalid_process_group",
        }
    }
}

impl Display for MaterializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MaterializeError::Store(err) => write!(f, "pod creation failed: {}", err),
            MaterializeError::InvalidProcessGroup(message) => {
                write!(f, "cannot build pod: {}", message)
            }
        }
    }
}

impl Error for MaterializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MaterializeError::Store(err) => Some(err),
            MaterializeError::InvalidProcessGroup(_) => None,
        }
    }
}

impl From<StoreError> for MaterializeError {
    fn from(err: StoreError) -> Self {
        MaterializeError::Store(err)
    }
}

/// Creates the pod for one process group of a cluster.
pub trait PodMaterializer: Send + Sync {
    fn create_pod(
        &self,
        cluster: &FoundationDBCluster,
        process_group_id: &ProcessGroupId,
        process_class: &ProcessClass,
    ) -> Result<Pod, MaterializeError>;
}

/// Materializer that renders pods from the cluster spec into an [`ObjectStore`].
pub struct TemplatePodMaterializer {
    store: Arc<ObjectStore>,
}

impl TemplatePodMaterializer {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }

    fn owner(cluster: &FoundationDBCluster) -> Result<OwnerReference, MaterializeError> {
        cluster.owner_reference().ok_or_else(|| {
            MaterializeError::InvalidProcessGroup(format!(
                "cluster '{}' has no uid to own its pods",
                cluster.name()
            ))
        })
    }

    fn ensure_claim(
        &self,
        cluster: &FoundationDBCluster,
        claim_name: &str,
        labels: &HashMap<String, String>,
        owner: &OwnerReference,
    ) -> Result<(), MaterializeError> {
        let namespace = cluster.metadata.namespace.as_deref();
        if self.store.get_claim(namespace, claim_name)?.is_some() {
            return Ok(());
        }
        let metadata = ObjectMeta {
            name: Some(claim_name.to_string()),
            namespace: cluster.metadata.namespace.clone(),
            labels: labels.clone(),
            owner_references: vec![owner.clone()],
            ..Default::default()
        };
        let spec = PersistentVolumeClaimSpec::with_storage(
            cluster.storage_size(),
            cluster.spec.storage.storage_class_name.clone(),
        );
        match self
            .store
            .create_claim(PersistentVolumeClaim::new(metadata, spec))
        {
            Ok(_) => {
                log_debug(
                    COMPONENT,
                    "Created volume claim",
                    &[("cluster", cluster.name()), ("claim", claim_name)],
                );
                Ok(())
            }
            // Created by a concurrent pass between the lookup and the create.
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Labels identifying the pod of `process_group_id`; cluster pod labels are
/// applied first so the identity labels always win.
pub fn pod_labels(
    cluster: &FoundationDBCluster,
    process_group_id: &ProcessGroupId,
    process_class: &ProcessClass,
) -> HashMap<String, String> {
    let mut labels = cluster.spec.pod_labels.clone();
    labels.insert(LABEL_CLUSTER_NAME.to_string(), cluster.name().to_string());
    labels.insert(
        LABEL_PROCESS_CLASS.to_string(),
        process_class.as_str().to_string(),
    );
    labels.insert(
        LABEL_PROCESS_GROUP_ID.to_string(),
        process_group_id.to_string(),
    );
    labels
}

impl PodMaterializer for TemplatePodMaterializer {
    fn create_pod(
        &self,
        cluster: &FoundationDBCluster,
        process_group_id: &ProcessGroupId,
        process_class: &ProcessClass,
    ) -> Result<Pod, MaterializeError> {
        ProcessGroupId::parse(process_group_id.as_str())
            .map_err(|err| MaterializeError::InvalidProcessGroup(err.to_string()))?;
        let owner = Self::owner(cluster)?;
        let pod_name = cluster.pod_name(process_group_id);
        let labels = pod_labels(cluster, process_group_id, process_class);

        let data_volume = if process_class.is_stateful() {
            let claim_name = format!("{}-data", pod_name);
            self.ensure_claim(cluster, &claim_name, &labels, &owner)?;
            VolumeSpec {
                name: DATA_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name,
                    read_only: None,
                }),
                empty_dir: None,
            }
        } else {
            VolumeSpec {
                name: DATA_VOLUME.to_string(),
                persistent_volume_claim: None,
                empty_dir: Some(EmptyDirVolumeSource::default()),
            }
        };

        let container = ContainerSpec {
            name: MAIN_CONTAINER.to_string(),
            image: Some(cluster.image()),
            args: Vec::new(),
            env: vec![
                ContainerEnvVar {
                    name: "FDB_PROCESS_CLASS".to_string(),
                    value: process_class.as_str().to_string(),
                },
                ContainerEnvVar {
                    name: "FDB_INSTANCE_ID".to_string(),
                    value: process_group_id.to_string(),
                },
            ],
            volume_mounts: vec![VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                read_only: None,
            }],
        };

        let metadata = ObjectMeta {
            name: Some(pod_name),
            namespace: cluster.metadata.namespace.clone(),
            labels,
            owner_references: vec![owner],
            ..Default::default()
        };
        let spec = PodSpec {
            containers: vec![container],
            volumes: vec![data_volume],
            restart_policy: Some("Always".to_string()),
            service_account_name: None,
        };

        Ok(self.store.create_pod(Pod::new(metadata, spec))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdbkube::api::cluster::ClusterSpec;

    fn persisted_cluster(store: &ObjectStore) -> FoundationDBCluster {
        let mut spec = ClusterSpec {
            version: "7.1.26".to_string(),
            ..Default::default()
        };
        spec.pod_labels
            .insert(LABEL_CLUSTER_NAME.to_string(), "overridden".to_string());
        spec.pod_labels
            .insert("team".to_string(), "storage".to_string());
        store
            .create_cluster(FoundationDBCluster::new(None, "operator-test-1", spec))
            .expect("create cluster")
    }

    #[test]
    fn stateful_pod_gets_claim_labels_and_owner() {
        let store = Arc::new(ObjectStore::new());
        let cluster = persisted_cluster(&store);
        let materializer = TemplatePodMaterializer::new(Arc::clone(&store));
        let id = ProcessGroupId::new(&ProcessClass::Storage, 9);

        let pod = materializer
            .create_pod(&cluster, &id, &ProcessClass::Storage)
            .expect("create pod");
        assert_eq!(pod.name(), Some("operator-test-1-storage-9"));
        assert_eq!(
            pod.metadata.label(LABEL_CLUSTER_NAME),
            Some("operator-test-1")
        );
        assert_eq!(pod.metadata.label(LABEL_PROCESS_CLASS), Some("storage"));
        assert_eq!(pod.metadata.label(LABEL_PROCESS_GROUP_ID), Some("storage-9"));
        assert_eq!(pod.metadata.label("team"), Some("storage"));

        let owner = &pod.metadata.owner_references[0];
        assert_eq!(owner.kind, "FoundationDBCluster");
        assert_eq!(owner.block_owner_deletion, Some(true));

        let claim = store
            .get_claim(None, "operator-test-1-storage-9-data")
            .expect("claim lookup")
            .expect("claim exists");
        assert_eq!(claim.metadata.owner_references[0].uid, owner.uid);
        let volume = &pod.spec.volumes[0];
        assert_eq!(
            volume
                .persistent_volume_claim
                .as_ref()
                .map(|source| source.claim_name.as_str()),
            Some("operator-test-1-storage-9-data")
        );
    }

    #[test]
    fn stateless_pod_uses_scratch_volume_and_existing_claim_is_reused() {
        let store = Arc::new(ObjectStore::new());
        let cluster = persisted_cluster(&store);
        let materializer = TemplatePodMaterializer::new(Arc::clone(&store));

        let stateless = ProcessGroupId::new(&ProcessClass::Stateless, 1);
        let pod = materializer
            .create_pod(&cluster, &stateless, &ProcessClass::Stateless)
            .expect("create stateless pod");
        assert!(pod.spec.volumes[0].empty_dir.is_some());
        assert!(store
            .get_claim(None, "operator-test-1-stateless-1-data")
            .expect("claim lookup")
            .is_none());

        let log = ProcessGroupId::new(&ProcessClass::Log, 1);
        materializer
            .create_pod(&cluster, &log, &ProcessClass::Log)
            .expect("first log pod");
        store
            .delete_pod(None, "operator-test-1-log-1")
            .expect("delete pod");
        materializer
            .create_pod(&cluster, &log, &ProcessClass::Log)
            .expect("recreate keeps claim");
    }

    #[test]
    fn duplicate_pod_is_a_retryable_store_error() {
        let store = Arc::new(ObjectStore::new());
        let cluster = persisted_cluster(&store);
        let materializer = TemplatePodMaterializer::new(Arc::clone(&store));
        let id = ProcessGroupId::new(&ProcessClass::Stateless, 2);
        materializer
            .create_pod(&cluster, &id, &ProcessClass::Stateless)
            .expect("first create");
        let err = materializer
            .create_pod(&cluster, &id, &ProcessClass::Stateless)
            .expect_err("duplicate");
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "already_exists");
    }

    #[test]
    fn unpersisted_cluster_is_rejected() {
        let store = Arc::new(ObjectStore::new());
        let cluster = FoundationDBCluster::new(None, "draft", ClusterSpec::default());
        let materializer = TemplatePodMaterializer::new(store);
        let err = materializer
            .create_pod(
                &cluster,
                &ProcessGroupId::new(&ProcessClass::Storage, 1),
                &ProcessClass::Storage,
            )
            .expect_err("no uid");
        assert!(!err.is_retryable());
    }
}
