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

use crate::fdbkube::api::process_group::{ProcessGroupId, ProcessGroupStatus};
use crate::fdbkube::k8s::pod::{ObjectMeta, OwnerReference};
use crate::fdbkube::k8s::store::normalize_namespace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

pub const CLUSTER_API_VERSION: &str = "apps.foundationdb.org/v1beta2";
pub const CLUSTER_KIND: &str = "FoundationDBCluster";

/// Label tying pods and claims to the cluster that owns them.
pub const LABEL_CLUSTER_NAME: &str = "foundationdb.org/fdb-cluster-name";
/// Label carrying the process class a pod runs.
pub const LABEL_PROCESS_CLASS: &str = "foundationdb.org/fdb-process-class";
/// Label carrying the process group id a pod backs.
pub const LABEL_PROCESS_GROUP_ID: &str = "foundationdb.org/fdb-process-group-id";

const DEFAULT_STORAGE_SIZE: &str = "128G";
const DEFAULT_IMAGE: &str = "foundationdb/foundationdb";

/// Identity of a cluster; all controller state is partitioned by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: normalize_namespace(namespace),
            name: name.into(),
        }
    }
}

impl Display for ClusterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub storage: StorageSpec,
    /// Extra labels stamped on every pod of the cluster.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pod_labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_groups: Vec<ProcessGroupStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationDBCluster {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl FoundationDBCluster {
    pub fn new(namespace: Option<&str>, name: &str, spec: ClusterSpec) -> Self {
        Self {
            api_version: CLUSTER_API_VERSION.to_string(),
            kind: CLUSTER_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(normalize_namespace(namespace)),
                ..Default::default()
            },
            spec,
            status: ClusterStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(self.metadata.namespace.as_deref(), self.name())
    }

    /// Canonical pod name for a process group: `<cluster>-<process-group-id>`.
    pub fn pod_name(&self, process_group_id: &ProcessGroupId) -> String {
        format!("{}-{}", self.name(), process_group_id)
    }

    pub fn image(&self) -> String {
        let base = self.spec.image.as_deref().unwrap_or(DEFAULT_IMAGE);
        if self.spec.version.is_empty() {
            base.to_string()
        } else {
            format!("{}:{}", base, self.spec.version)
        }
    }

    pub fn storage_size(&self) -> &str {
        self.spec.storage.size.as_deref().unwrap_or(DEFAULT_STORAGE_SIZE)
    }

    /// Owner reference stamped on dependents. `None` until the store has
    /// assigned the cluster a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.metadata.uid.clone()?;
        Some(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name().to_string(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}
