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

//! In-memory object store standing in for the platform API server.
//!
//! Objects are keyed by namespace and name. Every write bumps a store-wide
//! resource version; updates carrying a stale version are rejected with
//! [`StoreError::Conflict`], and pod creation honours an optional
//! per-namespace quota.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::event::{Event, EventLog, EventRecorder, EventType};
use super::persistentvolumeclaim::PersistentVolumeClaim;
use super::pod::{ObjectMeta, Pod};
use crate::fdbkube::api::cluster::{ClusterKey, FoundationDBCluster};

pub(crate) fn normalize_namespace(namespace: Option<&str>) -> String {
    namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or("default")
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: normalize_namespace(namespace),
            name: name.to_string(),
        }
    }

    fn from_meta(kind: &'static str, metadata: &ObjectMeta) -> Result<Self, StoreError> {
        let name = metadata
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or(StoreError::Invalid {
                kind,
                message: "metadata.name is required".to_string(),
            })?;
        Ok(Self::new(metadata.namespace.as_deref(), name))
    }
}

/// Errors raised by the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    AlreadyExists { kind: &'static str, name: String },
    NotFound { kind: &'static str, name: String },
    Conflict { kind: &'static str, name: String },
    QuotaExceeded { namespace: String, limit: usize },
    Invalid { kind: &'static str, message: String },
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Invalid { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }

    /// Short machine-readable reason used for metrics labels.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::AlreadyExists { .. } => "already_exists",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::QuotaExceeded { .. } => "quota_exceeded",
            StoreError::Invalid { .. } => "invalid",
            StoreError::Unavailable(_) => "unavailable",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists { kind, name } => {
                write!(f, "{} '{}' already exists", kind, name)
            }
            StoreError::NotFound { kind, name } => write!(f, "{} '{}' not found", kind, name),
            StoreError::Conflict { kind, name } => write!(
                f,
                "{} '{}' was modified concurrently; reload and retry",
                kind, name
            ),
            StoreError::QuotaExceeded { namespace, limit } => write!(
                f,
                "pod quota of {} exceeded in namespace '{}'",
                limit, namespace
            ),
            StoreError::Invalid { kind, message } => write!(f, "invalid {}: {}", kind, message),
            StoreError::Unavailable(message) => write!(f, "object store unavailable: {}", message),
        }
    }
}

impl Error for StoreError {}

#[derive(Default)]
struct StoreState {
    next_version: u64,
    clusters: HashMap<ObjectKey, FoundationDBCluster>,
    pods: HashMap<ObjectKey, Pod>,
    claims: HashMap<ObjectKey, PersistentVolumeClaim>,
    pod_quotas: HashMap<String, usize>,
}

impl StoreState {
    fn stamp(&mut self, metadata: &mut ObjectMeta) {
        self.next_version += 1;
        metadata.resource_version = Some(self.next_version.to_string());
        if metadata.uid.is_none() {
            metadata.uid = Some(format!("{:016x}", self.next_version));
        }
        metadata.namespace = Some(normalize_namespace(metadata.namespace.as_deref()));
    }
}

pub struct ObjectStore {
    state: RwLock<StoreState>,
    events: RwLock<EventLog>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            events: RwLock::new(EventLog::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    /// Limits the number of pods in `namespace`; `None` removes the limit.
    pub fn set_pod_quota(&self, namespace: Option<&str>, limit: Option<usize>) -> Result<(), StoreError> {
        let namespace = normalize_namespace(namespace);
        let mut state = self.write()?;
        match limit {
            Some(limit) => state.pod_quotas.insert(namespace, limit),
            None => state.pod_quotas.remove(&namespace),
        };
        Ok(())
    }

    pub fn create_cluster(
        &self,
        mut cluster: FoundationDBCluster,
    ) -> Result<FoundationDBCluster, StoreError> {
        let key = ObjectKey::from_meta("FoundationDBCluster", &cluster.metadata)?;
        let mut state = self.write()?;
        if state.clusters.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "FoundationDBCluster",
                name: key.name,
            });
        }
        cluster.metadata.generation = Some(1);
        state.stamp(&mut cluster.metadata);
        state.clusters.insert(key, cluster.clone());
        Ok(cluster)
    }

    /// Replaces a cluster; the caller's resource version must be current.
    pub fn update_cluster(
        &self,
        mut cluster: FoundationDBCluster,
    ) -> Result<FoundationDBCluster, StoreError> {
        let key = ObjectKey::from_meta("FoundationDBCluster", &cluster.metadata)?;
        let mut state = self.write()?;
        let current = state.clusters.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: "FoundationDBCluster",
            name: key.name.clone(),
        })?;
        if current.metadata.resource_version != cluster.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "FoundationDBCluster",
                name: key.name,
            });
        }
        cluster.metadata.uid = current.metadata.uid.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        cluster.metadata.generation = Some(if current.spec == cluster.spec {
            generation
        } else {
            generation + 1
        });
        state.stamp(&mut cluster.metadata);
        state.clusters.insert(key, cluster.clone());
        Ok(cluster)
    }

    pub fn get_cluster(&self, key: &ClusterKey) -> Result<Option<FoundationDBCluster>, StoreError> {
        let state = self.read()?;
        Ok(state
            .clusters
            .get(&ObjectKey::new(Some(key.namespace.as_str()), &key.name))
            .cloned())
    }

    pub fn create_pod(&self, mut pod: Pod) -> Result<Pod, StoreError> {
        let key = ObjectKey::from_meta("Pod", &pod.metadata)?;
        let mut state = self.write()?;
        if state.pods.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Pod",
                name: key.name,
            });
        }
        if let Some(limit) = state.pod_quotas.get(&key.namespace).copied() {
            let used = state
                .pods
                .keys()
                .filter(|existing| existing.namespace == key.namespace)
                .count();
            if used >= limit {
                return Err(StoreError::QuotaExceeded {
                    namespace: key.namespace,
                    limit,
                });
            }
        }
        state.stamp(&mut pod.metadata);
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    pub fn get_pod(&self, namespace: Option<&str>, name: &str) -> Result<Option<Pod>, StoreError> {
        let state = self.read()?;
        Ok(state.pods.get(&ObjectKey::new(namespace, name)).cloned())
    }

    pub fn delete_pod(&self, namespace: Option<&str>, name: &str) -> Result<Pod, StoreError> {
        let mut state = self.write()?;
        state
            .pods
            .remove(&ObjectKey::new(namespace, name))
            .ok_or_else(|| StoreError::NotFound {
                kind: "Pod",
                name: name.to_string(),
            })
    }

    /// Lists pods in `namespace` carrying every `(key, value)` label pair,
    /// sorted by name.
    pub fn list_pods(
        &self,
        namespace: Option<&str>,
        selector: &[(&str, &str)],
    ) -> Result<Vec<Pod>, StoreError> {
        let namespace = normalize_namespace(namespace);
        let state = self.read()?;
        let mut pods: Vec<Pod> = state
            .pods
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .filter(|(_, pod)| {
                selector
                    .iter()
                    .all(|(label, value)| pod.metadata.label(label) == Some(*value))
            })
            .map(|(_, pod)| pod.clone())
            .collect();
        pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(pods)
    }

    pub fn create_claim(
        &self,
        mut claim: PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let key = ObjectKey::from_meta("PersistentVolumeClaim", &claim.metadata)?;
        let mut state = self.write()?;
        if state.claims.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "PersistentVolumeClaim",
                name: key.name,
            });
        }
        state.stamp(&mut claim.metadata);
        state.claims.insert(key, claim.clone());
        Ok(claim)
    }

    pub fn get_claim(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, StoreError> {
        let state = self.read()?;
        Ok(state.claims.get(&ObjectKey::new(namespace, name)).cloned())
    }

    /// Events whose involved object is the given cluster, oldest first.
    pub fn events_for(&self, key: &ClusterKey) -> Vec<Event> {
        let Ok(events) = self.events.read() else {
            return Vec::new();
        };
        events
            .iter()
            .filter(|event| {
                event.involved_object.name.as_deref() == Some(key.name.as_str())
                    && event.involved_object.namespace.as_deref() == Some(key.namespace.as_str())
            })
            .cloned()
            .collect()
    }
}

impl EventRecorder for ObjectStore {
    fn record(
        &self,
        cluster: &FoundationDBCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let mut event = Event::for_cluster(cluster, event_type, reason, message);
        if let Ok(mut state) = self.state.write() {
            state.stamp(&mut event.metadata);
            event.metadata.name = Some(format!(
                "{}.{}",
                cluster.name(),
                event.metadata.resource_version.as_deref().unwrap_or_default()
            ));
        }
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }
}
