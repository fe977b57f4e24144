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

use std::collections::VecDeque;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::pod::ObjectMeta;
use crate::fdbkube::api::cluster::FoundationDBCluster;

const DEFAULT_EVENT_RETENTION: usize = 1024;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Minimal representation of Kubernetes core/v1 Event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub involved_object: ObjectReference,
    pub reason: String,
    pub message: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub first_timestamp: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_component: Option<String>,
}

impl Event {
    /// Builds an event about `cluster`; name and resource version are
    /// assigned by the sink that stores it.
    pub fn for_cluster(
        cluster: &FoundationDBCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Event".to_string(),
            metadata: ObjectMeta {
                namespace: cluster.metadata.namespace.clone(),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(cluster.api_version.clone()),
                kind: Some(cluster.kind.clone()),
                name: cluster.metadata.name.clone(),
                namespace: cluster.metadata.namespace.clone(),
                uid: cluster.metadata.uid.clone(),
            },
            reason: reason.to_string(),
            message: message.to_string(),
            event_type,
            first_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            count: 1,
            reporting_component: Some("fdbkube".to_string()),
        }
    }
}

/// Sink for cluster-scoped events surfaced to operators.
pub trait EventRecorder: Send + Sync {
    fn record(
        &self,
        cluster: &FoundationDBCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

/// Bounded in-memory event history; the oldest entries are evicted first.
pub(crate) struct EventLog {
    records: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub(crate) fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_RETENTION)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_RETENTION)),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, event: Event) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(event);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Event> {
        self.records.iter()
    }
}
