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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Role of a database process; selects the pod template the materializer uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessClass {
    Storage,
    Log,
    Transaction,
    Stateless,
    ClusterController,
    Proxy,
    CommitProxy,
    GrvProxy,
    Resolution,
    Test,
    Other(String),
}

impl ProcessClass {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessClass::Storage => "storage",
            ProcessClass::Log => "log",
            ProcessClass::Transaction => "transaction",
            ProcessClass::Stateless => "stateless",
            ProcessClass::ClusterController => "cluster_controller",
            ProcessClass::Proxy => "proxy",
            ProcessClass::CommitProxy => "commit_proxy",
            ProcessClass::GrvProxy => "grv_proxy",
            ProcessClass::Resolution => "resolution",
            ProcessClass::Test => "test",
            ProcessClass::Other(name) => name.as_str(),
        }
    }

    /// Classes whose processes keep durable data and therefore get a volume claim.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ProcessClass::Storage | ProcessClass::Log | ProcessClass::Transaction
        )
    }
}

impl From<&str> for ProcessClass {
    fn from(value: &str) -> Self {
        match value {
            "storage" => ProcessClass::Storage,
            "log" => ProcessClass::Log,
            "transaction" => ProcessClass::Transaction,
            "stateless" => ProcessClass::Stateless,
            "cluster_controller" => ProcessClass::ClusterController,
            "proxy" => ProcessClass::Proxy,
            "commit_proxy" => ProcessClass::CommitProxy,
            "grv_proxy" => ProcessClass::GrvProxy,
            "resolution" => ProcessClass::Resolution,
            "test" => ProcessClass::Test,
            other => ProcessClass::Other(other.to_string()),
        }
    }
}

impl From<String> for ProcessClass {
    fn from(value: String) -> Self {
        ProcessClass::from(value.as_str())
    }
}

impl From<ProcessClass> for String {
    fn from(value: ProcessClass) -> Self {
        value.as_str().to_string()
    }
}

impl Display for ProcessClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a process group, rendered as `<prefix>-<number>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProcessGroupId(String);

impl ProcessGroupId {
    pub fn new(process_class: &ProcessClass, number: u32) -> Self {
        Self(format!("{}-{}", process_class.as_str(), number))
    }

    /// Validates `value` has a non-empty prefix and a numeric suffix.
    pub fn parse(value: &str) -> Result<Self, ProcessGroupIdError> {
        let (prefix, number) = value
            .rsplit_once('-')
            .ok_or_else(|| ProcessGroupIdError(value.to_string()))?;
        if prefix.is_empty() || number.is_empty() || number.parse::<u32>().is_err() {
            return Err(ProcessGroupIdError(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric index, or `None` for ids that were never validated.
    pub fn number(&self) -> Option<u32> {
        self.0.rsplit_once('-')?.1.parse().ok()
    }
}

impl FromStr for ProcessGroupId {
    type Err = ProcessGroupIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ProcessGroupId::parse(value)
    }
}

impl TryFrom<String> for ProcessGroupId {
    type Error = ProcessGroupIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProcessGroupId::parse(&value)
    }
}

impl From<ProcessGroupId> for String {
    fn from(value: ProcessGroupId) -> Self {
        value.0
    }
}

impl Display for ProcessGroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroupIdError(String);

impl Display for ProcessGroupIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid process group id '{}': expected <prefix>-<number>",
            self.0
        )
    }
}

impl Error for ProcessGroupIdError {}

/// Persisted status of one process group on the cluster resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroupStatus {
    #[serde(rename = "processGroupID")]
    pub process_group_id: ProcessGroupId,
    pub process_class: ProcessClass,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_group_conditions: Vec<ProcessGroupCondition>,
}

/// Condition observed on a process group, such as a missing process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroupCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Unix seconds at which the condition was first seen.
    pub timestamp: i64,
}

impl ProcessGroupStatus {
    pub fn new(
        process_group_id: ProcessGroupId,
        process_class: ProcessClass,
        addresses: Vec<String>,
    ) -> Self {
        Self {
            process_group_id,
            process_class,
            addresses,
            removal_timestamp: None,
            process_group_conditions: Vec::new(),
        }
    }

    /// Flags the group for decommission. The first mark wins.
    pub fn mark_for_removal(&mut self) {
        if self.removal_timestamp.is_none() {
            self.removal_timestamp = Some(Utc::now());
        }
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.removal_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_group_id_requires_numeric_suffix() {
        let id = ProcessGroupId::parse("storage-9").expect("valid id");
        assert_eq!(id.number(), Some(9));
        assert_eq!(
            ProcessGroupId::parse("cluster_controller-1")
                .expect("valid id")
                .number(),
            Some(1)
        );
        assert!(ProcessGroupId::parse("storage").is_err());
        assert!(ProcessGroupId::parse("storage-").is_err());
        assert!(ProcessGroupId::parse("-3").is_err());
        assert!(ProcessGroupId::parse("storage-x").is_err());
    }

    #[test]
    fn process_group_id_uses_class_name_as_prefix() {
        let id = ProcessGroupId::new(&ProcessClass::ClusterController, 2);
        assert_eq!(id.as_str(), "cluster_controller-2");
    }

    #[test]
    fn process_class_round_trips_unknown_names() {
        let class = ProcessClass::from("coordinator");
        assert_eq!(class, ProcessClass::Other("coordinator".to_string()));
        assert_eq!(class.as_str(), "coordinator");
        assert!(!class.is_stateful());
        assert!(ProcessClass::Log.is_stateful());
    }

    #[test]
    fn mark_for_removal_keeps_first_timestamp() {
        let mut status = ProcessGroupStatus::new(
            ProcessGroupId::parse("storage-1").expect("id"),
            ProcessClass::Storage,
            Vec::new(),
        );
        assert!(!status.is_marked_for_removal());
        status.mark_for_removal();
        let first = status.removal_timestamp;
        status.mark_for_removal();
        assert!(status.is_marked_for_removal());
        assert_eq!(status.removal_timestamp, first);
    }

    #[test]
    fn status_deserializes_operator_field_names() {
        let raw = r#"{"processGroupID":"log-2","processClass":"log","removalTimestamp":"2024-05-01T10:00:00Z"}"#;
        let status: ProcessGroupStatus = serde_json::from_str(raw).expect("decode status");
        assert_eq!(status.process_group_id.as_str(), "log-2");
        assert_eq!(status.process_class, ProcessClass::Log);
        assert!(status.is_marked_for_removal());
    }

    #[test]
    fn status_rejects_malformed_process_group_id() {
        let raw = r#"{"processGroupID":"storage","processClass":"storage"}"#;
        let err = serde_json::from_str::<ProcessGroupStatus>(raw).expect_err("id without index");
        assert!(err.to_string().contains("invalid process group id 'storage'"));

        let id: ProcessGroupId = serde_json::from_str("\"storage-3\"").expect("valid id");
        assert_eq!(serde_json::to_string(&id).expect("encode id"), "\"storage-3\"");
    }
}
