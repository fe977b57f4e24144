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

//! Subset of the database's machine-readable status document.
//!
//! Only the sections consulted by the fault-tolerance oracle are modelled;
//! everything else in the document is ignored on deserialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundationDBStatus {
    #[serde(default)]
    pub client: ClientStatus,
    #[serde(default)]
    pub cluster: ClusterStatusSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatus {
    #[serde(default)]
    pub database_status: DatabaseStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub healthy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatusSection {
    #[serde(default)]
    pub fault_tolerance: FaultToleranceStatus,
}

/// Zone failures the cluster reports it can absorb. Values can be negative
/// while the cluster is already below its replication target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultToleranceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_zone_failures_without_losing_availability: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_zone_failures_without_losing_data: Option<i64>,
}

impl FoundationDBStatus {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
