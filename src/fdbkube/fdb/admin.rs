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

//! Fault-tolerance assessment derived from the live database status.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use super::status::FoundationDBStatus;
use crate::fdbkube::api::cluster::ClusterKey;
use crate::fdbkube::config::Config;
use crate::fdbkube::logger::log_debug;

const COMPONENT: &str = "fdb-admin";

/// Number of additional zone failures the cluster reports it can absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Headroom {
    Unknown,
    Zones(u32),
}

impl Headroom {
    /// Clamps negative reports to zero; an absent report stays unknown.
    pub fn from_reported(value: Option<i64>) -> Self {
        match value {
            None => Headroom::Unknown,
            Some(zones) => Headroom::Zones(u32::try_from(zones.max(0)).unwrap_or(u32::MAX)),
        }
    }

    /// True only for a known headroom of at least one zone.
    pub fn has_spare(&self) -> bool {
        matches!(self, Headroom::Zones(zones) if *zones > 0)
    }
}

impl Display for Headroom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Headroom::Unknown => write!(f, "unknown"),
            Headroom::Zones(zones) => write!(f, "{}", zones),
        }
    }
}

/// Snapshot of the cluster's ability to lose another zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultToleranceAssessment {
    pub available: bool,
    pub zone_failures_without_losing_availability: Headroom,
    pub zone_failures_without_losing_data: Headroom,
}

impl FaultToleranceAssessment {
    /// The value assumed when the database cannot be asked.
    pub fn unknown() -> Self {
        Self {
            available: false,
            zone_failures_without_losing_availability: Headroom::Unknown,
            zone_failures_without_losing_data: Headroom::Unknown,
        }
    }

    pub fn from_status(status: &FoundationDBStatus) -> Self {
        let tolerance = &status.cluster.fault_tolerance;
        Self {
            available: status.client.database_status.available,
            zone_failures_without_losing_availability: Headroom::from_reported(
                tolerance.max_zone_failures_without_losing_availability,
            ),
            zone_failures_without_losing_data: Headroom::from_reported(
                tolerance.max_zone_failures_without_losing_data,
            ),
        }
    }
}

#[derive(Debug)]
pub enum OracleError {
    Unreachable(String),
    Timeout(Duration),
    MalformedStatus(serde_json::Error),
}

impl OracleError {
    /// Short machine-readable reason used for metrics labels.
    pub fn reason(&self) -> &'static str {
        match self {
            OracleError::Unreachable(_) => "unreachable",
            OracleError::Timeout(_) => "timeout",
            OracleError::MalformedStatus(_) => "malformed_status",
        }
    }
}

impl Display for OracleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Unreachable(message) => {
                write!(f, "database status unreachable: {}", message)
            }
            OracleError::Timeout(timeout) => write!(
                f,
                "database status not returned within {}s",
                timeout.as_secs()
            ),
            OracleError::MalformedStatus(err) => write!(f, "malformed database status: {}", err),
        }
    }
}

impl Error for OracleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OracleError::MalformedStatus(err) => Some(err),
            OracleError::Unreachable(_) | OracleError::Timeout(_) => None,
        }
    }
}

/// Answers whether a cluster can afford to lose another zone.
pub trait FaultToleranceOracle: Send + Sync {
    fn assess(&self, cluster: &ClusterKey) -> Result<FaultToleranceAssessment, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminClientError {
    Connection(String),
    Timeout(Duration),
}

impl Display for AdminClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AdminClientError::Connection(message) => write!(f, "connection failed: {}", message),
            AdminClientError::Timeout(timeout) => {
                write!(f, "timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl Error for AdminClientError {}

/// Administrative channel to a running cluster.
pub trait AdminClient: Send + Sync {
    /// Returns the machine-readable status document, giving up after
    /// `timeout`.
    fn get_status(&self, cluster: &ClusterKey, timeout: Duration)
        -> Result<String, AdminClientError>;
}

/// Oracle backed by the status document of an [`AdminClient`].
pub struct AdminClientOracle {
    client: Arc<dyn AdminClient>,
    timeout: Duration,
}

impl AdminClientOracle {
    /// Uses `FDBKUBE_STATUS_TIMEOUT_SECS` as the status timeout.
    pub fn new(client: Arc<dyn AdminClient>) -> Self {
        Self::with_timeout(client, Config::StatusTimeout.get_duration())
    }

    pub fn with_timeout(client: Arc<dyn AdminClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl FaultToleranceOracle for AdminClientOracle {
    fn assess(&self, cluster: &ClusterKey) -> Result<FaultToleranceAssessment, OracleError> {
        let raw = self
            .client
            .get_status(cluster, self.timeout)
            .map_err(|err| match err {
                AdminClientError::Timeout(timeout) => OracleError::Timeout(timeout),
                AdminClientError::Connection(message) => OracleError::Unreachable(message),
            })?;
        let status = FoundationDBStatus::from_json(&raw).map_err(OracleError::MalformedStatus)?;
        let assessment = FaultToleranceAssessment::from_status(&status);
        let cluster_name = cluster.to_string();
        let availability = assessment.zone_failures_without_losing_availability.to_string();
        let data = assessment.zone_failures_without_losing_data.to_string();
        log_debug(
            COMPONENT,
            "Assessed cluster fault tolerance",
            &[
                ("cluster", cluster_name.as_str()),
                ("available", if assessment.available { "true" } else { "false" }),
                ("availability_headroom", availability.as_str()),
                ("data_headroom", data.as_str()),
            ],
        );
        Ok(assessment)
    }
}
