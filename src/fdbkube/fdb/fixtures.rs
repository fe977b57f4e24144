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

//! Named oracle and admin-client fixtures.
//!
//! Each constructor fixes the reported state up front; fixtures are never
//! mutated after construction. [`FixtureOracle::calls`] counts how many
//! times the oracle was consulted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::admin::{
    AdminClient, AdminClientError, FaultToleranceAssessment, FaultToleranceOracle, Headroom,
    OracleError,
};
use super::status::{
    ClientStatus, ClusterStatusSection, DatabaseStatus, FaultToleranceStatus, FoundationDBStatus,
};
use crate::fdbkube::api::cluster::ClusterKey;

enum FixtureAnswer {
    Assessment(FaultToleranceAssessment),
    Unreachable(String),
}

pub struct FixtureOracle {
    answer: FixtureAnswer,
    calls: AtomicUsize,
}

impl FixtureOracle {
    pub fn with_assessment(assessment: FaultToleranceAssessment) -> Self {
        Self {
            answer: FixtureAnswer::Assessment(assessment),
            calls: AtomicUsize::new(0),
        }
    }

    fn reporting(available: bool, availability: u32, data: u32) -> Self {
        Self::with_assessment(FaultToleranceAssessment {
            available,
            zone_failures_without_losing_availability: Headroom::Zones(availability),
            zone_failures_without_losing_data: Headroom::Zones(data),
        })
    }

    /// Available with spare availability and data headroom.
    pub fn healthy() -> Self {
        Self::reporting(true, 1, 2)
    }

    /// Available, but one more zone loss would cost availability.
    pub fn degraded_availability() -> Self {
        Self::reporting(true, 0, 1)
    }

    /// Available, but one more zone loss would cost data.
    pub fn degraded_data() -> Self {
        Self::reporting(true, 1, 0)
    }

    /// Reports healthy headroom while the database itself is unavailable.
    pub fn unavailable() -> Self {
        Self::reporting(false, 1, 2)
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            answer: FixtureAnswer::Unreachable(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaultToleranceOracle for FixtureOracle {
    fn assess(&self, _cluster: &ClusterKey) -> Result<FaultToleranceAssessment, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            FixtureAnswer::Assessment(assessment) => Ok(*assessment),
            FixtureAnswer::Unreachable(message) => Err(OracleError::Unreachable(message.clone())),
        }
    }
}

/// Admin client that answers every status request with a fixed result.
pub struct StaticAdminClient {
    response: Result<String, AdminClientError>,
}

impl StaticAdminClient {
    pub fn from_status(status: &FoundationDBStatus) -> Self {
        let raw = serde_json::to_string(status)
            .map_err(|err| AdminClientError::Connection(err.to_string()));
        Self { response: raw }
    }

    pub fn raw(document: &str) -> Self {
        Self {
            response: Ok(document.to_string()),
        }
    }

    pub fn healthy() -> Self {
        Self::from_status(&FoundationDBStatus {
            client: ClientStatus {
                database_status: DatabaseStatus {
                    available: true,
                    healthy: true,
                },
            },
            cluster: ClusterStatusSection {
                fault_tolerance: FaultToleranceStatus {
                    max_zone_failures_without_losing_availability: Some(1),
                    max_zone_failures_without_losing_data: Some(2),
                },
            },
        })
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            response: Err(AdminClientError::Connection(message.to_string())),
        }
    }

    /// Reports a timeout equal to whatever budget the caller passed.
    pub fn timing_out() -> Self {
        Self {
            response: Err(AdminClientError::Timeout(Duration::ZERO)),
        }
    }
}

impl AdminClient for StaticAdminClient {
    fn get_status(
        &self,
        _cluster: &ClusterKey,
        timeout: Duration,
    ) -> Result<String, AdminClientError> {
        match &self.response {
            Ok(raw) => Ok(raw.clone()),
            Err(AdminClientError::Timeout(_)) => Err(AdminClientError::Timeout(timeout)),
            Err(err) => Err(err.clone()),
        }
    }
}
