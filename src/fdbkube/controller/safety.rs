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

use crate::fdbkube::api::process_group::ProcessGroupStatus;
use crate::fdbkube::fdb::admin::FaultToleranceAssessment;

/// Decides whether a process group lacking a pod must get one back.
///
/// Groups that are not being removed always keep a pod. A group marked for
/// removal may stay without a pod only while the database is available and
/// can lose one more zone without losing availability or data; an unknown
/// headroom never counts as spare.
pub fn must_have_pod(
    process_group: &ProcessGroupStatus,
    assessment: &FaultToleranceAssessment,
) -> bool {
    if !process_group.is_marked_for_removal() {
        return true;
    }
    let safe_to_leave_down = assessment.available
        && assessment.zone_failures_without_losing_availability.has_spare()
        && assessment.zone_failures_without_losing_data.has_spare();
    !safe_to_leave_down
}
