use std::collections::BTreeMap;

use serde::Serialize;

use crate::job::JobStatus;

/// Snapshot of queue load for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Jobs waiting to be claimed.
    pub queue_depth: usize,
    /// QUEUED plus CUTTING.
    pub active_jobs: usize,
    /// Fabric still to cut across active jobs.
    pub total_fabric_cm: f64,
    pub estimated_time_min: f64,
    /// Archived job count per status. Every status is present.
    pub status_breakdown: BTreeMap<JobStatus, u64>,
}

impl QueueStatus {
    pub(crate) fn new(
        queue_depth: usize,
        active_jobs: usize,
        total_fabric_cm: f64,
        cutting_speed_cm_per_min: f64,
        status_breakdown: BTreeMap<JobStatus, u64>,
    ) -> Self {
        Self {
            queue_depth,
            active_jobs,
            total_fabric_cm,
            estimated_time_min: estimate_minutes(total_fabric_cm, cutting_speed_cm_per_min),
            status_breakdown,
        }
    }
}

fn estimate_minutes(fabric_cm: f64, speed_cm_per_min: f64) -> f64 {
    if speed_cm_per_min > 0.0 {
        fabric_cm / speed_cm_per_min
    } else {
        0.0
    }
}
