//! Classifies the lifecycle phase of a load test from the live state of its Job.
use k8s_openapi::api::batch::v1::Job;

/// Lifecycle phase of a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No worker is running yet.
    Inactive,
    /// Workers are running.
    Active,
    /// All workers finished, successfully or not.
    Completed,
}

/// Conditions reported by the Job itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobConditionFlags {
    /// The Job is suspended.
    pub suspended: bool,
    /// All completions succeeded.
    pub complete: bool,
    /// The Job failed.
    pub failed: bool,
}

/// Counters and conditions observed on a Job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobObservation {
    /// Pods currently running.
    pub active: i32,
    /// Pods that succeeded.
    pub succeeded: i32,
    /// Pods that failed.
    pub failed: i32,
    /// Condition flags, when the Job reports any condition.
    pub conditions: Option<JobConditionFlags>,
}

impl JobObservation {
    /// Observation with counters only.
    pub fn counters(active: i32, succeeded: i32, failed: i32) -> Self {
        Self {
            active,
            succeeded,
            failed,
            conditions: None,
        }
    }

    /// Read the observation from the status of a Job.
    pub fn from_job(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return Self::default();
        };
        // A running Job reports no condition until it is suspended or finishes.
        let job_conditions = status.conditions.as_deref().unwrap_or_default();
        let conditions = (!job_conditions.is_empty()).then(|| {
            job_conditions
                .iter()
                .filter(|condition| condition.status == "True")
                .fold(JobConditionFlags::default(), |mut flags, condition| {
                    match condition.type_.as_str() {
                        "Suspended" => flags.suspended = true,
                        "Complete" => flags.complete = true,
                        "Failed" => flags.failed = true,
                        _ => {}
                    }
                    flags
                })
        });
        Self {
            active: status.active.unwrap_or_default(),
            succeeded: status.succeeded.unwrap_or_default(),
            failed: status.failed.unwrap_or_default(),
            conditions,
        }
    }
}

/// Classify the phase of a load test.
///
/// Job conditions take precedence over raw counters when present, since counters can
/// all be zero while a Job starts. Outstanding work is checked first, so a Job with
/// both running and finished pods is Active.
pub fn classify(observation: &JobObservation) -> Phase {
    match observation.conditions {
        Some(flags) => {
            let finished = flags.complete || flags.failed;
            if !flags.suspended && !finished && observation.active > 0 {
                Phase::Active
            } else if finished && observation.active == 0 {
                Phase::Completed
            } else {
                Phase::Inactive
            }
        }
        None => {
            let finished = observation.succeeded + observation.failed;
            if observation.active > finished {
                Phase::Active
            } else if observation.active == 0 && finished > 0 {
                Phase::Completed
            } else {
                Phase::Inactive
            }
        }
    }
}
