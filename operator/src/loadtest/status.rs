//! Folds the observed state of a Job into the status of its load test.
//!
//! Planning a status update is pure: [`StatusUpdate::plan`] classifies the Job and decides
//! which one-shot side effects the pass owes, [`StatusUpdate::apply`] writes the update into a
//! status. Only [`dispatch_side_effects`] and [`persist_status`] talk to the cluster.
use k8s_openapi::{
    api::batch::v1::Job,
    apimachinery::pkg::apis::meta::v1::Time,
    chrono::Duration,
};
use kube::{runtime::events::EventType, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::{
    events::{EventPublisher, COMPLETED, FAILED, RUNNING},
    labels::worker_selector,
    loadtest::{
        client::{with_deadline, LoadTestClient},
        phase::{classify, JobObservation, Phase},
        ConditionStatus, ConditionType, Error, LoadTest, LoadTestStatus,
    },
    utils::{is_conflict, is_not_found, Clock, Context},
};

/// Side effects fired once, on the pass a load test crosses a phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Workers started running.
    Running,
    /// Workers finished.
    Completed {
        /// At least one worker failed.
        failed: bool,
    },
}

/// Changes a reconcile pass makes to the status of a load test.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Classified phase of the load test.
    pub phase: Phase,
    /// Observed Job counters.
    pub observation: JobObservation,
    /// Number of workers the Job runs.
    pub workers: i32,
    /// Rendered completion ratio.
    pub completions: String,
    /// Image of the workers.
    pub image: String,
    /// Time the Job itself started.
    pub job_start_time: Option<Time>,
    /// Time of the pass.
    pub now: Time,
}

impl StatusUpdate {
    /// Plan the update for a Job observed at `now`, against the status before the pass.
    pub fn plan(old: Option<&LoadTestStatus>, job: &Job, now: Time) -> (Self, Vec<SideEffect>) {
        let observation = JobObservation::from_job(job);
        let phase = classify(&observation);
        let spec = job.spec.as_ref();
        let completions_target = spec.and_then(|spec| spec.completions);
        let parallelism = spec.and_then(|spec| spec.parallelism);
        let image = spec
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.containers.first())
            .and_then(|container| container.image.clone())
            .unwrap_or_default();
        let update = Self {
            phase,
            observation,
            workers: completions_target.or(parallelism).unwrap_or(1),
            completions: completions(observation.succeeded, completions_target, parallelism),
            image,
            job_start_time: job.status.as_ref().and_then(|status| status.start_time.clone()),
            now,
        };

        let started = old.map_or(false, |status| status.start_time.is_some());
        let finished = old.map_or(false, is_terminal);
        let mut effects = Vec::new();
        match phase {
            Phase::Active if !started => effects.push(SideEffect::Running),
            Phase::Completed if !finished => effects.push(SideEffect::Completed {
                failed: observation.failed > 0,
            }),
            _ => {}
        }
        (update, effects)
    }

    /// Write the update into a status.
    ///
    /// Applying the same update again, or on a status that was concurrently modified,
    /// yields the same conditions and timestamps.
    pub fn apply(&self, status: &mut LoadTestStatus) {
        let JobObservation {
            active,
            succeeded,
            failed,
            ..
        } = self.observation;
        let now = &self.now;
        match self.phase {
            Phase::Inactive => status.conditions.observe(
                ConditionType::Progressing,
                ConditionStatus::Unknown,
                "WorkersPending",
                "Waiting for load test workers to start".to_owned(),
                now,
            ),
            Phase::Active => {
                status.conditions.observe(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "WorkersRunning",
                    format!("{active} of {} workers running", self.workers),
                    now,
                );
                if status.start_time.is_none() {
                    status.start_time = Some(now.clone());
                }
            }
            Phase::Completed => {
                status.conditions.observe(
                    ConditionType::Progressing,
                    ConditionStatus::False,
                    "WorkersFinished",
                    "Load test workers have finished".to_owned(),
                    now,
                );
                let (completed, reason, message) = if failed > 0 {
                    (
                        ConditionStatus::False,
                        "WorkersFailed",
                        format!("{failed} of {} workers failed", self.workers),
                    )
                } else {
                    (
                        ConditionStatus::True,
                        "Succeeded",
                        format!("All {succeeded} workers succeeded"),
                    )
                };
                let current = status
                    .conditions
                    .get(ConditionType::Completed)
                    .map(|condition| condition.status);
                if current != Some(completed) {
                    status.conditions.observe(
                        ConditionType::Completed,
                        completed,
                        reason,
                        message,
                        now,
                    );
                }
                if status.start_time.is_none() {
                    // Workers finished between two passes.
                    status.start_time = self.job_start_time.clone();
                }
                if failed > 0 {
                    status.completion_time = None;
                } else if status.completion_time.is_none() {
                    status.completion_time = Some(now.clone());
                }
            }
        }

        status.duration = duration(status, now);
        status.completions = self.completions.clone();
        status.image = self.image.clone();
        status.active = active;
        status.succeeded = succeeded;
        status.failed = failed;
    }
}

/// A load test is terminal once its workers finished, successfully or not.
pub fn is_terminal(status: &LoadTestStatus) -> bool {
    status.completion_time.is_some() || status.conditions.get(ConditionType::Completed).is_some()
}

/// Succeeded workers out of the expected completions, or out of one when the Job
/// does not track completions.
pub fn completions(succeeded: i32, completions: Option<i32>, parallelism: Option<i32>) -> String {
    match (completions, parallelism) {
        (Some(completions), _) => format!("{succeeded}/{completions}"),
        (None, Some(parallelism)) if parallelism > 1 => {
            format!("{succeeded}/1 of {parallelism}")
        }
        (None, _) => format!("{succeeded}/1"),
    }
}

/// How long a load test ran, or has been running.
///
/// Failed load tests never get a completion time, they ran until their Completed
/// condition was recorded.
fn duration(status: &LoadTestStatus, now: &Time) -> String {
    let Some(start) = &status.start_time else {
        return String::new();
    };
    let end = status
        .completion_time
        .as_ref()
        .or_else(|| {
            status
                .conditions
                .get(ConditionType::Completed)
                .and_then(|condition| condition.last_transition_time.as_ref())
        })
        .unwrap_or(now);
    human_duration(end.0 - start.0)
}

/// Render a span with the coarse precision K8s uses for ages, e.g. `45s`, `3m20s` or `2h5m`.
pub fn human_duration(span: Duration) -> String {
    let seconds = span.num_seconds();
    if seconds < -1 {
        return "<invalid>".to_owned();
    }
    if seconds < 0 {
        return "0s".to_owned();
    }
    if seconds < 60 * 2 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    if minutes < 10 {
        return match seconds % 60 {
            0 => format!("{minutes}m"),
            s => format!("{minutes}m{s}s"),
        };
    }
    if minutes < 60 * 3 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 8 {
        return match minutes % 60 {
            0 => format!("{hours}h"),
            m => format!("{hours}h{m}m"),
        };
    }
    if hours < 48 {
        return format!("{hours}h");
    }
    let days = hours / 24;
    if hours < 24 * 8 {
        return match hours % 24 {
            0 => format!("{days}d"),
            h => format!("{days}d{h}h"),
        };
    }
    if hours < 24 * 365 * 2 {
        return format!("{days}d");
    }
    let years = days / 365;
    if hours < 24 * 365 * 8 {
        return match days % 365 {
            0 => format!("{years}y"),
            d => format!("{years}y{d}d"),
        };
    }
    format!("{years}y")
}

/// Publish the events and telemetry owed by a pass.
///
/// Worker pods are listed before anything is published, so a failed listing aborts the
/// pass without side effects. Publishing itself is best effort.
pub async fn dispatch_side_effects(
    cx: &Context<impl LoadTestClient, impl EventPublisher, impl Clock>,
    load_test: &LoadTest,
    effects: &[SideEffect],
) -> Result<(), Error> {
    let name = load_test.name_any();
    let pods = if effects.contains(&SideEffect::Running) {
        let ns = load_test
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let selector = worker_selector(&cx.config, &name);
        with_deadline(
            cx.config.request_timeout,
            "list_pod_names",
            cx.client.list_pod_names(&ns, &selector),
        )
        .await?
    } else {
        Vec::new()
    };

    let reference = load_test.object_ref(&());
    for effect in effects {
        match effect {
            SideEffect::Running => {
                info!(%name, workers = pods.len(), "load test running");
                for pod in &pods {
                    cx.events
                        .publish(
                            &reference,
                            EventType::Normal,
                            RUNNING,
                            format!("Running Load Test worker pod: {pod}"),
                        )
                        .await;
                }
                cx.telemetry.test_started(load_test);
            }
            SideEffect::Completed { failed } => {
                info!(%name, failed, "load test completed");
                if *failed {
                    cx.events
                        .publish(
                            &reference,
                            EventType::Warning,
                            FAILED,
                            "Load Test completed with failed workers".to_owned(),
                        )
                        .await;
                } else {
                    cx.events
                        .publish(
                            &reference,
                            EventType::Normal,
                            COMPLETED,
                            "Load Test completed".to_owned(),
                        )
                        .await;
                }
                cx.telemetry.test_completed(load_test);
            }
        }
    }
    Ok(())
}

/// Write the update into the status of a load test.
///
/// On conflicts the load test is read again and the same update is applied to the fresh
/// copy, up to the configured number of attempts. Returns the written status, or None when
/// the load test no longer exists.
pub async fn persist_status(
    cx: &Context<impl LoadTestClient, impl EventPublisher, impl Clock>,
    load_test: &LoadTest,
    update: &StatusUpdate,
) -> Result<Option<LoadTestStatus>, Error> {
    let ns = load_test
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = load_test.name_any();
    let attempts = cx.config.status_update_attempts.max(1);
    let mut current = load_test.clone();
    for attempt in 1..=attempts {
        let mut status = current.status.take().unwrap_or_default();
        update.apply(&mut status);
        current.status = Some(status.clone());
        let result = with_deadline(
            cx.config.request_timeout,
            "replace_status",
            cx.client.replace_status(&current),
        )
        .await;
        match result {
            Ok(_) => {
                debug!(%name, attempt, ?status, "status updated");
                return Ok(Some(status));
            }
            Err(Error::Kube { source }) if is_not_found(&source) => {
                debug!(%name, "load test deleted before its status was written");
                return Ok(None);
            }
            Err(Error::Kube { source }) if is_conflict(&source) => {
                warn!(%name, attempt, attempts, "status update conflicted");
                if attempt == attempts {
                    break;
                }
                tokio::time::sleep(cx.config.status_update_backoff).await;
                let fresh = with_deadline(
                    cx.config.request_timeout,
                    "get_load_test",
                    cx.client.get_load_test(&ns, &name),
                )
                .await?;
                match fresh {
                    Some(fresh) => current = fresh,
                    None => return Ok(None),
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(Error::ConflictRetriesExhausted { attempts })
}

/// Reconcile the status of a load test with its Job.
///
/// Returns the written status, or None when the load test no longer exists.
pub async fn reconcile_status(
    cx: &Context<impl LoadTestClient, impl EventPublisher, impl Clock>,
    load_test: &LoadTest,
    job: &Job,
) -> Result<Option<LoadTestStatus>, Error> {
    let now = Time(cx.clock.now());
    let (update, effects) = StatusUpdate::plan(load_test.status.as_ref(), job, now);
    debug!(name = %load_test.name_any(), phase = ?update.phase, ?effects, "planned status");
    dispatch_side_effects(cx, load_test, &effects).await?;
    persist_status(cx, load_test, &update).await
}
