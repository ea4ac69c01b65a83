use std::sync::Arc;

use futures::stream::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::{
    client::Client,
    runtime::{
        controller::Action,
        events::EventType,
        watcher::{self, Config},
        Controller,
    },
    Api, Resource, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info, warn};

use crate::{
    config::OperatorConfig,
    events::{EventPublisher, CREATED, MISSING_TEST_SCRIPT},
    labels::MANAGED_BY_LABEL_SELECTOR,
    loadtest::{
        client::{with_deadline, LoadTestClient},
        job::job,
        status::{is_terminal, reconcile_status},
        Error, LoadTest,
    },
    utils::{is_conflict, Clock, Context},
};

/// Handle errors during reconciliation.
fn on_error(
    load_test: Arc<LoadTest>,
    error: &Error,
    cx: Arc<Context<impl LoadTestClient, impl EventPublisher, impl Clock>>,
) -> Action {
    warn!(name = %load_test.name_any(), %error, "reconcile failed, retrying");
    Action::requeue(cx.config.retry_interval)
}

/// Start a controller for the LoadTest CRD.
pub async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let k_client = Client::try_default().await?;
    let context = Arc::new(Context::new(k_client.clone(), config));

    let load_tests: Api<LoadTest> = Api::all(k_client.clone());
    let jobs = Api::<Job>::all(k_client);

    Controller::new(load_tests, Config::default())
        .owns(
            jobs,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .shutdown_on_signal()
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((load_test, _)) => {
                    info!(name = %load_test.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        })
        .await;
    Ok(())
}

/// Perform a reconcile pass for the LoadTest CRD
async fn reconcile(
    load_test: Arc<LoadTest>,
    cx: Arc<Context<impl LoadTestClient, impl EventPublisher, impl Clock>>,
) -> Result<Action, Error> {
    let meter = global::meter("loadtest");
    let runs = meter
        .u64_counter("loadtest_reconcile_count")
        .with_description("Number of load test reconciles")
        .init();

    let result = reconcile_(load_test, cx).await;
    let outcome = if result.is_ok() { "ok" } else { "err" };
    runs.add(
        1,
        &[KeyValue {
            key: "result".into(),
            value: outcome.into(),
        }],
    );
    result
}

/// Perform a reconcile pass for the LoadTest CRD
async fn reconcile_(
    load_test: Arc<LoadTest>,
    cx: Arc<Context<impl LoadTestClient, impl EventPublisher, impl Clock>>,
) -> Result<Action, Error> {
    let ns = load_test
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = load_test.name_any();
    let timeout = cx.config.request_timeout;

    // Work on the latest version, the watch cache may lag behind our own status writes.
    let Some(load_test) = with_deadline(
        timeout,
        "get_load_test",
        cx.client.get_load_test(&ns, &name),
    )
    .await?
    else {
        debug!(%ns, %name, "load test deleted");
        return Ok(Action::await_change());
    };
    debug!(%ns, %name, spec = ?load_test.spec, "reconcile");

    if !ensure_test_script(&cx, &load_test, &ns).await? {
        return Ok(Action::await_change());
    }

    let job = ensure_job(&cx, &load_test, &ns).await?;

    match reconcile_status(&cx, &load_test, &job).await? {
        Some(status) if !is_terminal(&status) => Ok(Action::requeue(cx.config.poll_interval)),
        _ => Ok(Action::await_change()),
    }
}

/// Check the test script ConfigMap exists, warning about the load test when it does not.
async fn ensure_test_script(
    cx: &Context<impl LoadTestClient, impl EventPublisher, impl Clock>,
    load_test: &LoadTest,
    ns: &str,
) -> Result<bool, Error> {
    let config_map = &load_test.spec.test_script.config.config_map;
    let exists = with_deadline(
        cx.config.request_timeout,
        "get_config_map",
        cx.client.get_config_map_exists(ns, config_map),
    )
    .await?;
    if !exists {
        error!(%ns, %config_map, "test script ConfigMap is missing");
        cx.events
            .publish(
                &load_test.object_ref(&()),
                EventType::Warning,
                MISSING_TEST_SCRIPT,
                concat!(
                    "Load Test test script ConfigMap is missing, ",
                    "see field .spec.testScript.config.configMap"
                )
                .to_owned(),
            )
            .await;
    }
    Ok(exists)
}

/// Return the worker Job of a load test, creating it when it does not exist yet.
///
/// An existing Job is never updated.
async fn ensure_job(
    cx: &Context<impl LoadTestClient, impl EventPublisher, impl Clock>,
    load_test: &LoadTest,
    ns: &str,
) -> Result<Job, Error> {
    let name = load_test.name_any();
    let timeout = cx.config.request_timeout;
    if let Some(existing) = with_deadline(timeout, "get_job", cx.client.get_job(ns, &name)).await? {
        return Ok(existing);
    }

    let created = with_deadline(
        timeout,
        "create_job",
        cx.client.create_job(ns, &job(load_test, &cx.config)),
    )
    .await;
    match created {
        Ok(created) => {
            info!(%ns, %name, "created worker job");
            cx.events
                .publish(
                    &load_test.object_ref(&()),
                    EventType::Normal,
                    CREATED,
                    format!("Created Load Test worker master job: {name}"),
                )
                .await;
            Ok(created)
        }
        // Created by a pass that raced us.
        Err(Error::Kube { source }) if is_conflict(&source) => {
            with_deadline(timeout, "get_job", cx.client.get_job(ns, &name))
                .await?
                .ok_or(Error::JobNotFound(name))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        labels::{component_labels, WORKER_COMPONENT},
        loadtest::{client::MockLoadTestClient, ConditionStatus, ConditionType},
        telemetry::{TEST_COMPLETED, TEST_STARTED},
        utils::test::{api_error, load_test, FakeCluster},
    };

    use expect_test::expect;
    use mockall::Sequence;
    use std::time::Duration;

    fn cluster_with_workers(name: &str, count: u32) -> FakeCluster {
        let cluster = FakeCluster::default().with_load_test(load_test(name, count));
        let labels = component_labels(&OperatorConfig::default(), name, WORKER_COMPONENT);
        for i in 0..count {
            cluster.add_pod("perf", &format!("{name}-{i}"), labels.clone());
        }
        cluster.add_pod("perf", "unrelated", Default::default());
        cluster
    }

    async fn pass(
        cx: &Arc<Context<impl LoadTestClient, impl EventPublisher, impl Clock>>,
        name: &str,
    ) -> Result<Action, Error> {
        reconcile(Arc::new(load_test(name, 0)), cx.clone()).await
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let cluster = cluster_with_workers("smoke", 2);
        let (cx, telemetry) = Context::test(cluster.clone());

        let action = pass(&cx, "smoke").await.unwrap();
        assert_eq!(action, Action::requeue(cx.config.poll_interval));
        assert_eq!(cx.events.reasons(), vec![CREATED]);
        let status = cluster.load_test("perf", "smoke").unwrap().status.unwrap();
        assert_eq!(
            status
                .conditions
                .get(ConditionType::Progressing)
                .map(|c| c.status),
            Some(ConditionStatus::Unknown)
        );

        cluster.set_job_counters("perf", "smoke", 2, 0, 0);
        for _ in 0..3 {
            cx.clock.advance(5);
            let action = pass(&cx, "smoke").await.unwrap();
            assert_eq!(action, Action::requeue(cx.config.poll_interval));
        }

        cluster.set_job_counters("perf", "smoke", 0, 2, 0);
        for _ in 0..2 {
            cx.clock.advance(5);
            let action = pass(&cx, "smoke").await.unwrap();
            assert_eq!(action, Action::await_change());
        }

        expect![[r#"
            [
                RecordedEvent {
                    type_: "Normal",
                    reason: "Created",
                    note: "Created Load Test worker master job: smoke",
                },
                RecordedEvent {
                    type_: "Normal",
                    reason: "Running",
                    note: "Running Load Test worker pod: smoke-0",
                },
                RecordedEvent {
                    type_: "Normal",
                    reason: "Running",
                    note: "Running Load Test worker pod: smoke-1",
                },
                RecordedEvent {
                    type_: "Normal",
                    reason: "Completed",
                    note: "Load Test completed",
                },
            ]
        "#]]
        .assert_debug_eq(&cx.events.events());
        assert_eq!(telemetry.names(), vec![TEST_STARTED, TEST_COMPLETED]);
        assert_eq!(cluster.state().job_creates, 1);

        let status = cluster.load_test("perf", "smoke").unwrap().status.unwrap();
        assert_eq!(status.completions, "2/2");
        assert_eq!(status.duration, "15s");
        assert_eq!(status.image, "artilleryio/artillery:latest");
        assert!(status.completion_time.is_some());
    }

    #[tokio::test]
    async fn failed_workers_stop_polling() {
        let cluster = cluster_with_workers("soak", 3);
        let (cx, telemetry) = Context::test(cluster.clone());

        pass(&cx, "soak").await.unwrap();
        cluster.set_job_counters("perf", "soak", 0, 2, 1);
        let action = pass(&cx, "soak").await.unwrap();
        assert_eq!(action, Action::await_change());
        let action = pass(&cx, "soak").await.unwrap();
        assert_eq!(action, Action::await_change());

        assert_eq!(cx.events.reasons(), vec![CREATED, "Failed"]);
        assert_eq!(telemetry.names(), vec![TEST_COMPLETED]);
        let status = cluster.load_test("perf", "soak").unwrap().status.unwrap();
        assert_eq!(status.completion_time, None);
        assert_eq!(status.completions, "2/3");
        assert_eq!(
            status
                .conditions
                .get(ConditionType::Completed)
                .map(|c| c.status),
            Some(ConditionStatus::False)
        );
    }

    #[tokio::test]
    async fn missing_test_script() {
        let cluster = FakeCluster::default().with_load_test(load_test("smoke", 1));
        cluster.state().config_maps.clear();
        let (cx, _) = Context::test(cluster.clone());

        let action = pass(&cx, "smoke").await.unwrap();
        assert_eq!(action, Action::await_change());
        let events = cx.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].type_, "Warning");
        assert_eq!(events[0].reason, MISSING_TEST_SCRIPT);
        let state = cluster.state();
        assert!(state.jobs.is_empty());
        assert_eq!(state.status_writes, 0);
    }

    #[tokio::test]
    async fn deleted_load_test() {
        let (cx, telemetry) = Context::test(FakeCluster::default());
        let action = pass(&cx, "gone").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(cx.events.events().is_empty());
        assert!(telemetry.names().is_empty());
    }

    #[tokio::test]
    async fn job_is_created_once() {
        let cluster = cluster_with_workers("smoke", 1);
        let (cx, _) = Context::test(cluster.clone());
        pass(&cx, "smoke").await.unwrap();
        pass(&cx, "smoke").await.unwrap();
        assert_eq!(cluster.state().job_creates, 1);
        assert_eq!(cluster.state().jobs.len(), 1);
        assert_eq!(cx.events.reasons(), vec![CREATED]);
    }

    #[tokio::test]
    async fn job_created_concurrently() {
        let existing = job(&load_test("smoke", 1), &OperatorConfig::default());
        let mut client = MockLoadTestClient::new();
        let mut seq = Sequence::new();
        client
            .expect_get_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        client
            .expect_create_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));
        client
            .expect_get_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Some(existing.clone())));
        let (cx, _) = Context::test(client);

        let job = ensure_job(&cx, &load_test("smoke", 1), "perf").await.unwrap();
        assert_eq!(job.name_any(), "smoke");
        assert!(cx.events.events().is_empty());
    }

    #[tokio::test]
    async fn create_errors_are_retried() {
        let mut client = MockLoadTestClient::new();
        client
            .expect_get_load_test()
            .returning(|_, _| Ok(Some(load_test("smoke", 1))));
        client
            .expect_get_config_map_exists()
            .returning(|_, _| Ok(true));
        client.expect_get_job().returning(|_, _| Ok(None));
        client
            .expect_create_job()
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        client.expect_replace_status().never();
        let (cx, _) = Context::test(client);

        let result = pass(&cx, "smoke").await;
        assert!(matches!(result, Err(Error::Kube { .. })));
        let action = on_error(Arc::new(load_test("smoke", 1)), &result.unwrap_err(), cx.clone());
        assert_eq!(action, Action::requeue(cx.config.retry_interval));
    }

    #[tokio::test]
    async fn conflicting_status_writes_are_retried() {
        let cluster = cluster_with_workers("smoke", 1);
        let (cx, _) = Context::test(cluster.clone());
        pass(&cx, "smoke").await.unwrap();

        cluster.set_job_counters("perf", "smoke", 1, 0, 0);
        let writes = cluster.state().status_writes;
        cluster.state().conflicts = 2;
        pass(&cx, "smoke").await.unwrap();

        assert_eq!(cluster.state().status_writes, writes + 3);
        let status = cluster.load_test("perf", "smoke").unwrap().status.unwrap();
        assert!(status.start_time.is_some());
        assert_eq!(status.active, 1);
        // Events fire once, not once per attempt.
        assert_eq!(cx.events.reasons(), vec![CREATED, "Running"]);
    }

    #[tokio::test]
    async fn conflicts_are_bounded() {
        let cluster = cluster_with_workers("smoke", 1);
        let (cx, _) = Context::test(cluster.clone());
        cluster.state().conflicts = 100;

        let result = pass(&cx, "smoke").await;
        assert!(matches!(
            result,
            Err(Error::ConflictRetriesExhausted { attempts: 5 })
        ));
        assert_eq!(cluster.state().status_writes, 5);
        assert_eq!(cluster.load_test("perf", "smoke").unwrap().status, None);
    }

    #[tokio::test]
    async fn pod_listing_failure_leaves_status_untouched() {
        let cluster = cluster_with_workers("smoke", 2);
        let (cx, telemetry) = Context::test(cluster.clone());
        pass(&cx, "smoke").await.unwrap();
        let before = cluster.load_test("perf", "smoke").unwrap().status;

        cluster.set_job_counters("perf", "smoke", 2, 0, 0);
        cluster.state().fail_pod_list = true;
        assert!(pass(&cx, "smoke").await.is_err());
        assert_eq!(cluster.load_test("perf", "smoke").unwrap().status, before);
        assert_eq!(cx.events.reasons(), vec![CREATED]);
        assert!(telemetry.names().is_empty());

        cluster.state().fail_pod_list = false;
        pass(&cx, "smoke").await.unwrap();
        assert_eq!(cx.events.reasons(), vec![CREATED, "Running", "Running"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reads_time_out() {
        let cluster = cluster_with_workers("smoke", 1);
        cluster.state().read_delay = Some(Duration::from_secs(60));
        let (cx, _) = Context::test(cluster.clone());

        let result = pass(&cx, "smoke").await;
        assert!(matches!(
            result,
            Err(Error::Timeout {
                operation: "get_load_test"
            })
        ));
        assert_eq!(cluster.state().job_creates, 0);
    }
}
