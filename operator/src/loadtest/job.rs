use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{
        ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
        PodTemplateSpec, Volume, VolumeMount,
    },
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::{
    config::OperatorConfig,
    labels::{component_labels, managed_labels_extend, WORKER_COMPONENT, WORKER_MASTER_COMPONENT},
    loadtest::LoadTest,
};

/// Number of workers of a load test, a count of zero runs a single worker.
pub fn worker_count(load_test: &LoadTest) -> i32 {
    i32::try_from(load_test.spec.count.max(1)).unwrap_or(i32::MAX)
}

/// Spec of the Job running the workers of a load test.
pub fn job_spec(load_test: &LoadTest, config: &OperatorConfig) -> JobSpec {
    let name = load_test.name_any();
    let count = worker_count(load_test);

    // Workers report metrics under their own pod name.
    let mut env_vars = vec![EnvVar {
        name: "WORKER_ID".to_owned(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    env_vars.extend(config.telemetry.to_env_vars(&config.app_name));

    JobSpec {
        parallelism: Some(count),
        completions: Some(count),
        backoff_limit: Some(0),
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(component_labels(config, &name, WORKER_COMPONENT)),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: name.clone(),
                    image: Some(config.worker_image.clone()),
                    image_pull_policy: Some(config.image_pull_policy.clone()),
                    args: Some(vec!["run".to_owned(), config.script_path()]),
                    env: Some(env_vars),
                    volume_mounts: Some(vec![VolumeMount {
                        mount_path: config.script_mount_path.clone(),
                        name: config.script_volume.clone(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some(load_test.spec.test_script.config.config_map.clone()),
                        ..Default::default()
                    }),
                    name: config.script_volume.clone(),
                    ..Default::default()
                }]),
                restart_policy: Some("Never".to_owned()),
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

/// The Job running the workers of a load test, owned by the load test.
pub fn job(load_test: &LoadTest, config: &OperatorConfig) -> Job {
    let name = load_test.name_any();
    let orefs = load_test
        .controller_owner_ref(&())
        .map(|oref| vec![oref])
        .unwrap_or_default();
    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: load_test.namespace(),
            owner_references: Some(orefs),
            labels: managed_labels_extend(Some(component_labels(
                config,
                &name,
                WORKER_MASTER_COMPONENT,
            ))),
            ..Default::default()
        },
        spec: Some(job_spec(load_test, config)),
        ..Default::default()
    }
}
