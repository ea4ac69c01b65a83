//! Scaffold test scripts from the HTTP liveness probes of running Services.
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use k8s_openapi::{
    api::core::v1::{Pod, Service},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{api::ListParams, Api, Client};
use tracing::debug;

use crate::{
    manifest::{create_dir, write_yaml},
    script::TestScript,
};

/// Options to Scaffold command
#[derive(Args, Debug)]
pub struct Opts {
    /// Names of the Services to probe.
    #[arg(required = true)]
    services: Vec<String>,

    /// Namespace of the Services.
    #[arg(long, short, default_value = "default")]
    namespace: String,

    /// Directory the test scripts are written to.
    #[arg(long, short, default_value = "loadtest-scripts")]
    out: PathBuf,
}

/// HTTP liveness endpoints reachable through one port of a Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProbe {
    /// Base URL of the Service port.
    pub url: String,
    /// Paths of the liveness probes behind the port.
    pub paths: Vec<String>,
}

impl ServiceProbe {
    /// Full URLs of the probed endpoints.
    pub fn endpoints(&self) -> impl Iterator<Item = String> + '_ {
        self.paths.iter().map(|path| {
            if path.is_empty() || path.starts_with('/') {
                format!("{}{path}", self.url)
            } else {
                format!("{}/{path}", self.url)
            }
        })
    }
}

/// Outcome of looking up a single Service.
#[derive(Debug, PartialEq)]
enum Lookup {
    /// No such Service, or no pod behind it.
    Missing(String),
    /// The Service exposes no HTTP liveness probe.
    NoProbes(String),
    Probes(String, Vec<ServiceProbe>),
}

/// Liveness probes of the pod containers that a Service exposes.
///
/// Only HTTP GET probes listening on the numeric target port of a Service port count.
/// Services without a selector and ExternalName Services expose nothing.
pub fn service_probes(service: &Service, pod: &Pod) -> Vec<ServiceProbe> {
    let Some(spec) = &service.spec else {
        return Vec::new();
    };
    let has_selector = spec
        .selector
        .as_ref()
        .map_or(false, |selector| !selector.is_empty());
    if !has_selector || spec.type_.as_deref() == Some("ExternalName") {
        return Vec::new();
    }
    let name = service.metadata.name.as_deref().unwrap_or_default();
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    spec.ports
        .iter()
        .flatten()
        .filter_map(|port| {
            let target = match &port.target_port {
                Some(IntOrString::Int(target)) => *target,
                Some(IntOrString::String(_)) => return None,
                None => port.port,
            };
            let paths: Vec<String> = containers
                .iter()
                .filter_map(|container| container.liveness_probe.as_ref()?.http_get.as_ref())
                .filter(|get| get.port == IntOrString::Int(target))
                .map(|get| get.path.clone().unwrap_or_default())
                .collect();
            (!paths.is_empty()).then(|| ServiceProbe {
                url: format!("http://{name}:{}", port.port),
                paths,
            })
        })
        .collect()
}

fn selector(service: &Service) -> Option<String> {
    let selector = service.spec.as_ref()?.selector.as_ref()?;
    (!selector.is_empty()).then(|| {
        selector
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    })
}

async fn lookup(services: &Api<Service>, pods: &Api<Pod>, name: &str) -> Result<Lookup> {
    let Some(service) = services.get_opt(name).await? else {
        return Ok(Lookup::Missing(name.to_owned()));
    };
    let Some(selector) = selector(&service) else {
        return Ok(Lookup::NoProbes(name.to_owned()));
    };
    let pods = pods.list(&ListParams::default().labels(&selector)).await?;
    let Some(pod) = pods.items.first() else {
        return Ok(Lookup::Missing(name.to_owned()));
    };
    let probes = service_probes(&service, pod);
    debug!(service = name, %selector, ?probes, "looked up service");
    if probes.is_empty() {
        Ok(Lookup::NoProbes(name.to_owned()))
    } else {
        Ok(Lookup::Probes(name.to_owned(), probes))
    }
}

/// Report misses and write a test script for every Service exposing liveness probes.
pub async fn scaffold(opts: Opts) -> Result<Vec<PathBuf>> {
    let client = Client::try_default().await?;
    let services: Api<Service> = Api::namespaced(client.clone(), &opts.namespace);
    let pods: Api<Pod> = Api::namespaced(client, &opts.namespace);

    let mut lookups = Vec::with_capacity(opts.services.len());
    for name in &opts.services {
        lookups.push(lookup(&services, &pods, name).await?);
    }
    write_scripts(&opts.out, lookups).await
}

async fn write_scripts(out: &std::path::Path, lookups: Vec<Lookup>) -> Result<Vec<PathBuf>> {
    for lookup in &lookups {
        if let Lookup::Missing(name) = lookup {
            println!("services \"{name}\" not found");
        }
    }
    for lookup in &lookups {
        if let Lookup::NoProbes(name) = lookup {
            println!(
                "services \"{name}\" has no liveness probe endpoints, or ports mapping to endpoints"
            );
        }
    }

    let mut written = Vec::new();
    for lookup in lookups {
        let Lookup::Probes(name, probes) = lookup else {
            continue;
        };
        let Some(script) = TestScript::from_probes(&probes) else {
            continue;
        };
        if written.is_empty() {
            create_dir(out).await?;
        }
        let path = out.join(format!("test-script_{name}.yaml"));
        write_yaml(&path, &script).await?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use k8s_openapi::api::core::v1::{
        Container, HTTPGetAction, PodSpec, Probe, ServicePort, ServiceSpec,
    };
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn service(type_: Option<&str>, ports: &[(i32, Option<IntOrString>)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("checkout".to_owned()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from_iter(vec![(
                    "app".to_owned(),
                    "checkout".to_owned(),
                )])),
                type_: type_.map(str::to_owned),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port, target_port)| ServicePort {
                            port: *port,
                            target_port: target_port.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container(port: i32, path: &str) -> Container {
        Container {
            name: format!("app-{port}"),
            liveness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    port: IntOrString::Int(port),
                    path: Some(path.to_owned()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(containers: Vec<Container>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn probes_behind_service_ports() {
        let service = service(
            None,
            &[
                (80, Some(IntOrString::Int(8080))),
                (9090, None),
                (81, Some(IntOrString::String("http".to_owned()))),
            ],
        );
        let pod = pod(vec![
            container(8080, "/healthz"),
            container(9090, "ready"),
            container(7070, "/unexposed"),
            Container {
                name: "sidecar".to_owned(),
                ..Default::default()
            },
        ]);
        let probes = service_probes(&service, &pod);
        expect![[r#"
            [
                ServiceProbe {
                    url: "http://checkout:80",
                    paths: [
                        "/healthz",
                    ],
                },
                ServiceProbe {
                    url: "http://checkout:9090",
                    paths: [
                        "ready",
                    ],
                },
            ]
        "#]]
        .assert_debug_eq(&probes);
        assert_eq!(
            probes[1].endpoints().collect::<Vec<_>>(),
            vec!["http://checkout:9090/ready"]
        );
    }

    #[test]
    fn external_and_selectorless_services_expose_nothing() {
        let pod = pod(vec![container(8080, "/healthz")]);
        let external = service(Some("ExternalName"), &[(80, Some(IntOrString::Int(8080)))]);
        assert!(service_probes(&external, &pod).is_empty());

        let mut selectorless = service(None, &[(80, Some(IntOrString::Int(8080)))]);
        selectorless.spec.as_mut().unwrap().selector = None;
        assert!(service_probes(&selectorless, &pod).is_empty());
        assert_eq!(selector(&selectorless), None);
    }

    #[tokio::test]
    async fn writes_one_script_per_hit() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scripts");
        let written = write_scripts(
            &out,
            vec![
                Lookup::Missing("cart".to_owned()),
                Lookup::NoProbes("search".to_owned()),
                Lookup::Probes(
                    "checkout".to_owned(),
                    vec![ServiceProbe {
                        url: "http://checkout:80".to_owned(),
                        paths: vec!["/healthz".to_owned()],
                    }],
                ),
            ],
        )
        .await
        .unwrap();
        assert_eq!(written, vec![out.join("test-script_checkout.yaml")]);
        let script: TestScript =
            serde_yaml::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(
            script.scenarios[0].flow[0].get.url,
            "http://checkout:80/healthz"
        );
    }

    #[tokio::test]
    async fn nothing_written_without_hits() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scripts");
        let written = write_scripts(&out, vec![Lookup::Missing("cart".to_owned())])
            .await
            .unwrap();
        assert!(written.is_empty());
        assert!(!out.exists());
    }
}
