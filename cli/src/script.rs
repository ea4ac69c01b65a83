//! Minimal Artillery test script, running one functional check per endpoint.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scaffold::ServiceProbe;

/// Environment holding the functional checks.
pub const FUNCTIONAL_ENVIRONMENT: &str = "functional";

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct TestScript {
    pub config: Config,
    pub scenarios: Vec<Scenario>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, Environment>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Environment {
    pub phases: Vec<Phase>,
    pub plugins: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub duration: u32,
    pub arrival_count: u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Scenario {
    pub flow: Vec<Flow>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Flow {
    pub get: GetFlow,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct GetFlow {
    pub url: String,
    pub expect: Vec<StatusCode>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCode {
    pub status_code: u16,
}

impl TestScript {
    /// Script sending a single request to every probe endpoint and expecting a 200.
    /// None when there is nothing to probe.
    pub fn from_probes(probes: &[ServiceProbe]) -> Option<Self> {
        let target = probes.first()?.url.clone();
        let flow = probes
            .iter()
            .flat_map(|probe| probe.endpoints())
            .map(|url| Flow {
                get: GetFlow {
                    url,
                    expect: vec![StatusCode { status_code: 200 }],
                },
            })
            .collect();
        Some(Self {
            config: Config {
                target,
                environments: BTreeMap::from_iter(vec![(
                    FUNCTIONAL_ENVIRONMENT.to_owned(),
                    Environment {
                        phases: vec![Phase {
                            duration: 1,
                            arrival_count: 1,
                        }],
                        plugins: BTreeMap::from_iter(vec![("expect".to_owned(), BTreeMap::new())]),
                    },
                )]),
            },
            scenarios: vec![Scenario { flow }],
        })
    }
}
