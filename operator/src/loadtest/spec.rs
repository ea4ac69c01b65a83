//! Place all spec types into a single module so they can be used as a lightweight dependency
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::{gen::SchemaGenerator, schema::Schema, JsonSchema};
use serde::{Deserialize, Serialize};

/// Key of the test script inside its ConfigMap.
pub const TEST_SCRIPT_KEY: &str = "test-script.yaml";

/// Primary CRD for running a test script on a set of load test workers.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "loadtest.dev",
    version = "v1alpha1",
    kind = "LoadTest",
    plural = "loadtests",
    shortname = "lt",
    status = "LoadTestStatus",
    derive = "PartialEq",
    namespaced,
    printcolumn = r#"{"name":"Completions","type":"string","jsonPath":".status.completions"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".status.duration"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.environment"}"#,
    printcolumn = r#"{"name":"Image","type":"string","priority":10,"jsonPath":".status.image"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestSpec {
    /// Number of workers running the test script.
    /// Zero is treated as a single worker.
    #[serde(default)]
    pub count: u32,
    /// Free form name of the environment under test.
    #[serde(default)]
    pub environment: String,
    /// Where the test script is stored.
    pub test_script: TestScript,
}

impl LoadTestSpec {
    /// Spec of a load test reading its script from the named ConfigMap.
    pub fn new(config_map: impl Into<String>, environment: impl Into<String>, count: u32) -> Self {
        Self {
            count,
            environment: environment.into(),
            test_script: TestScript {
                config: TestScriptConfig {
                    config_map: config_map.into(),
                },
            },
        }
    }
}

/// Reference to the test script of a load test.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestScript {
    /// Configuration object holding the script.
    pub config: TestScriptConfig,
}

/// Configuration object holding a test script.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestScriptConfig {
    /// Name of a ConfigMap, in the namespace of the load test, containing the script.
    pub config_map: String,
}

/// Observed state of a load test.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestStatus {
    /// Latest observations of the load test state.
    #[serde(default)]
    pub conditions: Conditions,
    /// Time the workers started running.
    pub start_time: Option<Time>,
    /// Time all workers succeeded.
    /// Never set when a worker failed.
    pub completion_time: Option<Time>,
    /// How long the load test ran, or has been running.
    #[serde(default)]
    pub duration: String,
    /// Succeeded workers out of the expected workers.
    #[serde(default)]
    pub completions: String,
    /// Image of the workers.
    #[serde(default)]
    pub image: String,
    /// Number of workers currently running.
    #[serde(default)]
    pub active: i32,
    /// Number of workers that succeeded.
    #[serde(default)]
    pub succeeded: i32,
    /// Number of workers that failed.
    #[serde(default)]
    pub failed: i32,
}

/// Kind of a load test condition.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum ConditionType {
    /// Workers are pending, running or finished.
    Progressing,
    /// All workers finished, status False when any of them failed.
    Completed,
    /// A type this operator does not manage, dropped when decoding [`Conditions`].
    #[serde(other)]
    #[schemars(skip)]
    Unrecognized,
}

/// Status of a load test condition.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// It is not known yet whether the condition holds.
    #[default]
    Unknown,
}

/// A single observation of the load test state.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestCondition {
    /// Kind of the condition.
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Status of the condition.
    pub status: ConditionStatus,
    /// Last time the condition was observed.
    pub last_probe_time: Option<Time>,
    /// Last time the status changed.
    pub last_transition_time: Option<Time>,
    /// Machine readable reason of the last transition.
    #[serde(default)]
    pub reason: String,
    /// Human readable details about the last transition.
    #[serde(default)]
    pub message: String,
}

/// Conditions keyed by their type.
///
/// Holds at most one condition per type and keeps the order conditions were first added in.
/// Encoded as a plain list, where a later entry replaces an earlier one of the same type.
/// Conditions of unrecognized types are dropped on decode.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(
    from = "Vec<LoadTestCondition>",
    into = "Vec<LoadTestCondition>"
)]
pub struct Conditions(Vec<LoadTestCondition>);

impl Conditions {
    /// The condition of the given type, if any.
    pub fn get(&self, type_: ConditionType) -> Option<&LoadTestCondition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Insert the condition, replacing any condition of the same type in place.
    pub fn upsert(&mut self, condition: LoadTestCondition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.0.push(condition),
        }
    }

    /// Record an observation of a condition.
    ///
    /// The probe time is always moved to `now`, the transition time only when the status
    /// changes or the condition is new.
    pub fn observe(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: String,
        now: &Time,
    ) {
        let last_transition_time = match self.get(type_) {
            Some(existing) if existing.status == status => existing.last_transition_time.clone(),
            _ => Some(now.clone()),
        };
        self.upsert(LoadTestCondition {
            type_,
            status,
            last_probe_time: Some(now.clone()),
            last_transition_time,
            reason: reason.to_owned(),
            message,
        });
    }

    /// Iterate over the conditions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &LoadTestCondition> {
        self.0.iter()
    }

    /// True when no condition was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<LoadTestCondition>> for Conditions {
    fn from(list: Vec<LoadTestCondition>) -> Self {
        let mut conditions = Conditions::default();
        for condition in list
            .into_iter()
            .filter(|c| c.type_ != ConditionType::Unrecognized)
        {
            conditions.upsert(condition);
        }
        conditions
    }
}

impl From<Conditions> for Vec<LoadTestCondition> {
    fn from(conditions: Conditions) -> Self {
        conditions.0
    }
}

impl JsonSchema for Conditions {
    fn schema_name() -> String {
        "Conditions".to_owned()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <Vec<LoadTestCondition>>::json_schema(generator)
    }
}
