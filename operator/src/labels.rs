use std::collections::BTreeMap;

use crate::config::OperatorConfig;

/// Component of the Job that owns the load test workers.
pub const WORKER_MASTER_COMPONENT: &str = "loadtest-worker-master";
/// Component of the pods running a load test.
pub const WORKER_COMPONENT: &str = "loadtest-worker";
/// Value of the part-of label on every load test object.
pub const PART_OF: &str = "loadtest";

/// Manage by label
pub const MANAGED_BY_LABEL_SELECTOR: &str = "app.kubernetes.io/managed-by=loadtest-operator";

/// Labels that indicate the resource is managed by the operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "app.kubernetes.io/managed-by".to_owned(),
        "loadtest-operator".to_owned(),
    )]))
}

/// Managed labels extended with the given labels.
pub fn managed_labels_extend(
    labels: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut managed = managed_labels().unwrap_or_default();
    managed.extend(labels.unwrap_or_default());
    Some(managed)
}

/// Labels used to scope and select the objects of a single load test.
pub fn component_labels(
    config: &OperatorConfig,
    test_name: &str,
    component: &str,
) -> BTreeMap<String, String> {
    let prefix = &config.label_prefix;
    BTreeMap::from_iter(vec![
        (format!("{prefix}/test-name"), test_name.to_owned()),
        (format!("{prefix}/component"), component.to_owned()),
        (format!("{prefix}/part-of"), PART_OF.to_owned()),
    ])
}

/// Label selector matching the worker pods of a load test.
pub fn worker_selector(config: &OperatorConfig, test_name: &str) -> String {
    component_labels(config, test_name, WORKER_COMPONENT)
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_worker_labels() {
        let config = OperatorConfig::default();
        assert_eq!(
            worker_selector(&config, "smoke"),
            [
                "loadtest.dev/component=loadtest-worker",
                "loadtest.dev/part-of=loadtest",
                "loadtest.dev/test-name=smoke",
            ]
            .join(",")
        );
    }

    #[test]
    fn extended_labels_keep_managed_by() {
        let labels = managed_labels_extend(Some(BTreeMap::from_iter(vec![(
            "a".to_owned(),
            "b".to_owned(),
        )])))
        .unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some("loadtest-operator")
        );
    }
}
