//! Kustomize overlay wiring a test script into the ConfigMap a LoadTest references.
use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LABEL_PREFIX: &str = "loadtest.dev";
const PART_OF: &str = "loadtest";

/// A kustomization.yaml document.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    pub api_version: String,
    pub kind: String,
    pub resources: Vec<String>,
    pub config_map_generator: Vec<ConfigMapGenerator>,
    pub generator_options: GeneratorOptions,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ConfigMapGenerator {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    pub disable_name_suffix_hash: bool,
    pub labels: BTreeMap<String, String>,
}

impl Kustomization {
    /// Kustomization generating `config_map` from a script stored next to it, under `key`.
    pub fn new(resource: &str, config_map: &str, key: &str, script: &str) -> Self {
        Self {
            api_version: "kustomize.config.k8s.io/v1beta1".to_owned(),
            kind: "Kustomization".to_owned(),
            resources: vec![resource.to_owned()],
            config_map_generator: vec![ConfigMapGenerator {
                name: config_map.to_owned(),
                files: vec![format!("{key}={script}")],
            }],
            generator_options: GeneratorOptions {
                // The LoadTest references the ConfigMap by its exact name.
                disable_name_suffix_hash: true,
                labels: BTreeMap::from_iter(vec![
                    (
                        format!("{LABEL_PREFIX}/component"),
                        format!("{PART_OF}-config"),
                    ),
                    (format!("{LABEL_PREFIX}/part-of"), PART_OF.to_owned()),
                ]),
            },
        }
    }
}

/// Create a directory, and its parents, only readable by the current user.
pub async fn create_dir(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))
}

/// Write a value as a YAML document.
pub async fn write_yaml(path: &Path, value: &impl Serialize) -> Result<()> {
    let data = serde_yaml::to_string(value)?;
    debug!(path = %path.display(), bytes = data.len(), "writing manifest");
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn kustomization_wires_script() {
        let kustomization = Kustomization::new(
            "loadtest-cr.yaml",
            "smoke-test-script",
            "test-script.yaml",
            "smoke.yaml",
        );
        expect![[r#"
            Kustomization {
                api_version: "kustomize.config.k8s.io/v1beta1",
                kind: "Kustomization",
                resources: [
                    "loadtest-cr.yaml",
                ],
                config_map_generator: [
                    ConfigMapGenerator {
                        name: "smoke-test-script",
                        files: [
                            "test-script.yaml=smoke.yaml",
                        ],
                    },
                ],
                generator_options: GeneratorOptions {
                    disable_name_suffix_hash: true,
                    labels: {
                        "loadtest.dev/component": "loadtest-config",
                        "loadtest.dev/part-of": "loadtest",
                    },
                },
            }
        "#]]
        .assert_debug_eq(&kustomization);
    }

    #[tokio::test]
    async fn writes_yaml_with_k8s_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("manifests");
        create_dir(&out).await.unwrap();
        let path = out.join("kustomization.yaml");
        write_yaml(
            &path,
            &Kustomization::new("loadtest-cr.yaml", "a", "test-script.yaml", "a.yaml"),
        )
        .await
        .unwrap();

        let value: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["kind"], "Kustomization");
        assert_eq!(
            value["generatorOptions"]["disableNameSuffixHash"],
            serde_yaml::Value::Bool(true)
        );
        assert_eq!(value["configMapGenerator"][0]["name"], "a");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directories_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("manifests");
        create_dir(&out).await.unwrap();
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
