//! Generate a LoadTest manifest and the kustomization wiring its test script.
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use loadtest_operator::loadtest::{LoadTest, LoadTestSpec, TEST_SCRIPT_KEY};
use tracing::debug;

use crate::manifest::{create_dir, write_yaml, Kustomization};

const LOADTEST_MANIFEST: &str = "loadtest-cr.yaml";
const KUSTOMIZATION_MANIFEST: &str = "kustomization.yaml";

/// Options to Generate command
#[derive(Args, Debug)]
pub struct Opts {
    /// Name of the load test.
    name: String,

    /// Path to the Artillery test script.
    #[arg(long, short)]
    script: PathBuf,

    /// Environment the load test targets.
    #[arg(long, short, default_value = "dev")]
    env: String,

    /// Directory the manifests are written to.
    #[arg(long, short, default_value = "loadtest-manifests")]
    out: PathBuf,

    /// Number of load test workers.
    #[arg(long, short, default_value_t = 1)]
    count: u32,
}

/// Write the manifests of a load test, returning the paths of the written manifests.
pub async fn generate(opts: Opts) -> Result<Vec<PathBuf>> {
    validate_name(&opts.name)?;
    let metadata = tokio::fs::metadata(&opts.script)
        .await
        .with_context(|| format!("reading test script {}", opts.script.display()))?;
    if !metadata.is_file() {
        bail!("test script {} is not a file", opts.script.display());
    }
    let script_name = opts
        .script
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid test script path {}", opts.script.display()))?
        .to_owned();

    create_dir(&opts.out).await?;
    copy_script(&opts.script, &opts.out.join(&script_name)).await?;

    let config_map = format!("{}-test-script", opts.name);
    let load_test = LoadTest::new(
        &opts.name,
        LoadTestSpec::new(config_map.clone(), opts.env, opts.count),
    );
    let manifest = opts.out.join(LOADTEST_MANIFEST);
    write_yaml(&manifest, &load_test).await?;

    let kustomization = opts.out.join(KUSTOMIZATION_MANIFEST);
    write_yaml(
        &kustomization,
        &Kustomization::new(LOADTEST_MANIFEST, &config_map, TEST_SCRIPT_KEY, &script_name),
    )
    .await?;

    Ok(vec![manifest, kustomization])
}

async fn copy_script(script: &Path, dest: &Path) -> Result<()> {
    if let (Ok(from), Ok(to)) = (
        tokio::fs::canonicalize(script).await,
        tokio::fs::canonicalize(dest).await,
    ) {
        if from == to {
            debug!(path = %from.display(), "test script already in place");
            return Ok(());
        }
    }
    tokio::fs::copy(script, dest)
        .await
        .with_context(|| format!("copying test script to {}", dest.display()))?;
    Ok(())
}

/// Load test names become object names, they must be DNS-1123 subdomains.
fn validate_name(name: &str) -> Result<()> {
    let valid_label = |label: &str| {
        !label.is_empty()
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    if name.is_empty() || name.len() > 253 || !name.split('.').all(valid_label) {
        bail!(
            "invalid load test name {name:?}: must consist of lower case \
             alphanumeric characters, '-' or '.', and must start and end with an \
             alphanumeric character"
        );
    }
    Ok(())
}
