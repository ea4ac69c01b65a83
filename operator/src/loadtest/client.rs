//! Calls the reconciler makes to the API server.
use std::{future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{ConfigMap, Pod},
};
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};
#[cfg(test)]
use mockall::automock;

use crate::loadtest::{Error, LoadTest};

/// Define the behavior we consume from the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoadTestClient: Send + Sync {
    /// Fetch a load test, None when it does not exist.
    async fn get_load_test(&self, ns: &str, name: &str) -> Result<Option<LoadTest>, Error>;
    /// Report whether a ConfigMap exists.
    async fn get_config_map_exists(&self, ns: &str, name: &str) -> Result<bool, Error>;
    /// Fetch a Job, None when it does not exist.
    async fn get_job(&self, ns: &str, name: &str) -> Result<Option<Job>, Error>;
    /// Create a Job.
    async fn create_job(&self, ns: &str, job: &Job) -> Result<Job, Error>;
    /// Names of the pods matching a label selector.
    async fn list_pod_names(&self, ns: &str, selector: &str) -> Result<Vec<String>, Error>;
    /// Replace the status of a load test.
    ///
    /// The resource version of the given load test is sent along,
    /// so the write conflicts if the load test was modified since it was read.
    async fn replace_status(&self, load_test: &LoadTest) -> Result<LoadTest, Error>;
}

/// Client for the K8s API server.
#[derive(Clone)]
pub struct KubeLoadTestClient {
    client: Client,
}

impl KubeLoadTestClient {
    /// Create a client over a kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LoadTestClient for KubeLoadTestClient {
    async fn get_load_test(&self, ns: &str, name: &str) -> Result<Option<LoadTest>, Error> {
        let load_tests: Api<LoadTest> = Api::namespaced(self.client.clone(), ns);
        Ok(load_tests.get_opt(name).await?)
    }

    async fn get_config_map_exists(&self, ns: &str, name: &str) -> Result<bool, Error> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), ns);
        Ok(config_maps.get_opt(name).await?.is_some())
    }

    async fn get_job(&self, ns: &str, name: &str) -> Result<Option<Job>, Error> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), ns);
        Ok(jobs.get_opt(name).await?)
    }

    async fn create_job(&self, ns: &str, job: &Job) -> Result<Job, Error> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), ns);
        Ok(jobs.create(&PostParams::default(), job).await?)
    }

    async fn list_pod_names(&self, ns: &str, selector: &str) -> Result<Vec<String>, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let pods = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn replace_status(&self, load_test: &LoadTest) -> Result<LoadTest, Error> {
        let ns = load_test
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let load_tests: Api<LoadTest> = Api::namespaced(self.client.clone(), &ns);
        let data = serde_json::to_vec(load_test)?;
        Ok(load_tests
            .replace_status(&load_test.name_any(), &PostParams::default(), data)
            .await?)
    }
}

/// Run a call to the API server, failing with a timeout if it does not finish in time.
pub async fn with_deadline<T>(
    deadline: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| Error::Timeout { operation })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let result: Result<(), Error> = with_deadline(Duration::from_secs(1), "get_job", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::Timeout {
                operation: "get_job"
            })
        ));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_deadline(Duration::from_secs(1), "get_job", async { Ok(7) }).await;
        assert!(matches!(result, Ok(7)));
    }
}
