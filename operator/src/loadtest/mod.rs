//! LoadTest is a k8s custom resource that runs a test script on a number of workers.
//!
//! The reconciler drives each LoadTest through a fixed lifecycle:
//! pending -> active -> completed (successfully or with failed workers).
#[cfg(feature = "controller")]
pub mod client;
#[cfg(feature = "controller")]
pub(crate) mod controller;
#[cfg(feature = "controller")]
pub mod job;
#[cfg(feature = "controller")]
pub mod phase;
mod spec;
#[cfg(feature = "controller")]
pub mod status;

pub use spec::*;

#[cfg(feature = "controller")]
pub use controller::run;

/// Errors produced by the reconcile function.
///
/// Every variant aborts the current pass without writing a status and is retried.
#[cfg(feature = "controller")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The API server rejected or failed a request.
    #[error("Kube error: {source}")]
    Kube {
        /// Underlying client error.
        #[from]
        source: kube::Error,
    },
    /// A request to the API server did not finish before its deadline.
    #[error("Request timed out: {operation}")]
    Timeout {
        /// Name of the request that timed out.
        operation: &'static str,
    },
    /// A status could not be encoded for the API server.
    #[error("Serialization error: {source}")]
    Serialization {
        /// Underlying encoding error.
        #[from]
        source: serde_json::Error,
    },
    /// An object is missing a field the reconciler needs.
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
    /// The worker Job could not be read back after it was ensured.
    #[error("Job {0} not found")]
    JobNotFound(String),
    /// The status kept being modified concurrently.
    #[error("Status update conflicted {attempts} times")]
    ConflictRetriesExhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },
}
