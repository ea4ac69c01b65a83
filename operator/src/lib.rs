//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Config module for the immutable operator configuration.
#[cfg(feature = "controller")]
pub mod config;
/// Events module for publishing K8s events about LoadTest resources.
#[cfg(feature = "controller")]
pub mod events;
/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// LoadTest module for the custom resource and its reconciler.
pub mod loadtest;
/// Telemetry module for anonymized usage events.
#[cfg(feature = "controller")]
pub mod telemetry;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

/// A list of constants used in various K8s resources
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "loadtest-operator";
