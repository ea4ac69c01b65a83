//! Provides types and functions that are common to both the operator and the CLI.
#![deny(missing_docs)]
#[cfg(feature = "telemetry")]
pub mod telemetry;
