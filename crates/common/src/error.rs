//! Error types for trafficlight

use crate::types::TestStatus;
use thiserror::Error;

/// Result type alias using the trafficlight Error
pub type Result<T> = std::result::Result<T, Error>;

/// Trafficlight error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No record of adapter {0}")]
    UnknownAdapter(String),

    #[error("Adapter {0} is already in use, cannot re-register")]
    AdapterInUse(String),

    #[error("Adapter {0} has not been assigned a client yet")]
    AdapterNotBound(String),

    #[error("Client {0} is not waiting for a response")]
    NoActionPending(String),

    #[error("Action collision on client {client}: already waiting for a response to {pending}")]
    ActionCollision { client: String, pending: String },

    #[error("ActionException from adapter\n{details}\nIn file {path}")]
    ActionFailed { details: String, path: String },

    #[error("AdapterException from adapter\n{details}\nIn file {path}")]
    AdapterFailed { details: String, path: String },

    #[error("Timed out adapter after {seconds}s without a poll or response")]
    PollTimeout { seconds: u64 },

    #[error("Shutting down trafficlight")]
    Shutdown,

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Server provisioning failed: {0}")]
    Provisioning(String),

    #[error("Scenario panicked: {0}")]
    ScenarioPanicked(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Terminal test case status this error produces when it escapes a scenario.
    ///
    /// Assertion and action failures mean the system under test misbehaved;
    /// everything else means the harness or its infrastructure did.
    pub fn outcome(&self) -> TestStatus {
        match self {
            Error::AssertionFailed(_) | Error::ActionFailed { .. } => TestStatus::Failed,
            _ => TestStatus::Error,
        }
    }

    /// True for errors caused by a remote breaking the adapter protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::AdapterInUse(_)
                | Error::AdapterNotBound(_)
                | Error::NoActionPending(_)
                | Error::ActionCollision { .. }
        )
    }
}
