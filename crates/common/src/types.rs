//! Core types for trafficlight
//!
//! Everything here crosses the long-poll wire between the orchestrator and
//! its remote adapters, so field names are part of the protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form key/value registration data sent by an adapter.
pub type CapabilityDescriptor = Map<String, Value>;

/// Tag of the action telling an adapter there is nothing to do yet
pub const IDLE_ACTION: &str = "idle";

/// Tag of the action telling an adapter to abandon its identity and restart
pub const EXIT_ACTION: &str = "exit";

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Action returned by a poll: `{"action": <tag>, "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollAction {
    pub action: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

impl PollAction {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Idle action with an advisory re-poll delay in milliseconds.
    pub fn idle(delay_ms: u64) -> Self {
        Self::new(IDLE_ACTION, serde_json::json!({ "delay": delay_ms }))
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        Self::new(EXIT_ACTION, serde_json::json!({ "reason": reason.into() }))
    }

    pub fn is_idle(&self) -> bool {
        self.action == IDLE_ACTION
    }

    pub fn is_exit(&self) -> bool {
        self.action == EXIT_ACTION
    }
}

impl std::fmt::Display for PollAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.data)
    }
}

/// Answer posted by an adapter: `{"response": <tag>, "data": {...}}`
///
/// The tag and data are opaque to the orchestrator and only interpreted by
/// the scenario awaiting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

impl ActionResponse {
    pub fn new(response: impl Into<String>, data: Value) -> Self {
        Self {
            response: response.into(),
            data,
        }
    }
}

/// Which side of the remote failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The scripted action was attempted and failed
    Action,
    /// The adapter process itself is unhealthy
    Adapter,
}

/// Body of an error report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub details: String,
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        if self.error_type == "action" {
            RemoteErrorKind::Action
        } else {
            RemoteErrorKind::Adapter
        }
    }
}

/// Error report posted by an adapter: `{"error": {"type", "path", "details"}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: RemoteError,
}

/// Kind of remote client a test case slot requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityType {
    ElementWeb,
    ElementAndroid,
    ElementIos,
    ElementCall,
    HydrogenWeb,
    NetworkProxy,
}

impl CapabilityType {
    pub const ALL: [CapabilityType; 6] = [
        CapabilityType::ElementWeb,
        CapabilityType::ElementAndroid,
        CapabilityType::ElementIos,
        CapabilityType::ElementCall,
        CapabilityType::HydrogenWeb,
        CapabilityType::NetworkProxy,
    ];

    /// Value an adapter puts in the `type` field of its registration
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::ElementWeb => "element-web",
            CapabilityType::ElementAndroid => "element-android",
            CapabilityType::ElementIos => "element-ios",
            CapabilityType::ElementCall => "element-call",
            CapabilityType::HydrogenWeb => "hydrogen-web",
            CapabilityType::NetworkProxy => "network-proxy",
        }
    }

    pub fn matches(&self, descriptor: &CapabilityDescriptor) -> bool {
        descriptor.get("type").and_then(Value::as_str) == Some(self.as_str())
    }
}

impl std::fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CapabilityType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| format!("unknown capability type: {}", s))
    }
}

/// Server topology a test case needs provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    None,
    SynapseStable,
    SynapseDevelop,
    Dendrite,
    TwoSynapseFederation,
}

impl ServerType {
    pub fn name(&self) -> &'static str {
        match self {
            ServerType::None => "none",
            ServerType::SynapseStable => "synapse-stable",
            ServerType::SynapseDevelop => "synapse-develop",
            ServerType::Dendrite => "dendrite",
            ServerType::TwoSynapseFederation => "two-synapse-federation",
        }
    }

    /// Complement images to start, one per homeserver
    pub fn images(&self) -> Vec<&'static str> {
        match self {
            ServerType::None => vec![],
            ServerType::SynapseStable => {
                vec!["ghcr.io/matrix-org/synapse/complement-synapse:master"]
            }
            ServerType::SynapseDevelop => {
                vec!["ghcr.io/matrix-org/synapse/complement-synapse:develop"]
            }
            ServerType::Dendrite => vec!["complement-dendrite"],
            ServerType::TwoSynapseFederation => vec![
                "ghcr.io/matrix-org/synapse/complement-synapse:develop",
                "ghcr.io/matrix-org/synapse/complement-synapse:develop",
            ],
        }
    }
}

impl Default for ServerType {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Test case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Waiting,
    Preparing,
    Running,
    Success,
    Failed,
    Error,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Success | TestStatus::Failed | TestStatus::Error)
    }
}

impl Default for TestStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Waiting => write!(f, "waiting"),
            TestStatus::Preparing => write!(f, "preparing"),
            TestStatus::Running => write!(f, "running"),
            TestStatus::Success => write!(f, "success"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_poll_action_wire_shape() {
        let idle = serde_json::to_value(PollAction::idle(30000)).unwrap();
        assert_eq!(idle, json!({"action": "idle", "data": {"delay": 30000}}));

        let exit = serde_json::to_value(PollAction::exit("no record of this adapter")).unwrap();
        assert_eq!(
            exit,
            json!({"action": "exit", "data": {"reason": "no record of this adapter"}})
        );
    }

    #[test]
    fn test_response_defaults() {
        let rsp: ActionResponse = serde_json::from_value(json!({"response": "registered"})).unwrap();
        assert_eq!(rsp.response, "registered");
        assert_eq!(rsp.data, json!({}));
    }

    #[test]
    fn test_error_report_kind() {
        let report: ErrorReport = serde_json::from_value(json!({
            "error": {"type": "action", "path": "x", "details": "button missing"}
        }))
        .unwrap();
        assert_eq!(report.error.kind(), RemoteErrorKind::Action);

        let report: ErrorReport = serde_json::from_value(json!({
            "error": {"type": "unknown", "path": "y", "details": "browser crashed"}
        }))
        .unwrap();
        assert_eq!(report.error.kind(), RemoteErrorKind::Adapter);
    }

    #[test]
    fn test_capability_matching() {
        let mut descriptor = CapabilityDescriptor::new();
        descriptor.insert("type".into(), json!("element-web"));
        assert!(CapabilityType::ElementWeb.matches(&descriptor));
        assert!(!CapabilityType::ElementAndroid.matches(&descriptor));

        descriptor.insert("type".into(), json!(42));
        assert!(!CapabilityType::ElementWeb.matches(&descriptor));
        assert!(!CapabilityType::ElementWeb.matches(&CapabilityDescriptor::new()));
    }

    #[test]
    fn test_capability_round_trip_names() {
        for ty in CapabilityType::ALL {
            assert_eq!(ty.as_str().parse::<CapabilityType>().unwrap(), ty);
            assert_eq!(serde_json::to_value(ty).unwrap(), json!(ty.as_str()));
        }
        assert!("element-desktop".parse::<CapabilityType>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TestStatus::Waiting.is_terminal());
        assert!(!TestStatus::Running.is_terminal());
        assert!(TestStatus::Failed.is_terminal());
        assert_eq!(TestStatus::Failed.to_string(), "failed");
    }
}
