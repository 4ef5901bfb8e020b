//! Test cases: one concrete run of a scenario
//!
//! Status moves `waiting -> preparing -> running -> success|failed|error`,
//! skipping `running` when provisioning fails. Whatever happens inside the
//! scenario, every adapter bound to the test case is completed when
//! [`TestCase::run`] returns.

use crate::adapter::AdapterRegistry;
use crate::allocator::ClientSlot;
use crate::client::{Client, FileIndex};
use crate::homerunner::{HomeServer, ServerProvisioner};
use crate::scenario::{Scenario, ScenarioContext};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use trafficlight_common::{Error, Result, ServerType, TestStatus};

/// A scenario bound to one combination of client types
#[derive(Clone)]
pub struct TestCase {
    inner: Arc<TestCaseInner>,
}

struct TestCaseInner {
    id: String,
    scenario: Arc<dyn Scenario>,
    slots: Vec<ClientSlot>,
    server_type: ServerType,
    server_names: Vec<String>,
    state: Mutex<RunState>,
    files: FileIndex,
}

#[derive(Default)]
struct RunState {
    status: TestStatus,
    error: Option<String>,
    adapters: Vec<String>,
    servers: Vec<HomeServer>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.inner.id)
            .field("scenario", &self.inner.scenario.name())
            .field("status", &self.status())
            .finish()
    }
}

impl TestCase {
    pub fn new(scenario: Arc<dyn Scenario>, slots: Vec<ClientSlot>) -> Self {
        let definition = scenario.definition();
        let id = test_case_id(
            scenario.name(),
            definition.server_type,
            &definition.server_names,
            &slots,
        );
        Self {
            inner: Arc::new(TestCaseInner {
                id,
                scenario,
                slots,
                server_type: definition.server_type,
                server_names: definition.server_names,
                state: Mutex::new(RunState::default()),
                files: FileIndex::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn scenario_name(&self) -> &str {
        self.inner.scenario.name()
    }

    pub fn slots(&self) -> &[ClientSlot] {
        &self.inner.slots
    }

    pub fn files(&self) -> &FileIndex {
        &self.inner.files
    }

    pub fn status(&self) -> TestStatus {
        self.inner.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    /// Human readable summary of the role assignment, e.g. `alice=element-web on dendrite`
    pub fn description(&self) -> String {
        let roles: Vec<String> = self
            .inner
            .slots
            .iter()
            .map(|slot| format!("{}={}", slot.role, slot.capability))
            .collect();
        format!("{} on {}", roles.join(", "), self.inner.server_type)
    }

    /// Move from waiting to preparing. Returns false if the case already left waiting.
    pub fn try_begin(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != TestStatus::Waiting {
            return false;
        }
        state.status = TestStatus::Preparing;
        state.started_at = Some(Utc::now());
        true
    }

    fn set_status(&self, status: TestStatus) {
        info!("Test case {} is now {}", self.inner.id, status);
        self.inner.state.lock().status = status;
    }

    /// Run the scenario with `clients`, then complete their adapters and release servers.
    ///
    /// Never fails: every outcome, including a panicking scenario, ends in a
    /// terminal status which is returned.
    pub async fn run(
        &self,
        clients: Vec<Client>,
        registry: &AdapterRegistry,
        provisioner: &dyn ServerProvisioner,
    ) -> TestStatus {
        let handles: Vec<String> = clients.iter().map(|c| c.adapter().to_string()).collect();
        self.inner.state.lock().adapters = handles.clone();
        info!("Starting test case {} ({})", self.inner.id, self.description());

        let result = AssertUnwindSafe(self.drive(clients, provisioner))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::ScenarioPanicked(panic_message(panic))));

        registry.complete(&handles);
        let servers = std::mem::take(&mut self.inner.state.lock().servers);
        if !servers.is_empty() {
            provisioner.release(&servers).await;
        }

        self.finish(result)
    }

    async fn drive(&self, clients: Vec<Client>, provisioner: &dyn ServerProvisioner) -> Result<()> {
        let servers = provisioner
            .create(&self.inner.id, self.inner.server_type)
            .await?;
        self.inner.state.lock().servers = servers.clone();
        if servers.len() < self.inner.server_names.len() {
            return Err(Error::Provisioning(format!(
                "needed {} servers for {} but got {}",
                self.inner.server_names.len(),
                self.inner.server_type,
                servers.len()
            )));
        }

        self.set_status(TestStatus::Running);
        let named = self.inner.server_names.iter().cloned().zip(servers).collect();
        let ctx = ScenarioContext::new(clients, named);
        self.inner.scenario.run(&ctx).await
    }

    fn finish(&self, result: Result<()>) -> TestStatus {
        let mut state = self.inner.state.lock();
        match result {
            Ok(()) => {
                state.status = TestStatus::Success;
                info!("Test case {} passed", self.inner.id);
            }
            Err(e) => {
                state.status = e.outcome();
                if state.status == TestStatus::Failed {
                    warn!("Test case {} failed: {}", self.inner.id, e);
                } else {
                    error!("Test case {} errored: {}", self.inner.id, e);
                }
                state.error = Some(e.to_string());
            }
        }
        state.finished_at = Some(Utc::now());
        state.status
    }

    pub fn info(&self) -> TestCaseInfo {
        let state = self.inner.state.lock();
        TestCaseInfo {
            id: self.inner.id.clone(),
            scenario: self.inner.scenario.name().to_string(),
            description: self.description(),
            status: state.status,
            error: state.error.clone(),
            adapters: state.adapters.clone(),
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    /// Uploaded files as `{role}_{filename}` to stored path
    pub fn file_listing(&self) -> BTreeMap<String, String> {
        self.inner
            .files
            .read()
            .iter()
            .map(|(key, path)| (key.clone(), path.display().to_string()))
            .collect()
    }
}

/// Status view of a test case
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseInfo {
    pub id: String,
    pub scenario: String,
    pub description: String,
    pub status: TestStatus,
    pub error: Option<String>,
    pub adapters: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Stable id derived from everything that makes the test case distinct
fn test_case_id(scenario: &str, server_type: ServerType, server_names: &[String], slots: &[ClientSlot]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scenario.as_bytes());
    hasher.update(b"\n");
    hasher.update(server_type.name().as_bytes());
    for name in server_names {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
    }
    for slot in slots {
        hasher.update(b"\n");
        hasher.update(format!("{}={}", slot.role, slot.capability).as_bytes());
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
