//! Orchestrator state
//!
//! [`Orchestrator`] owns every process-wide collection (adapters, suites,
//! running test cases) and is handed to each HTTP handler and sweeper.

use crate::adapter::{AdapterInfo, AdapterRegistry, Registration};
use crate::config::OrchestratorConfig;
use crate::homerunner::ServerProvisioner;
use crate::scenario::Scenario;
use crate::suite::{SuiteCounts, SuiteInfo, TestSuite};
use crate::testcase::{TestCase, TestCaseInfo};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use trafficlight_common::{
    ActionResponse, CapabilityDescriptor, Error, ErrorReport, PollAction, RemoteErrorKind, Result,
    TestStatus,
};

/// Shared orchestrator context
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: AdapterRegistry,
    suites: Arc<RwLock<Vec<TestSuite>>>,
    provisioner: Arc<dyn ServerProvisioner>,
    /// Test cases currently running
    running: Arc<Mutex<JoinSet<()>>>,
    /// Signalled whenever a new adapter registers
    registered: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, provisioner: Arc<dyn ServerProvisioner>) -> Self {
        Self {
            config: Arc::new(config),
            registry: AdapterRegistry::new(),
            suites: Arc::new(RwLock::new(Vec::new())),
            provisioner,
            running: Arc::new(Mutex::new(JoinSet::new())),
            registered: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    // ========================================================================
    // Suites
    // ========================================================================

    /// Expand `scenario` into a suite of waiting test cases
    pub fn add_scenario(&self, scenario: Arc<dyn Scenario>) -> String {
        let suite = TestSuite::from_scenario(scenario);
        let id = suite.id().to_string();
        info!(
            "Loaded {} with {} test cases as suite {}",
            suite.scenario_name(),
            suite.test_cases().len(),
            id
        );
        self.suites.write().push(suite);
        id
    }

    /// Add every scenario the configured filter selects. Returns how many were added.
    pub fn load_scenarios(&self, scenarios: Vec<Arc<dyn Scenario>>) -> Result<usize> {
        let filter = match &self.config.test_filter {
            Some(pattern) => Some(
                regex_lite::Regex::new(pattern)
                    .map_err(|e| Error::InvalidConfig(format!("test_filter {}: {}", pattern, e)))?,
            ),
            None => None,
        };

        let mut loaded = 0;
        for scenario in scenarios {
            if filter.as_ref().map_or(true, |re| re.is_match(scenario.name())) {
                self.add_scenario(scenario);
                loaded += 1;
            } else {
                debug!("Skipping scenario {} (filtered)", scenario.name());
            }
        }
        Ok(loaded)
    }

    pub fn suites(&self) -> Vec<TestSuite> {
        self.suites.read().clone()
    }

    pub fn test_case(&self, id: &str) -> Option<TestCase> {
        self.suites
            .read()
            .iter()
            .flat_map(|suite| suite.test_cases())
            .find(|case| case.id() == id)
            .cloned()
    }

    /// True once every test case of every suite is terminal
    pub fn all_finished(&self) -> bool {
        self.suites.read().iter().all(TestSuite::is_finished)
    }

    pub fn totals(&self) -> SuiteCounts {
        let mut totals = SuiteCounts::default();
        for suite in self.suites.read().iter() {
            totals.add(suite.counts());
        }
        totals
    }

    // ========================================================================
    // Adapter protocol
    // ========================================================================

    pub fn register(&self, handle: &str, registration: CapabilityDescriptor) -> Result<()> {
        if self.registry.register(handle, registration)? == Registration::Created {
            self.registered.notify_one();
        }
        Ok(())
    }

    pub fn poll(&self, handle: &str) -> PollAction {
        self.registry.poll(handle)
    }

    pub fn respond(&self, handle: &str, response: ActionResponse) -> Result<()> {
        self.registry.respond(handle, response)
    }

    /// Route a remote error report to the bound client
    pub fn report_error(&self, handle: &str, report: ErrorReport) -> Result<()> {
        let remote = report.error;
        let error = match remote.kind() {
            RemoteErrorKind::Action => Error::ActionFailed {
                details: remote.details,
                path: remote.path,
            },
            RemoteErrorKind::Adapter => Error::AdapterFailed {
                details: remote.details,
                path: remote.path,
            },
        };
        self.registry.report_error(handle, error)
    }

    /// Store a file uploaded by `handle` and index it under the bound role.
    pub async fn upload(&self, handle: &str, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        let client = self.registry.bound_client(handle)?;
        let filename = sanitize_filename(filename)?;

        let path = self
            .config
            .upload_folder
            .join(format!("{}{}", handle, filename));
        tokio::fs::create_dir_all(&self.config.upload_folder).await?;
        tokio::fs::write(&path, contents).await?;

        info!("Stored {} from {} at {}", filename, handle, path.display());
        client.record_upload(&filename, path.clone());
        self.registry.touch_response(handle);
        Ok(path)
    }

    // ========================================================================
    // Sweeper operations
    // ========================================================================

    /// Start the first waiting test case whose slots can all be filled.
    ///
    /// At most one test case is started per call. Returns its id.
    pub fn promote_next(&self) -> Option<String> {
        self.collect_finished();
        let waiting: Vec<TestCase> = self
            .suites
            .read()
            .iter()
            .flat_map(|suite| suite.test_cases())
            .filter(|case| case.status() == TestStatus::Waiting)
            .cloned()
            .collect();

        for case in waiting {
            let Some(clients) = self
                .registry
                .claim(case.slots(), case.files(), || case.try_begin())
            else {
                continue;
            };

            let id = case.id().to_string();
            info!("Promoting test case {} ({})", id, case.description());
            let registry = self.registry.clone();
            let provisioner = self.provisioner.clone();
            self.running.lock().spawn(async move {
                case.run(clients, &registry, provisioner.as_ref()).await;
            });
            return Some(id);
        }
        None
    }

    /// Drop the join handles of test cases that have already returned
    fn collect_finished(&self) {
        let mut running = self.running.lock();
        while let Some(result) = running.try_join_next() {
            if let Err(e) = result {
                warn!("Test case task ended abnormally: {}", e);
            }
        }
    }

    /// Remove idle adapters and fail silent ones, as of `now`
    pub fn reap(&self, now: DateTime<Utc>) -> ReapOutcome {
        let sweeper = &self.config.sweeper;
        let removed = self
            .registry
            .reap_idle(now, Duration::seconds(sweeper.idle_timeout_secs as i64));
        let timed_out = self
            .registry
            .time_out_active(now, Duration::seconds(sweeper.active_timeout_secs as i64));
        ReapOutcome { removed, timed_out }
    }

    /// Wait until a new adapter registers
    pub async fn registered(&self) {
        self.registered.notified().await
    }

    /// Fail every adapter and wait for running test cases to wind down
    pub async fn shutdown(&self) {
        warn!("Shutting down; failing all adapters");
        self.registry.fail_all(|| Error::Shutdown);

        let mut running = std::mem::take(&mut *self.running.lock());
        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                warn!("Test case task ended abnormally: {}", e);
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> StatusReport {
        StatusReport {
            adapters: self.registry.list(),
            totals: self.totals(),
            suites: self.suites.read().iter().map(TestSuite::info).collect(),
        }
    }

    pub fn suite_info(&self, id: &str) -> Option<SuiteInfo> {
        self.suites
            .read()
            .iter()
            .find(|suite| suite.id() == id)
            .map(TestSuite::info)
    }

    pub fn test_case_detail(&self, id: &str) -> Option<TestCaseDetail> {
        self.test_case(id).map(|case| TestCaseDetail {
            files: case.file_listing(),
            info: case.info(),
        })
    }
}

/// What one reaper tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub removed: Vec<String>,
    pub timed_out: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub adapters: Vec<AdapterInfo>,
    pub totals: SuiteCounts,
    pub suites: Vec<SuiteInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseDetail {
    #[serde(flatten)]
    pub info: TestCaseInfo,
    pub files: BTreeMap<String, String>,
}

/// Strip directories and leading dots so the name cannot escape the upload folder
fn sanitize_filename(filename: &str) -> Result<String> {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim_start_matches('.');
    if base.is_empty() {
        return Err(Error::InvalidRequest(format!("unusable file name {:?}", filename)));
    }
    Ok(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homerunner::HomeServer;
    use crate::scenario::{ScenarioContext, TestDefinition};
    use async_trait::async_trait;
    use serde_json::json;
    use trafficlight_common::{CapabilityType, RemoteError, ServerType};

    struct ReloadOnce(&'static str);

    #[async_trait]
    impl Scenario for ReloadOnce {
        fn name(&self) -> &str {
            self.0
        }

        fn definition(&self) -> TestDefinition {
            TestDefinition::new().client("alice", [CapabilityType::ElementWeb])
        }

        async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
            ctx.client("alice")?.reload().await
        }
    }

    struct NoServers;

    #[async_trait]
    impl ServerProvisioner for NoServers {
        async fn create(&self, _test_case_id: &str, _server_type: ServerType) -> Result<Vec<HomeServer>> {
            Ok(Vec::new())
        }
    }

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(config, Arc::new(NoServers))
    }

    fn web() -> CapabilityDescriptor {
        let mut descriptor = CapabilityDescriptor::new();
        descriptor.insert("type".into(), json!("element-web"));
        descriptor
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("shot.png").unwrap(), "shot.png");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\..hidden").unwrap(), "hidden");
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("...").is_err());
    }

    #[test]
    fn test_load_scenarios_honours_filter() {
        let orchestrator = orchestrator(OrchestratorConfig {
            test_filter: Some("^send_".to_string()),
            ..Default::default()
        });
        let loaded = orchestrator
            .load_scenarios(vec![
                Arc::new(ReloadOnce("send_messages")),
                Arc::new(ReloadOnce("verify_client")),
            ])
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(orchestrator.suites()[0].scenario_name(), "send_messages");
    }

    #[tokio::test]
    async fn test_new_registration_wakes_promoter() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.register("a1", web()).unwrap();
        // Permit is stored, so this resolves immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), orchestrator.registered())
            .await
            .unwrap();

        // Repeat registrations do not wake it again
        orchestrator.register("a1", web()).unwrap();
        let again =
            tokio::time::timeout(std::time::Duration::from_millis(50), orchestrator.registered()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_promotes_one_test_case_per_call() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.add_scenario(Arc::new(ReloadOnce("first")));
        orchestrator.add_scenario(Arc::new(ReloadOnce("second")));

        assert!(orchestrator.promote_next().is_none());

        orchestrator.register("a1", web()).unwrap();
        orchestrator.register("a2", web()).unwrap();

        let first = orchestrator.promote_next().unwrap();
        let suites = orchestrator.suites();
        assert_eq!(first, suites[0].test_cases()[0].id());
        assert_eq!(suites[1].test_cases()[0].status(), TestStatus::Waiting);

        let second = orchestrator.promote_next().unwrap();
        assert_eq!(second, suites[1].test_cases()[0].id());
        assert!(orchestrator.promote_next().is_none());
    }

    #[tokio::test]
    async fn test_finished_runs_are_collected() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.add_scenario(Arc::new(ReloadOnce("reload")));
        orchestrator.register("a1", web()).unwrap();
        let id = orchestrator.promote_next().unwrap();
        assert_eq!(orchestrator.running.lock().len(), 1);

        while orchestrator.poll("a1").action != "reload" {
            tokio::task::yield_now().await;
        }
        orchestrator
            .respond("a1", ActionResponse::new("reloaded", json!({})))
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                assert!(orchestrator.promote_next().is_none());
                if orchestrator.running.lock().is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(orchestrator.test_case(&id).unwrap().status(), TestStatus::Success);
    }

    #[tokio::test]
    async fn test_report_error_maps_kind() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.add_scenario(Arc::new(ReloadOnce("reload")));
        orchestrator.register("a1", web()).unwrap();
        let id = orchestrator.promote_next().unwrap();

        while orchestrator.poll("a1").action != "reload" {
            tokio::task::yield_now().await;
        }
        orchestrator
            .report_error(
                "a1",
                ErrorReport {
                    error: RemoteError {
                        error_type: "adapter".into(),
                        path: "main.py".into(),
                        details: "browser crashed".into(),
                    },
                },
            )
            .unwrap();

        orchestrator.shutdown().await;
        let case = orchestrator.test_case(&id).unwrap();
        assert_eq!(case.status(), TestStatus::Error);
        assert!(case.error().unwrap().starts_with("AdapterException from adapter"));
    }

    #[tokio::test]
    async fn test_upload_requires_binding_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(OrchestratorConfig {
            upload_folder: dir.path().join("uploads"),
            ..Default::default()
        });
        orchestrator.add_scenario(Arc::new(ReloadOnce("reload")));
        orchestrator.register("a1", web()).unwrap();

        let unbound = orchestrator.upload("a1", "shot.png", b"png").await;
        assert!(matches!(unbound, Err(Error::AdapterNotBound(_))));

        let id = orchestrator.promote_next().unwrap();
        let path = orchestrator.upload("a1", "../shot.png", b"png").await.unwrap();
        assert_eq!(path, dir.path().join("uploads").join("a1shot.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png");

        let detail = orchestrator.test_case_detail(&id).unwrap();
        assert_eq!(
            detail.files.get("alice_shot.png").map(String::as_str),
            Some(path.to_str().unwrap())
        );
        assert!(orchestrator.registry().get("a1").unwrap().last_responded.is_some());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_running_test_cases() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.add_scenario(Arc::new(ReloadOnce("reload")));
        orchestrator.register("a1", web()).unwrap();
        orchestrator.register("idle", web()).unwrap();
        let id = orchestrator.promote_next().unwrap();

        orchestrator.shutdown().await;

        let case = orchestrator.test_case(&id).unwrap();
        assert_eq!(case.status(), TestStatus::Error);
        assert!(orchestrator.all_finished());
        assert!(!orchestrator.totals().all_passed());
        for adapter in orchestrator.registry().list() {
            assert!(adapter.completed);
        }
        assert!(orchestrator.poll("idle").is_exit());
    }
}
