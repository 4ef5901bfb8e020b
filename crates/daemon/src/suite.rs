//! Test suites: every test case generated from one scenario

use crate::scenario::Scenario;
use crate::testcase::{TestCase, TestCaseInfo};
use serde::Serialize;
use std::sync::Arc;
use trafficlight_common::TestStatus;
use uuid::Uuid;

/// The test cases expanded from one scenario definition
#[derive(Debug, Clone)]
pub struct TestSuite {
    id: String,
    scenario_name: String,
    test_cases: Vec<TestCase>,
}

impl TestSuite {
    /// One test case per combination of candidate client types
    pub fn from_scenario(scenario: Arc<dyn Scenario>) -> Self {
        let test_cases = scenario
            .definition()
            .combinations()
            .into_iter()
            .map(|slots| TestCase::new(scenario.clone(), slots))
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            scenario_name: scenario.name().to_string(),
            test_cases,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn counts(&self) -> SuiteCounts {
        let mut counts = SuiteCounts::default();
        for case in &self.test_cases {
            match case.status() {
                TestStatus::Success => counts.successes += 1,
                TestStatus::Failed => counts.failures += 1,
                TestStatus::Error => counts.errors += 1,
                TestStatus::Waiting | TestStatus::Preparing | TestStatus::Running => {
                    counts.skipped += 1
                }
            }
        }
        counts.total = self.test_cases.len();
        counts
    }

    pub fn is_finished(&self) -> bool {
        self.test_cases.iter().all(|c| c.status().is_terminal())
    }

    pub fn info(&self) -> SuiteInfo {
        SuiteInfo {
            id: self.id.clone(),
            scenario: self.scenario_name.clone(),
            counts: self.counts(),
            test_cases: self.test_cases.iter().map(TestCase::info).collect(),
        }
    }
}

/// Outcome totals; anything not yet terminal counts as skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuiteCounts {
    pub successes: usize,
    pub failures: usize,
    pub errors: usize,
    pub skipped: usize,
    pub total: usize,
}

impl SuiteCounts {
    pub fn add(&mut self, other: SuiteCounts) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.total += other.total;
    }

    pub fn all_passed(&self) -> bool {
        self.successes == self.total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteInfo {
    pub id: String,
    pub scenario: String,
    pub counts: SuiteCounts,
    pub test_cases: Vec<TestCaseInfo>,
}
