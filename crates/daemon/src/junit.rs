//! JUnit XML summary of all suites

use crate::suite::TestSuite;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus};
use trafficlight_common::{Error, Result, TestStatus};

/// Render every suite as one JUnit report.
///
/// Test cases that have not reached a terminal status are reported as skipped.
pub fn render(suites: &[TestSuite]) -> Result<String> {
    let mut report = Report::new("trafficlight");
    for suite in suites {
        let mut junit_suite = quick_junit::TestSuite::new(suite.scenario_name());
        for case in suite.test_cases() {
            let info = case.info();
            let mut status = match info.status {
                TestStatus::Success => TestCaseStatus::success(),
                TestStatus::Failed => TestCaseStatus::non_success(NonSuccessKind::Failure),
                TestStatus::Error => TestCaseStatus::non_success(NonSuccessKind::Error),
                TestStatus::Waiting | TestStatus::Preparing | TestStatus::Running => {
                    TestCaseStatus::skipped()
                }
            };
            if let Some(error) = &info.error {
                status.set_description(error.as_str());
                if let Some(first_line) = error.lines().next() {
                    status.set_message(first_line);
                }
            }

            let mut junit_case = TestCase::new(info.description.as_str(), status);
            junit_case.set_classname(format!("{}.{}", suite.scenario_name(), info.id));
            junit_suite.add_test_case(junit_case);
        }
        report.add_test_suite(junit_suite);
    }

    report
        .to_string()
        .map_err(|e| Error::Internal(format!("rendering junit report: {}", e)))
}
