//! Single-test execution with result logging.

use super::TestResult;
use crate::{klog_debug, klog_info};

/// Run one test function, logging its name and outcome.
///
/// Panics inside a test are not caught here; the platform's test runner
/// wraps suite execution with its own exception fence.
pub fn run_single_test(name: &str, test: impl FnOnce() -> TestResult) -> TestResult {
    klog_debug!("TEST {} ...", name);
    let result = test();
    match result {
        TestResult::Pass => klog_debug!("TEST {} ok", name),
        TestResult::Skipped => klog_info!("TEST {} skipped", name),
        TestResult::Fail | TestResult::Panic => klog_info!("TEST {} FAILED", name),
    }
    result
}
