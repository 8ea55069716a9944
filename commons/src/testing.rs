//! Test helpers.
//!
//! The test suites run under `#[tokio::test]`, so there is no runtime
//! bootstrap here; logging is the only process-wide concern.

/// Initialize logging for a test process.
///
/// Safe to call from every test: only the first call takes effect, and
/// output is captured per test.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
