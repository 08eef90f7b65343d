//! Tests for logging setup.

use comanda::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_analysis_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process; this
    // is the only test in the binary that installs it.
    let guard = comanda::logging::init_analysis(&logs_dir, "info").expect("init");
    assert!(logs_dir.exists(), "logs directory should be created");
    drop(guard);
}
