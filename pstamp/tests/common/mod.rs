/// Returns true when running in CI (GitHub Actions sets CI=true).
#[allow(dead_code)]
pub fn is_ci() -> bool {
    std::env::var("CI").is_ok()
}

/// Unwraps a `Result` from an affinity or perf operation, returning early
/// if the operation is unavailable in CI (restricted containers reject
/// `sched_setaffinity` and `perf_event_open`). Panics with a useful message
/// in non-CI environments.
///
/// Usage:
///   require_os_ok!(pin_current_thread(&[0]));
#[macro_export]
macro_rules! require_os_ok {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(_) if std::env::var("CI").is_ok() => {
                eprintln!("Skipping test: OS facility unavailable in CI");
                return;
            }
            Err(e) => panic!("OS facility failed: {}", e),
        }
    };
}
