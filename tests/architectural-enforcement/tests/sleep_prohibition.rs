//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Router code waits on I/O, never on the clock.
//! **Exception**: Retry backoff in the resilience executor.

use architectural_enforcement::{is_backoff_sleep, is_sleep, production_lines, router_root};

#[test]
fn test_no_sleep_in_production_code() {
    let root = router_root();
    assert!(root.exists(), "router sources not found at {}", root.display());

    let violations: Vec<String> = production_lines(&root)
        .iter()
        .filter(|line| is_sleep(line) && !is_backoff_sleep(line))
        .map(ToString::to_string)
        .collect();

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  sleep: {violation}");
        }
        eprintln!("\nAcceptable: tokio::time::sleep between retry attempts.");
        eprintln!("Use channels, Notify or timeouts to wait for events.");
        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}
