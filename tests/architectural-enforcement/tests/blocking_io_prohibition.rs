//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async router code uses `tokio::fs` and `reqwest`, never
//! `std::fs`, `std::net` or `reqwest::blocking`.
//! **Acceptable**: Blocking reads in sync functions that run before the
//! runtime does real work, such as configuration loading.

use architectural_enforcement::{is_blocking_io, production_lines, router_root};

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<String> = production_lines(&router_root())
        .iter()
        .filter(|line| is_blocking_io(line))
        .map(ToString::to_string)
        .collect();

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  blocking: {violation}");
        }
        eprintln!("\nRequired: tokio::fs, tokio::net, async reqwest.");
        panic!("Found {} blocking I/O violation(s) in production code", violations.len());
    }
}
