//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the data layer crates MUST NOT block the
//! runtime. Network access goes through `reqwest` and `sqlx` futures.
//!
//! Blocking calls in plain `fn` bodies are fine: configuration is read once
//! before any query runs.

use architectural_enforcement::{scan_production, SourceLine};

fn blocking_reason(line: &SourceLine<'_>) -> Option<&'static str> {
    let code = line.code;

    // Blocking clients are never acceptable, sync context or not
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("postgres::Client") {
        return Some("Blocking Postgres client");
    }

    if !line.in_async {
        return None;
    }

    if code.contains("std::fs::") {
        Some("Blocking file I/O in async context")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O in async context")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O in async context")
    } else if code.contains("std::io::stdin()") || code.contains(".read_line(") {
        Some("Blocking stdin in async context")
    } else if code.contains("block_on(") {
        Some("Nested block_on in async context")
    } else {
        None
    }
}

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan_production(blocking_reason);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nUse instead:");
        eprintln!("  - tokio::fs / tokio::net");
        eprintln!("  - reqwest async client, sqlx async connections");
        eprintln!("  - move the work into a sync fn that runs before the runtime needs it");

        panic!(
            "\nFound {} blocking I/O violation(s) in async production code.",
            violations.len()
        );
    }
}

#[test]
fn test_blocking_io_detection() {
    let line = |code, in_async| SourceLine {
        number: 1,
        code,
        in_async,
    };

    let read = "    let text = std::fs::read_to_string(path)?;";
    assert!(blocking_reason(&line(read, true)).is_some());
    assert!(blocking_reason(&line(read, false)).is_none());
    assert!(blocking_reason(&line("    reqwest::blocking::get(url)", false)).is_some());
}
