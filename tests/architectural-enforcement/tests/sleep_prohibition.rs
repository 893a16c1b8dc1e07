//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the data layer crates MUST NOT sleep.
//! Polling a statement waits on `tokio::time::interval`, deadlines use
//! `tokio::time::timeout`, and tests drive time with `tokio::time::advance`.

use architectural_enforcement::{scan_production, SourceLine};

fn sleep_reason(line: &SourceLine<'_>) -> Option<&'static str> {
    let code = line.code;
    if code.contains("thread::sleep") {
        Some("Thread sleep")
    } else if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
    {
        Some("Sleep call")
    } else {
        None
    }
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(sleep_reason);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nUse instead:");
        eprintln!("  - tokio::time::interval() for polling loops");
        eprintln!("  - tokio::time::timeout() for deadlines");
        eprintln!("  - awaiting the I/O or channel you are actually waiting for");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_sleep_detection() {
    let line = |code| SourceLine {
        number: 1,
        code,
        in_async: true,
    };

    assert!(sleep_reason(&line("    tokio::time::sleep(d).await;")).is_some());
    assert!(sleep_reason(&line("    std::thread::sleep(d);")).is_some());
    assert!(sleep_reason(&line("    ticker.tick().await;")).is_none());
}
