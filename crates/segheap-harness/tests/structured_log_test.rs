//! Integration test: structured run logs
//!
//! Validates that:
//! 1. Runs logged to a file produce schema-valid JSONL.
//! 2. Heap failures are forwarded ahead of a failing run summary.
//! 3. The validator rejects malformed lines.
//!
//! Run: cargo test -p segheap-harness --test structured_log_test

use std::path::PathBuf;

use segheap_core::HeapConfig;
use segheap_harness::structured_log::{check_line, check_log_file};
use segheap_harness::{
    Challenge, LogEmitter, LogEntry, LogLevel, Outcome, RunOptions, WorkloadSpec, compare_policies,
    run_with_config,
};

fn log_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("segheap_log_test");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn read_entries(path: &PathBuf) -> Vec<LogEntry> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .enumerate()
        .map(|(i, line)| {
            check_line(line, i + 1).unwrap_or_else(|errs| panic!("{errs:?}"))
        })
        .collect()
}

#[test]
fn policy_comparison_log_validates() {
    let path = log_path("compare.jsonl");
    let spec = WorkloadSpec {
        epochs: 3,
        allocs_per_epoch: 50,
        seed: 3,
    };
    {
        let mut emitter = LogEmitter::to_file(&path, "compare").unwrap();
        emitter.emit(LogLevel::Info, "session_start").unwrap();
        for challenge in Challenge::ALL {
            compare_policies(
                challenge.name(),
                &challenge.ops(&spec),
                HeapConfig::default(),
                RunOptions::default(),
                Some(&mut emitter),
            )
            .unwrap();
        }
        emitter.emit(LogLevel::Info, "session_end").unwrap();
        emitter.flush().unwrap();
    }

    let check = check_log_file(&path).unwrap();
    assert!(check.is_clean(), "emitter output should validate: {:?}", check.errors);
    assert_eq!(check.lines, 2 + 2 * Challenge::ALL.len());

    let entries = read_entries(&path);
    let summaries: Vec<&LogEntry> = entries
        .iter()
        .filter(|e| e.event == "run_complete")
        .collect();
    assert_eq!(summaries.len(), 2 * Challenge::ALL.len());
    for entry in summaries {
        assert_eq!(entry.outcome, Some(Outcome::Pass));
        assert!(entry.latency_ns.is_some());
        assert!(entry.trace_id.starts_with("segheap-harness::compare::"));
    }
}

#[test]
fn heap_failure_precedes_failing_summary() {
    let path = log_path("exhausted.jsonl");
    let ops = Challenge::RandomLarge.ops(&WorkloadSpec {
        epochs: 2,
        allocs_per_epoch: 30,
        seed: 4,
    });
    {
        let mut emitter = LogEmitter::to_file(&path, "exhausted").unwrap();
        let result = run_with_config(
            "random-large",
            &ops,
            HeapConfig::default().with_max_pages(1),
            RunOptions::default(),
            Some(&mut emitter),
        );
        assert!(result.is_err());
        emitter.flush().unwrap();
    }

    let entries = read_entries(&path);
    let (last, forwarded) = entries.split_last().expect("log is not empty");
    assert_eq!(last.event, "run_complete");
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.outcome, Some(Outcome::Fail));
    assert_eq!(last.policy.as_deref(), Some("immediate"));

    assert!(
        forwarded
            .iter()
            .any(|e| e.level == LogLevel::Error && e.trace_id.starts_with("segheap::")),
        "heap error record should be forwarded: {forwarded:?}"
    );
}

#[test]
fn validator_rejects_malformed_lines() {
    let missing = r#"{"timestamp":"t","trace_id":"a::b","level":"info"}"#;
    let errs = check_line(missing, 1).unwrap_err();
    assert!(errs.iter().any(|e| e.field() == Some("event")));

    let bad_policy =
        r#"{"timestamp":"t","trace_id":"a::b","level":"info","event":"x","policy":"sometimes"}"#;
    let errs = check_line(bad_policy, 2).unwrap_err();
    assert!(errs.iter().any(|e| e.field() == Some("policy")));

    let bad_trace = r#"{"timestamp":"t","trace_id":"flat","level":"info","event":"x"}"#;
    let errs = check_line(bad_trace, 3).unwrap_err();
    assert!(errs.iter().any(|e| e.field() == Some("trace_id")));

    let errs = check_line("not json", 4).unwrap_err();
    assert_eq!(errs[0].line(), 4);
    assert_eq!(errs[0].field(), None);
}
