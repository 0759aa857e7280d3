//! Workload harness for segheap.
//!
//! This crate provides:
//! - Synthetic challenges: seeded allocate/free workloads over fixed size ranges
//! - Trace files: a line-oriented text format for recorded workloads
//! - Replay: run operations against a heap with payload pattern checks
//! - Structured logging: JSONL run records and their validator

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod payload;
#[allow(unsafe_code)]
pub mod runner;
pub mod structured_log;
pub mod trace;
pub mod workload;

pub use runner::{
    RunError, RunOptions, RunReport, compare_policies, render_table, replay, run_with_config,
};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use trace::{TraceError, format_trace, load_trace, parse_trace};
pub use workload::{Challenge, Op, WorkloadSpec, XorShift64};
