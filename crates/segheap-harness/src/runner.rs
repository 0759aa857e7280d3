//! Replays operation lists against a heap and reports utilization.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::ptr::NonNull;
use std::time::Instant;

use segheap_core::{
    CoalescePolicy, Heap, HeapConfig, HeapError, HeapLogLevel, HeapStats, HeapWalk,
    IntegrityError, PageSource,
};
use serde::Serialize;
use thiserror::Error;

use crate::payload;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::workload::Op;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("op {index}: allocating {size} bytes failed: {source}")]
    Alloc {
        index: usize,
        size: usize,
        #[source]
        source: HeapError,
    },

    #[error("op {index}: object {id} allocated while still live")]
    DuplicateId { index: usize, id: u64 },

    #[error("op {index}: free of unknown object {id}")]
    UnknownId { index: usize, id: u64 },

    #[error("object {id} corrupted at byte {offset}")]
    Corrupted { id: u64, offset: usize },

    #[error("op {index}: integrity check failed: {source}")]
    Integrity {
        index: usize,
        #[source]
        source: IntegrityError,
    },

    #[error("writing log: {0}")]
    Log(#[from] std::io::Error),
}

/// Knobs for a replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run the integrity walker after every `n` operations (and at the end).
    pub verify_every: Option<usize>,
}

/// Outcome of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub policy: CoalescePolicy,
    pub ops: usize,
    pub allocations: u64,
    pub frees: u64,
    /// Most payload bytes requested and live at once.
    pub peak_live_bytes: usize,
    pub bytes_mapped: usize,
    pub pages: usize,
    /// `peak_live_bytes / bytes_mapped * 100`.
    pub utilization_pct: f64,
    pub wall_time_ns: u64,
    pub stats: HeapStats,
    /// Final integrity walk, when walking was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walk: Option<HeapWalk>,
}

impl RunReport {
    /// Request histogram keyed by size-class label, empty classes omitted.
    #[must_use]
    pub fn histogram(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .stats
            .histogram()
            .into_iter()
            .map(|(label, count)| (label.to_string(), serde_json::Value::from(count)))
            .collect();
        serde_json::Value::Object(map)
    }
}

fn utilization(peak: usize, mapped: usize) -> f64 {
    if mapped == 0 {
        return 0.0;
    }
    peak as f64 / mapped as f64 * 100.0
}

fn check_integrity<P: PageSource>(heap: &Heap<P>, index: usize) -> Result<HeapWalk, RunError> {
    heap.verify()
        .map_err(|source| RunError::Integrity { index, source })
}

/// Executes `ops` against `heap`.
///
/// Every payload is filled with a pattern derived from its object id and
/// checked again right before it is freed and once more at the end.
pub fn replay<P: PageSource>(
    heap: &mut Heap<P>,
    name: &str,
    ops: &[Op],
    options: RunOptions,
) -> Result<RunReport, RunError> {
    let mut live: HashMap<u64, (NonNull<u8>, usize)> = HashMap::new();
    let mut live_bytes = 0usize;
    let mut peak_live_bytes = 0usize;
    let mut allocations = 0u64;
    let mut frees = 0u64;
    let mut walk = None;

    let started = Instant::now();
    for (index, op) in ops.iter().enumerate() {
        match *op {
            Op::Alloc { id, size } => {
                if live.contains_key(&id) {
                    return Err(RunError::DuplicateId { index, id });
                }
                let ptr = heap
                    .allocate(size)
                    .map_err(|source| RunError::Alloc { index, size, source })?;
                // SAFETY: the heap handed out at least `size` writable bytes.
                unsafe { payload::fill(ptr, size, id) };
                live.insert(id, (ptr, size));
                allocations += 1;
                live_bytes += size;
                peak_live_bytes = peak_live_bytes.max(live_bytes);
            }
            Op::Free { id } => {
                let (ptr, size) = live
                    .remove(&id)
                    .ok_or(RunError::UnknownId { index, id })?;
                // SAFETY: `ptr` holds `size` bytes filled at allocation.
                if let Some(offset) = unsafe { payload::first_mismatch(ptr, size, id) } {
                    return Err(RunError::Corrupted { id, offset });
                }
                // SAFETY: `ptr` came from `heap.allocate` and leaves `live` here, so
                // it is freed exactly once.
                unsafe { heap.deallocate(ptr) };
                frees += 1;
                live_bytes -= size;
            }
        }
        if let Some(every) = options.verify_every
            && every > 0
            && (index + 1) % every == 0
        {
            walk = Some(check_integrity(heap, index)?);
        }
    }
    let wall_time_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

    for (&id, &(ptr, size)) in &live {
        // SAFETY: every live entry still holds its filled payload.
        if let Some(offset) = unsafe { payload::first_mismatch(ptr, size, id) } {
            return Err(RunError::Corrupted { id, offset });
        }
    }
    if options.verify_every.is_some() {
        walk = Some(check_integrity(heap, ops.len())?);
    }

    let bytes_mapped = heap.bytes_mapped();
    Ok(RunReport {
        name: name.to_string(),
        policy: heap.config().coalesce,
        ops: ops.len(),
        allocations,
        frees,
        peak_live_bytes,
        bytes_mapped,
        pages: heap.pages_mapped(),
        utilization_pct: utilization(peak_live_bytes, bytes_mapped),
        wall_time_ns,
        stats: heap.stats(),
        walk,
    })
}

/// Replays `ops` on a fresh kernel-backed heap, mirroring heap warnings and
/// errors plus a run summary into `emitter`.
pub fn run_with_config(
    name: &str,
    ops: &[Op],
    config: HeapConfig,
    options: RunOptions,
    emitter: Option<&mut LogEmitter>,
) -> Result<RunReport, RunError> {
    let mut heap: Heap = Heap::new(config);
    let result = replay(&mut heap, name, ops, options);

    if let Some(emitter) = emitter {
        for record in heap
            .drain_lifecycle_logs()
            .iter()
            .filter(|r| r.level >= HeapLogLevel::Warn)
        {
            emitter.emit_entry(
                LogEntry::from(record)
                    .with_challenge(name)
                    .with_policy(config.coalesce.as_str()),
            )?;
        }
        let entry = LogEntry::new("", LogLevel::Info, "run_complete")
            .with_challenge(name)
            .with_policy(config.coalesce.as_str());
        let entry = match &result {
            Ok(report) => entry
                .with_outcome(Outcome::Pass)
                .with_latency_ns(report.wall_time_ns)
                .with_details(serde_json::json!({
                    "ops": report.ops,
                    "peak_live_bytes": report.peak_live_bytes,
                    "bytes_mapped": report.bytes_mapped,
                    "pages": report.pages,
                    "utilization_pct": report.utilization_pct,
                    "histogram": report.histogram(),
                })),
            Err(err) => LogEntry {
                level: LogLevel::Error,
                ..entry
            }
            .with_outcome(Outcome::Fail)
            .with_details(serde_json::json!({ "error": err.to_string() })),
        };
        emitter.emit_entry(entry)?;
    }
    result
}

/// Runs the same operations once per coalescing policy.
pub fn compare_policies(
    name: &str,
    ops: &[Op],
    base: HeapConfig,
    options: RunOptions,
    mut emitter: Option<&mut LogEmitter>,
) -> Result<Vec<RunReport>, RunError> {
    [CoalescePolicy::Immediate, CoalescePolicy::Never]
        .into_iter()
        .map(|policy| {
            run_with_config(
                name,
                ops,
                base.with_coalesce(policy),
                options,
                emitter.as_deref_mut(),
            )
        })
        .collect()
}

/// Fixed-width table of reports for terminal output.
#[must_use]
pub fn render_table(reports: &[RunReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<14} {:<9} {:>10} {:>12} {:>10} {:>6} {:>7}",
        "challenge", "policy", "time_ms", "peak_live", "mapped", "pages", "util%"
    );
    for r in reports {
        let _ = writeln!(
            out,
            "{:<14} {:<9} {:>10.3} {:>12} {:>10} {:>6} {:>7.1}",
            r.name,
            r.policy.as_str(),
            r.wall_time_ns as f64 / 1e6,
            r.peak_live_bytes,
            r.bytes_mapped,
            r.pages,
            r.utilization_pct,
        );
    }
    out
}
