//! Text allocation traces.
//!
//! One operation per line:
//!
//! ```text
//! # comment
//! a <id> <size>    allocate <size> bytes as object <id>
//! f <id>           free object <id>
//! ```
//!
//! Blank lines and `#` comments are ignored. Parsing checks syntax only;
//! whether ids pair up is checked when the trace is replayed.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

use crate::workload::Op;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("reading trace: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&str>,
    what: &str,
    line: usize,
) -> Result<T, TraceError> {
    let raw = field.ok_or_else(|| TraceError::Parse {
        line,
        message: format!("missing {what}"),
    })?;
    raw.parse().map_err(|_| TraceError::Parse {
        line,
        message: format!("invalid {what} '{raw}'"),
    })
}

/// Parses trace text into operations.
pub fn parse_trace(text: &str) -> Result<Vec<Op>, TraceError> {
    let mut ops = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let mut fields = content.split_whitespace();
        let op = match fields.next() {
            Some("a") => Op::Alloc {
                id: parse_field(fields.next(), "id", line)?,
                size: parse_field(fields.next(), "size", line)?,
            },
            Some("f") => Op::Free {
                id: parse_field(fields.next(), "id", line)?,
            },
            Some(other) => {
                return Err(TraceError::Parse {
                    line,
                    message: format!("unknown operation '{other}'"),
                });
            }
            None => continue,
        };
        if let Some(extra) = fields.next() {
            return Err(TraceError::Parse {
                line,
                message: format!("unexpected trailing field '{extra}'"),
            });
        }
        ops.push(op);
    }
    Ok(ops)
}

/// Reads and parses a trace file.
pub fn load_trace(path: &Path) -> Result<Vec<Op>, TraceError> {
    let text = std::fs::read_to_string(path)?;
    parse_trace(&text)
}

/// Renders operations in trace syntax, preceded by a `#` header line.
#[must_use]
pub fn format_trace(header: &str, ops: &[Op]) -> String {
    let mut out = String::with_capacity(ops.len() * 12 + header.len() + 3);
    let _ = writeln!(out, "# {header}");
    for op in ops {
        let _ = match op {
            Op::Alloc { id, size } => writeln!(out, "a {id} {size}"),
            Op::Free { id } => writeln!(out, "f {id}"),
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{Challenge, WorkloadSpec};

    #[test]
    fn parses_ops_comments_and_blanks() {
        let text = "# warmup\n\na 1 64\na 2 128   # trailing comment\nf 1\n";
        let ops = parse_trace(text).expect("valid trace");
        assert_eq!(
            ops,
            vec![
                Op::Alloc { id: 1, size: 64 },
                Op::Alloc { id: 2, size: 128 },
                Op::Free { id: 1 },
            ]
        );
    }

    #[test]
    fn reports_line_of_bad_input() {
        let err = parse_trace("a 1 64\nx 2\n").unwrap_err();
        assert!(matches!(err, TraceError::Parse { line: 2, .. }), "{err}");

        let err = parse_trace("a 1\n").unwrap_err();
        assert!(err.to_string().contains("missing size"), "{err}");

        let err = parse_trace("a 1 lots\n").unwrap_err();
        assert!(err.to_string().contains("invalid size 'lots'"), "{err}");

        let err = parse_trace("f 1 2\n").unwrap_err();
        assert!(err.to_string().contains("trailing"), "{err}");
    }

    #[test]
    fn generated_workloads_survive_formatting() {
        let spec = WorkloadSpec {
            epochs: 3,
            allocs_per_epoch: 20,
            seed: 99,
        };
        let ops = Challenge::RandomMixed.ops(&spec);
        let text = format_trace("random-mixed seed=99", &ops);
        assert!(text.starts_with("# random-mixed seed=99\n"));
        assert_eq!(parse_trace(&text).expect("reparse"), ops);
    }
}
