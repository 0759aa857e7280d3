//! CLI entrypoint for the segheap workload harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use segheap_core::{CoalescePolicy, HeapConfig};
use segheap_harness::structured_log::check_log_file;
use segheap_harness::{
    Challenge, LogEmitter, RunOptions, RunReport, WorkloadSpec, format_trace, load_trace,
    render_table, run_with_config,
};

/// Workload tooling for segheap.
#[derive(Debug, Parser)]
#[command(name = "segheap-harness")]
#[command(about = "Drive the segregated free-list heap with synthetic and recorded workloads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run built-in challenges and report utilization.
    Challenge {
        /// Challenge name (`fixed-small`, `random-mixed`, ...) or `all`.
        #[arg(long, default_value = "all")]
        name: String,
        /// Coalescing policy: `immediate`, `never`, or `both`.
        #[arg(long, default_value = "both")]
        policy: String,
        /// Allocate/free rounds per run.
        #[arg(long, default_value_t = 10)]
        epochs: usize,
        /// Allocations per round.
        #[arg(long, default_value_t = 1000)]
        allocs_per_epoch: usize,
        /// Workload seed (decimal or 0x...).
        #[arg(long, default_value = "0x5E6_4EA9")]
        seed: String,
        /// Page budget per heap.
        #[arg(long)]
        max_pages: Option<usize>,
        /// Walk the heap every N operations.
        #[arg(long)]
        verify_every: Option<usize>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Print reports as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Replay a recorded trace file.
    Replay {
        /// Trace file (`a <id> <size>` / `f <id>` lines).
        #[arg(long)]
        trace: PathBuf,
        /// Coalescing policy: `immediate`, `never`, or `both`.
        #[arg(long, default_value = "both")]
        policy: String,
        /// Page budget per heap.
        #[arg(long)]
        max_pages: Option<usize>,
        /// Walk the heap every N operations.
        #[arg(long)]
        verify_every: Option<usize>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Print reports as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Write a challenge's operations as a trace file.
    DumpTrace {
        /// Challenge name.
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 10)]
        epochs: usize,
        #[arg(long, default_value_t = 1000)]
        allocs_per_epoch: usize,
        /// Workload seed (decimal or 0x...).
        #[arg(long, default_value = "0x5E6_4EA9")]
        seed: String,
        /// Output path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Challenge {
            name,
            policy,
            epochs,
            allocs_per_epoch,
            seed,
            max_pages,
            verify_every,
            log,
            json,
        } => {
            let challenges = parse_challenges(&name)?;
            let policies = parse_policies(&policy)?;
            let spec = WorkloadSpec {
                epochs,
                allocs_per_epoch,
                seed: parse_seed(&seed)?,
            };
            let mut emitter = open_log(log.as_ref(), "challenge")?;
            let options = RunOptions { verify_every };

            let mut reports = Vec::new();
            for challenge in challenges {
                eprintln!("Running {challenge} ({epochs} x {allocs_per_epoch})");
                let ops = challenge.ops(&spec);
                for &policy in &policies {
                    let config = base_config(max_pages).with_coalesce(policy);
                    reports.push(run_with_config(
                        challenge.name(),
                        &ops,
                        config,
                        options,
                        emitter.as_mut(),
                    )?);
                }
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.flush()?;
            }
            print_reports(&reports, json)?;
        }
        Command::Replay {
            trace,
            policy,
            max_pages,
            verify_every,
            log,
            json,
        } => {
            let ops = load_trace(&trace)?;
            let policies = parse_policies(&policy)?;
            let name = trace
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("trace")
                .to_string();
            eprintln!("Replaying {} ops from {}", ops.len(), trace.display());
            let mut emitter = open_log(log.as_ref(), "replay")?;
            let options = RunOptions { verify_every };

            let mut reports = Vec::new();
            for policy in policies {
                let config = base_config(max_pages).with_coalesce(policy);
                reports.push(run_with_config(&name, &ops, config, options, emitter.as_mut())?);
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.flush()?;
            }
            print_reports(&reports, json)?;
        }
        Command::DumpTrace {
            name,
            epochs,
            allocs_per_epoch,
            seed,
            output,
        } => {
            let challenge: Challenge = name.parse()?;
            let seed = parse_seed(&seed)?;
            let spec = WorkloadSpec {
                epochs,
                allocs_per_epoch,
                seed,
            };
            let header = format!(
                "{challenge} epochs={epochs} allocs_per_epoch={allocs_per_epoch} seed={seed:#x}"
            );
            let text = format_trace(&header, &challenge.ops(&spec));
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{text}"),
            }
        }
        Command::ValidateLog { log } => {
            let check = check_log_file(&log)?;
            for err in &check.errors {
                eprintln!("{err}");
            }
            if !check.is_clean() {
                return Err(format!(
                    "{} problems in {} lines of {}",
                    check.errors.len(),
                    check.lines,
                    log.display()
                )
                .into());
            }
            eprintln!("{} lines OK", check.lines);
        }
    }

    Ok(())
}

fn base_config(max_pages: Option<usize>) -> HeapConfig {
    let config = HeapConfig::from_env();
    match max_pages {
        Some(pages) => config.with_max_pages(pages),
        None => config,
    }
}

fn open_log(
    path: Option<&PathBuf>,
    run_id: &str,
) -> Result<Option<LogEmitter>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Some(LogEmitter::to_file(path, run_id)?)),
        None => Ok(None),
    }
}

fn print_reports(reports: &[RunReport], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else {
        print!("{}", render_table(reports));
    }
    Ok(())
}

fn parse_challenges(raw: &str) -> Result<Vec<Challenge>, Box<dyn std::error::Error>> {
    if raw.trim().eq_ignore_ascii_case("all") {
        return Ok(Challenge::ALL.to_vec());
    }
    Ok(vec![raw.parse()?])
}

fn parse_policies(raw: &str) -> Result<Vec<CoalescePolicy>, Box<dyn std::error::Error>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "both" => Ok(vec![CoalescePolicy::Immediate, CoalescePolicy::Never]),
        "immediate" => Ok(vec![CoalescePolicy::Immediate]),
        "never" => Ok(vec![CoalescePolicy::Never]),
        other => Err(format!("Unsupported policy '{other}', expected immediate|never|both").into()),
    }
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = raw.trim();
    let seed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('_', ""), 16)?
    } else {
        s.replace('_', "").parse::<u64>()?
    };
    Ok(seed)
}
