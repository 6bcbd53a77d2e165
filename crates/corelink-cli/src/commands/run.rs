//! Script replay command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use corelink_config::Script;
use corelink_core::{CacheJournal, CacheOp, CacheOps, MemZone, Snapshot, Status};
use serde_json::json;

use super::common::{execute, load_platform, start};

#[derive(Args)]
pub struct RunArgs {
    /// Command script (TOML)
    #[arg(value_name = "SCRIPT")]
    script: PathBuf,

    /// Platform description (TOML); defaults to two cores with the built-in drivers
    #[arg(short, long, value_name = "FILE")]
    platform: Option<PathBuf>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Record cache maintenance and report it
    #[arg(long)]
    trace_cache: bool,

    /// Continue after a failed command
    #[arg(short, long)]
    keep_going: bool,
}

/// Outcome of one script command.
struct Outcome {
    index: usize,
    op: &'static str,
    status: Status,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let platform = load_platform(args.platform.as_deref())?;
    let script = Script::load(&args.script)?;

    let journal = args.trace_cache.then(|| Arc::new(CacheJournal::with_capacity(0)));
    let cache = journal.clone().map(|j| j as Arc<dyn CacheOps>);
    let session = start(&platform, cache)?;

    tracing::info!(
        platform = %platform.name,
        cores = platform.cores,
        commands = script.commands.len(),
        "replaying script"
    );

    let mut outcomes = Vec::with_capacity(script.commands.len());
    for (index, command) in script.commands.iter().enumerate() {
        let result = execute(&session.plane, command.step());
        let status = Status::from_result(result);
        outcomes.push(Outcome {
            index,
            op: command.op(),
            status,
        });

        if let Err(e) = result {
            tracing::warn!(index, op = command.op(), error = %e, "command failed");
            if e.is_fatal() || !args.keep_going {
                break;
            }
        }
    }

    let snapshot = session.plane.snapshot();
    let failed = outcomes
        .iter()
        .filter(|o| o.status != Status::Success)
        .count();

    if args.json {
        print_json(&outcomes, &snapshot, &session.heap, journal.as_deref())?;
    } else {
        print_text(&outcomes, &snapshot, &session.heap, journal.as_deref());
    }

    if failed > 0 {
        anyhow::bail!(
            "{failed} of {} commands failed ({} executed)",
            script.commands.len(),
            outcomes.len()
        );
    }
    Ok(())
}

fn print_text(
    outcomes: &[Outcome],
    snapshot: &Snapshot,
    heap: &corelink_core::HeapAllocator,
    journal: Option<&CacheJournal>,
) {
    for outcome in outcomes {
        println!("[{:>3}] {:18} {}", outcome.index, outcome.op, outcome.status);
    }
    println!();

    println!("Pipelines:");
    for p in &snapshot.pipelines {
        println!(
            "  {:>4}  core {}  {:?}  source {}  sink {}",
            p.id,
            p.core,
            p.state,
            fmt_comp(p.source),
            fmt_comp(p.sink)
        );
    }
    println!("Components:");
    for c in &snapshot.components {
        println!(
            "  {}  core {}  {:?}{}  in {:?}  out {:?}",
            fmt_comp(Some(c.id)),
            c.core,
            c.state,
            if c.shared { "  shared" } else { "" },
            c.sources,
            c.sinks
        );
    }
    println!("Buffers:");
    for b in &snapshot.buffers {
        println!(
            "  {:#010x}  {} -> {}  {} bytes{}",
            b.id,
            fmt_comp(b.producer),
            fmt_comp(b.consumer),
            b.size,
            if b.inter_core { "  inter-core" } else { "" }
        );
    }

    println!();
    println!(
        "Heap: runtime {} B, runtime_shared {} B, {} allocations",
        heap.in_use(MemZone::Runtime),
        heap.in_use(MemZone::RuntimeShared),
        heap.outstanding()
    );
    if let Some(journal) = journal {
        println!(
            "Cache: {} writeback, {} invalidate, {} writeback+invalidate",
            journal.count(CacheOp::Writeback),
            journal.count(CacheOp::Invalidate),
            journal.count(CacheOp::WritebackInvalidate)
        );
    }
}

fn print_json(
    outcomes: &[Outcome],
    snapshot: &Snapshot,
    heap: &corelink_core::HeapAllocator,
    journal: Option<&CacheJournal>,
) -> anyhow::Result<()> {
    let results: Vec<_> = outcomes
        .iter()
        .map(|o| {
            json!({
                "index": o.index,
                "op": o.op,
                "status": o.status.code(),
            })
        })
        .collect();
    let cache = journal.map(|j| {
        json!({
            "writeback": j.count(CacheOp::Writeback),
            "invalidate": j.count(CacheOp::Invalidate),
            "writeback_invalidate": j.count(CacheOp::WritebackInvalidate),
        })
    });
    let report = json!({
        "results": results,
        "snapshot": snapshot,
        "heap": {
            "runtime": heap.in_use(MemZone::Runtime),
            "runtime_shared": heap.in_use(MemZone::RuntimeShared),
            "outstanding": heap.outstanding(),
        },
        "cache": cache,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn fmt_comp(raw: Option<u32>) -> String {
    match raw {
        Some(raw) => format!("{}.{}", raw >> 16, raw & 0xffff),
        None => "-".to_string(),
    }
}
