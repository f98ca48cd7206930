//! `cadence pool`: push work through a suspended worker pool.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use cadence_core::{QueueKind, SchedulerExt, WorkerPoolConfig};
use cadence_scheduler::{SchedulerMetrics, WorkerPoolScheduler};

use crate::cli::PoolArgs;

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub action: usize,
    pub thread: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub kind: QueueKind,
    pub held_while_suspended: usize,
    pub completions: Vec<Completion>,
    pub elapsed_ms: u128,
    pub metrics: SchedulerMetrics,
}

pub fn run(args: &PoolArgs, base: &WorkerPoolConfig) -> Result<PoolReport> {
    let mut config = base.clone();
    if let Some(kind) = args.kind {
        config.kind = kind;
        if kind == QueueKind::Serial {
            config.threads = 1;
        }
    }
    config.start_suspended = true;

    let scheduler = WorkerPoolScheduler::new(&config).context("failed to start worker pool")?;
    let (tx, rx) = mpsc::channel();

    for action in 0..args.actions {
        let tx = tx.clone();
        scheduler.schedule_fn(move || {
            let thread = thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string();
            let _ = tx.send(Completion { action, thread });
        });
    }
    drop(tx);

    thread::sleep(Duration::from_millis(args.suspend_ms));
    let held_while_suspended = scheduler.backlog();
    debug!(held_while_suspended, "resuming worker pool");

    let started = Instant::now();
    scheduler.resume();

    let deadline = started + Duration::from_millis(args.timeout_ms);
    let mut completions = Vec::with_capacity(args.actions);
    while completions.len() < args.actions {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(done) => completions.push(done),
            Err(_) => bail!(
                "only {} of {} actions finished within {} ms",
                completions.len(),
                args.actions,
                args.timeout_ms
            ),
        }
    }
    let elapsed_ms = started.elapsed().as_millis();
    scheduler.shutdown();
    info!(actions = args.actions, elapsed_ms, "worker pool run finished");

    Ok(PoolReport {
        kind: config.kind,
        held_while_suspended,
        completions,
        elapsed_ms,
        metrics: scheduler.metrics(),
    })
}

pub fn print(report: &PoolReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{:?} pool: {} actions held while suspended, finished in {} ms",
        report.kind,
        report.held_while_suspended,
        report.elapsed_ms
    );
    for (position, c) in report.completions.iter().enumerate() {
        println!("  {position:>4}: action {:<4} on {}", c.action, c.thread);
    }
    let m = &report.metrics;
    println!(
        "scheduled={} executed={} skipped={} rejected={}",
        m.scheduled, m.executed, m.skipped, m.rejected
    );
    Ok(())
}
