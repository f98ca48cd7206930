//! `cadence simulate`: replay a repeating schedule on a virtual clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use cadence_core::scheduler::offset;
use cadence_core::{DateSchedulerExt, Disposable, VirtualTimeConfig};
use cadence_scheduler::{SchedulerMetrics, VirtualTimeScheduler};

use crate::cli::SimulateArgs;

#[derive(Debug, Clone, Serialize)]
pub struct Firing {
    pub index: usize,
    pub at: DateTime<Utc>,
    pub offset_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub firings: Vec<Firing>,
    pub metrics: SchedulerMetrics,
}

pub fn run(args: &SimulateArgs, config: &VirtualTimeConfig) -> Result<SimulationReport> {
    ensure!(args.every_ms > 0, "--every-ms must be greater than zero");

    let scheduler = Arc::new(VirtualTimeScheduler::with_config(config));
    let start = scheduler.current_time();
    let firings = Arc::new(Mutex::new(Vec::new()));

    let (s, f) = (Arc::clone(&scheduler), Arc::clone(&firings));
    let handle = scheduler.schedule_repeating_fn(
        offset(start, Duration::from_millis(args.delay_ms)),
        Duration::from_millis(args.every_ms),
        Duration::ZERO,
        move || {
            let at = s.current_time();
            let mut firings = f.lock().unwrap_or_else(|p| p.into_inner());
            let index = firings.len();
            firings.push(Firing {
                index,
                at,
                offset_ms: (at - start).num_milliseconds(),
            });
        },
    );

    scheduler.advance_to(offset(start, Duration::from_millis(args.until_ms)));
    handle.dispose();

    let end = scheduler.current_time();
    let firings = std::mem::take(&mut *firings.lock().unwrap_or_else(|p| p.into_inner()));
    info!(firings = firings.len(), end = %end, "simulation finished");

    Ok(SimulationReport {
        start,
        end,
        firings,
        metrics: scheduler.metrics(),
    })
}

pub fn print(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("virtual clock: {} -> {}", report.start, report.end);
    for firing in &report.firings {
        println!("  #{:<4} +{:>8} ms  {}", firing.index, firing.offset_ms, firing.at);
    }
    let m = &report.metrics;
    println!(
        "scheduled={} executed={} skipped={} rejected={}",
        m.scheduled, m.executed, m.skipped, m.rejected
    );
    Ok(())
}
