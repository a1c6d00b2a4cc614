//! Example: log a short workload from one pinned thread per core, then
//! merge the per-core rings into a single causal trace.
//!
//! Run with:
//!   cargo run --release --example per_core_merge
//!
//! Nanosecond conversion needs perf access; without it the trace is printed
//! in raw cycles.

use pstamp::{Pstamp, PstampRing, TscNsAdjust, merge, online_cpus, pin_current_thread};
use std::thread;

fn main() {
    let cpus = match online_cpus() {
        Ok(cpus) => cpus,
        Err(e) => {
            eprintln!("Failed to read online cpus: {e}");
            std::process::exit(1);
        }
    };
    let cpus: Vec<usize> = cpus.into_iter().take(4).collect();
    eprintln!("Logging on cpus {cpus:?}...");

    let adjust = match TscNsAdjust::detect() {
        Ok(adjust) => Some(adjust),
        Err(e) => {
            eprintln!("Calibration unavailable ({e}); printing raw cycles.");
            eprintln!("Try: echo 1 | sudo tee /proc/sys/kernel/perf_event_paranoid");
            None
        }
    };

    // --- One producer per core ---
    let rings: Vec<PstampRing> = thread::scope(|s| {
        let handles: Vec<_> = cpus
            .iter()
            .map(|&cpu| {
                s.spawn(move || {
                    if let Err(e) = pin_current_thread(&[cpu]) {
                        eprintln!("Could not pin to cpu {cpu} ({e}); logging unpinned.");
                    }
                    let mut ring = PstampRing::new(64);
                    let mut cause = Pstamp::capture(0);
                    for step in 1..=8u32 {
                        let point = cpu as u32 * 100 + step;
                        std::hint::black_box(busy_work(2_000));
                        ring = ring.log(point, &cause);
                        cause = Pstamp::capture(point);
                    }
                    ring
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // --- Merge and print ---
    eprintln!();
    let mut base = None;
    merge(&rings, |entry| {
        let delta = entry.pstamp.cycles - *base.get_or_insert(entry.pstamp.cycles);
        let when = match adjust {
            Some(adjust) => format!("{:>10} ns", adjust.cycles_to_ns(delta)),
            None => format!("{delta:>12} cy"),
        };
        println!(
            "{when}  cpu {:>2}  point {:>4}  cause {:>4}",
            entry.pstamp.logical_processor, entry.pstamp.point, entry.cause.point
        );
    });
}

#[inline(never)]
fn busy_work(n: u64) -> u64 {
    let mut total = 0u64;
    for i in 0..n {
        total = total.wrapping_add(i.wrapping_mul(2_654_435_761));
    }
    total
}
