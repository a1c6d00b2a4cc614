//! Benchmark driver: times interval timers, short operations, syscalls,
//! affinity switches, and the pstamp hot path on one pinned thread, then
//! measures cross-thread costs (barrier arrival skew, shared-memory poll
//! latency, contended-mutex handoff) against a second pinned thread.

use clap::Parser;
use pstamp::{
    Pstamp, PstampRing, RunningStats, SpinBarrier, TscNsAdjust, current_cpu, parse_cpu_list,
    pin_current_thread, tsc_cycles,
};
use serde::Serialize;
use std::hint::black_box;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;
use std::time::Instant;

#[derive(Parser)]
#[command(about = "Times short operations and cross-core handoffs with TSC timestamps")]
struct Args {
    #[arg(short = 'c', long, help = "Cpu for the main thread (default: current)")]
    cpu: Option<usize>,

    #[arg(
        short = 'a',
        long,
        help = "Cpu for the alternate thread (default: same as --cpu)"
    )]
    alt_cpu: Option<usize>,

    #[arg(short = 's', long, help = "Cpu list the process may use, e.g. 0-3,8")]
    cpu_list: Option<String>,

    #[arg(long, help = "Print the report as JSON instead of text")]
    json: bool,
}

#[derive(Serialize)]
struct Measurement {
    name: String,
    cycles: f64,
    nanos: Option<f64>,
}

#[derive(Serialize)]
struct Report {
    cpu: usize,
    alt_cpu: usize,
    same_core: bool,
    operations: Vec<Measurement>,
    cross_thread: Vec<Measurement>,
}

struct Reporter {
    json: bool,
    ns_per_cycle: Option<f64>,
}

impl Reporter {
    fn section(&self, title: &str) {
        if !self.json {
            println!("\n{title}");
        }
    }

    fn measurement(&self, name: &str, cycles: f64) -> Measurement {
        let nanos = self.ns_per_cycle.map(|ns| cycles * ns);
        if !self.json {
            match nanos {
                Some(ns) => println!("  {name}: {cycles:.1} cycles, {ns:.1} ns"),
                None => println!("  {name}: {cycles:.1} cycles"),
            }
        }
        Measurement {
            name: name.to_string(),
            cycles,
            nanos,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Role {
    Main,
    Alt,
}

struct HandoffCell {
    last_unlock: u64,
    turn: u32,
    remaining: u32,
}

struct Shared {
    same_core: bool,
    sync_std: Barrier,
    skew_std: Barrier,
    spin: SpinBarrier,
    arrival_main: AtomicU64,
    arrival_alt: AtomicU64,
    ping: AtomicU64,
    pong: AtomicU64,
    mtx: Mutex<HandoffCell>,
}

impl Shared {
    /// Rendezvous between the measurement steps. Spinning is more precise,
    /// but two spinners on one core only preempt each other.
    fn sync(&self) {
        if self.same_core {
            self.sync_std.wait();
        } else {
            self.spin.wait();
        }
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let cpu = args.cpu.unwrap_or_else(current_cpu);
    let alt_cpu = args.alt_cpu.unwrap_or(cpu);
    let mut cpus = match &args.cpu_list {
        Some(list) => parse_cpu_list(list)?,
        None => Vec::new(),
    };
    if !cpus.contains(&cpu) {
        cpus.push(cpu);
    }
    if !cpus.contains(&alt_cpu) {
        cpus.push(alt_cpu);
    }

    // Restrict the whole run to the chosen set before narrowing per thread.
    pin_current_thread(&cpus)?;

    let same_core = cpu == alt_cpu;
    if same_core {
        eprintln!("WARNING: main and alt thread on the same core");
    }

    let adjust = match TscNsAdjust::detect() {
        Ok(adjust) => Some(adjust),
        Err(e) => {
            eprintln!("TSC calibration unavailable ({e}); reporting cycles only.");
            None
        }
    };
    let reporter = Reporter {
        json: args.json,
        ns_per_cycle: adjust.map(|a| a.cycles_to_ns(1 << 20) as f64 / (1 << 20) as f64),
    };

    let shared = Shared {
        same_core,
        sync_std: Barrier::new(2),
        skew_std: Barrier::new(2),
        spin: SpinBarrier::new(2),
        arrival_main: AtomicU64::new(0),
        arrival_alt: AtomicU64::new(0),
        ping: AtomicU64::new(0),
        pong: AtomicU64::new(0),
        mtx: Mutex::new(HandoffCell {
            last_unlock: 0,
            turn: 0,
            remaining: 10_000,
        }),
    };

    let mut operations = Vec::new();
    let (main_cross, alt_cross) = thread::scope(|s| {
        let shared = &shared;
        let alt = s.spawn(move || {
            if let Err(e) = pin_current_thread(&[alt_cpu]) {
                eprintln!("Could not pin alt thread to cpu {alt_cpu}: {e}");
            }
            cross_section(Role::Alt, shared)
        });

        pin_current_thread(&[cpu]).expect("failed to pin main thread");
        operations = single_thread_section(&reporter, cpu, alt_cpu, same_core);

        let main_cross = cross_section(Role::Main, shared);
        let alt_cross = alt.join().expect("alt thread panicked");
        (main_cross, alt_cross)
    });

    reporter.section("Cross-thread measurements");
    let cross_thread: Vec<Measurement> = main_cross
        .into_iter()
        .chain(alt_cross)
        .map(|(name, cycles)| reporter.measurement(&name, cycles))
        .collect();

    let report = Report {
        cpu,
        alt_cpu,
        same_core,
        operations,
        cross_thread,
    };
    if args.json {
        let rendered = serde_json::to_string_pretty(&report).expect("failed to serialize report");
        println!("{rendered}");
    }
    Ok(())
}

/// Run `op` twenty times and return the elapsed cycles with the timer
/// overhead subtracted.
fn time_20<F: FnMut()>(mut op: F, overhead: u64) -> u64 {
    let begin = tsc_cycles();
    for _ in 0..20 {
        op();
    }
    let fini = tsc_cycles();
    (fini - begin).saturating_sub(overhead)
}

#[inline(never)]
fn simple_call(count: u32) -> u32 {
    count.wrapping_add(1)
}

fn single_thread_section(
    rep: &Reporter,
    cpu: usize,
    alt_cpu: usize,
    same_core: bool,
) -> Vec<Measurement> {
    let mut out = Vec::new();
    let per = |elapsed: u64| elapsed as f64 / 20.0;

    rep.section("Interval timer calibration");

    let begin = tsc_cycles();
    let fini = tsc_cycles();
    out.push(rep.measurement("tsc_cycles() back-to-back", (fini - begin) as f64));

    let mut stats = RunningStats::new();
    for _ in 0..100 {
        let begin = tsc_cycles();
        let fini = tsc_cycles();
        stats.record((fini - begin) as f64);
    }
    let overhead = stats.mean().round() as u64;
    out.push(rep.measurement("timer overhead, mean of 100 pairs", stats.mean()));
    out.push(rep.measurement("timer overhead, std dev", stats.std_dev()));

    rep.section("Call, library, and allocator overhead (20x each)");

    let mut count = 0u32;
    let elapsed = time_20(
        || {
            count = black_box(simple_call(count));
        },
        overhead,
    );
    out.push(rep.measurement("non-inlined call", per(elapsed)));

    let elapsed = time_20(
        || {
            let v: Vec<u8> = Vec::with_capacity(256);
            black_box(&v);
        },
        overhead,
    );
    out.push(rep.measurement("allocate and free 256 B", per(elapsed)));

    let mut buf = vec![0u8; 8192];
    let elapsed = time_20(
        || {
            buf.fill(b'x');
            black_box(&buf);
        },
        overhead,
    );
    out.push(rep.measurement("fill 8 KiB", per(elapsed)));

    let elapsed = time_20(
        || {
            let (lo, hi) = buf.split_at_mut(4096);
            hi.copy_from_slice(lo);
            black_box(&hi);
        },
        overhead,
    );
    out.push(rep.measurement("copy 4 KiB", per(elapsed)));

    rep.section("System call timing (20x each)");

    let elapsed = time_20(
        || {
            black_box(unsafe { libc::getpid() });
        },
        overhead,
    );
    out.push(rep.measurement("getpid", per(elapsed)));

    let elapsed = time_20(
        || unsafe {
            libc::sched_yield();
        },
        overhead,
    );
    out.push(rep.measurement("sched_yield", per(elapsed)));

    rep.section("Affinity switches (20x each)");

    let elapsed = time_20(
        || {
            pin_current_thread(&[cpu]).expect("failed to switch affinity");
        },
        overhead,
    );
    out.push(rep.measurement("sched_setaffinity to current cpu", per(elapsed)));

    if !same_core {
        let elapsed = time_20(
            || {
                pin_current_thread(&[alt_cpu]).expect("failed to switch affinity");
                pin_current_thread(&[cpu]).expect("failed to switch affinity");
            },
            overhead,
        );
        // each iteration migrates twice
        out.push(rep.measurement(
            "sched_setaffinity to alternate cpu and back",
            elapsed as f64 / 40.0,
        ));
    }

    rep.section("pstamp operations (20x each)");

    let cause = Pstamp::capture(0);
    let elapsed = time_20(
        || {
            black_box(Pstamp::capture(0));
        },
        overhead,
    );
    out.push(rep.measurement("Pstamp::capture", per(elapsed)));

    let mut ring = PstampRing::new(1024);
    let begin = tsc_cycles();
    for _ in 0..20 {
        ring = ring.log(1, &cause);
    }
    let fini = tsc_cycles();
    out.push(rep.measurement(
        "PstampRing::log",
        per((fini - begin).saturating_sub(overhead)),
    ));
    drop(ring);

    let elapsed = time_20(
        || {
            black_box(Instant::now());
        },
        overhead,
    );
    out.push(rep.measurement("Instant::now", per(elapsed)));

    out
}

fn arrival_skew(shared: &Shared) -> f64 {
    let main = shared.arrival_main.load(Ordering::SeqCst);
    let alt = shared.arrival_alt.load(Ordering::SeqCst);
    main.abs_diff(alt) as f64
}

/// The cross-thread measurement script. Both threads execute the same
/// sequence of numbered rendezvous; a mismatched `sync` here hangs the run.
fn cross_section(role: Role, shared: &Shared) -> Vec<(String, f64)> {
    let mut out = Vec::new();

    shared.sync();

    // Arrival skew out of a sleeping barrier: both threads stamp on exit,
    // main reports the difference.
    shared.skew_std.wait();
    let arrival = tsc_cycles();
    match role {
        Role::Main => shared.arrival_main.store(arrival, Ordering::SeqCst),
        Role::Alt => shared.arrival_alt.store(arrival, Ordering::SeqCst),
    }
    shared.sync();
    if role == Role::Main {
        out.push(("std::sync::Barrier arrival skew".to_string(), arrival_skew(shared)));
    }

    // Same measurement out of the spin barrier.
    shared.spin.wait();
    let arrival = tsc_cycles();
    match role {
        Role::Main => shared.arrival_main.store(arrival, Ordering::SeqCst),
        Role::Alt => shared.arrival_alt.store(arrival, Ordering::SeqCst),
    }
    shared.sync();
    if role == Role::Main {
        out.push(("SpinBarrier arrival skew".to_string(), arrival_skew(shared)));
    }

    shared.sync();

    // Ping: alt publishes a timestamp, main polls for it. The latency spans
    // the store, the cache transfer, and the poll loop exit.
    match role {
        Role::Main => {
            let mut begin = shared.ping.load(Ordering::SeqCst);
            while begin == 0 {
                std::hint::spin_loop();
                begin = shared.ping.load(Ordering::SeqCst);
            }
            let fini = tsc_cycles();
            out.push(("shared-memory ping poll".to_string(), (fini - begin) as f64));
        }
        Role::Alt => {
            std::hint::spin_loop();
            shared.ping.store(tsc_cycles(), Ordering::SeqCst);
            std::hint::spin_loop();
        }
    }
    shared.sync();

    // Pong: the reverse direction.
    match role {
        Role::Main => {
            std::hint::spin_loop();
            shared.pong.store(tsc_cycles(), Ordering::SeqCst);
            std::hint::spin_loop();
        }
        Role::Alt => {
            let mut begin = shared.pong.load(Ordering::SeqCst);
            while begin == 0 {
                std::hint::spin_loop();
                begin = shared.pong.load(Ordering::SeqCst);
            }
            let fini = tsc_cycles();
            out.push(("shared-memory pong poll".to_string(), (fini - begin) as f64));
        }
    }
    shared.sync();

    // Contended mutex: threads alternate turns, each stamping just before
    // unlock and just after the next lock on the other side.
    let (handoffs, accumulated) = mutex_handoff(role, shared);
    if handoffs > 0 {
        let label = match role {
            Role::Main => "mutex unlock->lock handoff (main)",
            Role::Alt => "mutex unlock->lock handoff (alt)",
        };
        out.push((label.to_string(), accumulated as f64 / handoffs as f64));
    }
    shared.sync();

    out
}

fn mutex_handoff(role: Role, shared: &Shared) -> (u64, u64) {
    let me = match role {
        Role::Main => 0,
        Role::Alt => 1,
    };
    let mut handoffs = 0u64;
    let mut accumulated = 0u64;
    loop {
        let mut cell = shared.mtx.lock().expect("handoff mutex poisoned");
        if cell.remaining == 0 {
            break;
        }
        if cell.turn != me {
            drop(cell);
            // Get off the cpu so the holder can run; required on one core,
            // harmless on two.
            thread::yield_now();
            continue;
        }
        let acquired = tsc_cycles();
        if cell.last_unlock != 0 {
            accumulated += acquired.saturating_sub(cell.last_unlock);
            handoffs += 1;
        }
        cell.remaining -= 1;
        cell.turn = 1 - me;
        cell.last_unlock = tsc_cycles();
        // guard drops here; the other thread wakes and stamps acquisition
    }
    (handoffs, accumulated)
}
