//! # pstamp
//!
//! Low-overhead causal event tracing. A capture is one `RDTSCP` on x86_64:
//! cycle count plus the logical processor, written into a fixed-capacity
//! per-thread ring with no locks and no allocation on the hot path. Entries
//! carry the event that caused them, so merged per-core logs read as a
//! causal trace of the whole process.
//!
//! Also here because the same measurements need them: a self-resetting
//! [`SpinBarrier`] for lockstep thread choreography, kernel-calibrated
//! cycles-to-nanoseconds conversion ([`TscNsAdjust`]), cpu-list parsing and
//! affinity pinning, and a running-statistics accumulator.
//!
//! ## Quick start
//!
//! ```no_run
//! use pstamp::{Pstamp, PstampRing};
//!
//! let root = Pstamp::capture(0);
//! let mut ring = PstampRing::new(1024);
//!
//! // The handle is threaded through log; keep the returned one.
//! ring = ring.log(1, &root);
//! ring = ring.log(2, &root);
//!
//! // After writing stops, walk oldest to newest.
//! ring.enumerate(|entry| {
//!     println!(
//!         "point {} on cpu {} at {} (cause: point {})",
//!         entry.pstamp.point,
//!         entry.pstamp.logical_processor,
//!         entry.pstamp.cycles,
//!         entry.cause.point,
//!     );
//! });
//! ```

mod barrier;
mod calibrate;
mod cpulist;
mod ring;
mod stats;
mod sys;
mod tsc;

pub use barrier::SpinBarrier;
pub use calibrate::TscNsAdjust;
pub use cpulist::{current_cpu, online_cpus, parse_cpu_list, pin_current_thread};
pub use ring::{Entries, LoggedPstamp, PstampRing, merge};
pub use stats::RunningStats;
pub use tsc::{Pstamp, tsc_cycles};
