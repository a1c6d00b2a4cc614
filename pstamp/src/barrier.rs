//! Self-resetting spin rendezvous.
//!
//! All participants busy-wait; nobody sleeps in the OS. One atomic counter
//! carries both the arrival count and the release phase: arrivals are
//! counted in the bits below the phase bit, and crossing a multiple of the
//! rounded-up participant count flips the phase bit, releasing the spinners
//! of the current round while the next round counts into the bits above.

use std::sync::atomic::{AtomicU32, Ordering};

/// Reusable spin barrier for a fixed number of participants.
///
/// The participant count need not be a power of two; the counter is seeded
/// with the shortfall to the next power of two and the last arrival of each
/// round re-arms it. There is no timeout and no cancellation: a missing
/// participant spins the rest forever, and calling `wait` from more threads
/// than `participants` is a contract violation.
pub struct SpinBarrier {
    word: AtomicU32,
    rounding: u32,
    pad: u32,
}

impl SpinBarrier {
    /// Create a barrier for `participants` threads. `participants` must be
    /// at least 1.
    pub fn new(participants: u32) -> Self {
        assert!(participants > 0, "barrier needs at least one participant");
        let rounding = participants.next_power_of_two();
        let pad = rounding - participants;
        SpinBarrier {
            word: AtomicU32::new(pad),
            rounding,
            pad,
        }
    }

    /// Arrive and spin until every participant of this round has arrived.
    ///
    /// The wrapping counter keeps rounds aligned because `rounding` divides
    /// the counter modulus, so the barrier resets itself for the next round
    /// with no separate epoch state.
    pub fn wait(&self) {
        let value = self.word.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        if value & (self.rounding - 1) != 0 {
            let phase = value & self.rounding;
            while self.word.load(Ordering::SeqCst) & self.rounding == phase {
                std::hint::spin_loop();
            }
        } else if self.pad != 0 {
            // Last arrival of the round restores the seed for the next one.
            self.word.fetch_add(self.pad, Ordering::SeqCst);
        }
    }
}
