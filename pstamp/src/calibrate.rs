//! TSC cycles to nanoseconds.
//!
//! The kernel publishes its own cycles-to-time conversion parameters on the
//! metadata page of any mmap'd perf event. Opening a throwaway disabled
//! event is enough to read them; the event never counts anything.

use std::io;
use std::mem;
use std::ptr;

use crate::sys::{
    PERF_ATTR_FLAG_DISABLED, PERF_ATTR_FLAG_EXCLUDE_HV, PERF_ATTR_FLAG_EXCLUDE_KERNEL,
    PERF_CAP_USER_TIME, PERF_COUNT_HW_INSTRUCTIONS, PERF_FLAG_FD_CLOEXEC, PERF_TYPE_HARDWARE,
    PerfEventAttr, PerfEventMmapPage, perf_event_open,
};

/// Multiplier and shift for converting TSC cycles to nanoseconds, as the
/// kernel itself converts them.
#[derive(Debug, Clone, Copy)]
pub struct TscNsAdjust {
    time_mult: u32,
    time_shift: u16,
}

impl TscNsAdjust {
    /// Read the conversion parameters from the kernel. One-shot: opens a
    /// disabled hardware event, reads `time_mult`/`time_shift` from its
    /// metadata page, and closes everything before returning.
    pub fn detect() -> io::Result<TscNsAdjust> {
        let mut attr = PerfEventAttr::zeroed();
        attr.type_ = PERF_TYPE_HARDWARE;
        attr.size = mem::size_of::<PerfEventAttr>() as u32;
        attr.config = PERF_COUNT_HW_INSTRUCTIONS;
        attr.flags =
            PERF_ATTR_FLAG_DISABLED | PERF_ATTR_FLAG_EXCLUDE_KERNEL | PERF_ATTR_FLAG_EXCLUDE_HV;

        let fd = perf_event_open(&attr, 0, -1, -1, PERF_FLAG_FD_CLOEXEC);
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::PermissionDenied {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "perf_event_open denied; lower /proc/sys/kernel/perf_event_paranoid to 2 \
                     or grant CAP_PERFMON",
                ));
            }
            return Err(err);
        }

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                page_size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }

        let (capabilities, time_mult, time_shift) = unsafe {
            let page = &*(base as *const PerfEventMmapPage);
            (
                ptr::read_volatile(&page.capabilities),
                ptr::read_volatile(&page.time_mult),
                ptr::read_volatile(&page.time_shift),
            )
        };
        unsafe {
            libc::munmap(base, page_size);
            libc::close(fd);
        }

        if capabilities & PERF_CAP_USER_TIME == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "kernel does not export user-space time conversion (cap_user_time unset)",
            ));
        }
        Ok(TscNsAdjust {
            time_mult,
            time_shift,
        })
    }

    /// Convert a cycle count (or cycle delta) to nanoseconds.
    #[inline]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        ((cycles as u128 * self.time_mult as u128) >> self.time_shift) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_is_multiply_shift() {
        let adjust = TscNsAdjust {
            time_mult: 1 << 8,
            time_shift: 8,
        };
        assert_eq!(adjust.cycles_to_ns(12345), 12345);

        // 3 GHz: mult = 10^9 / 3e9 * 2^20, one cycle is a third of a ns.
        let adjust = TscNsAdjust {
            time_mult: 349_525,
            time_shift: 20,
        };
        let ns = adjust.cycles_to_ns(3_000_000_000);
        assert!((999_000_000..=1_001_000_000).contains(&ns), "{ns}");
    }

    #[test]
    fn conversion_does_not_overflow_large_counts() {
        let adjust = TscNsAdjust {
            time_mult: u32::MAX,
            time_shift: 0,
        };
        // A day's worth of cycles at a few GHz stays in range via the u128
        // intermediate.
        let _ = adjust.cycles_to_ns(u64::MAX / 2);
    }

    #[test]
    fn detect_reports_usable_parameters_when_permitted() {
        match TscNsAdjust::detect() {
            Ok(adjust) => {
                assert!(adjust.time_mult > 0);
                assert!(adjust.cycles_to_ns(1_000_000) > 0);
            }
            // Denied or unsupported is fine in CI containers.
            Err(err) => eprintln!("calibration unavailable: {err}"),
        }
    }
}
