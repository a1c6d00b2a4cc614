//! Raw Linux perf_event types, constants, and syscall wrapper.
//!
//! Only the slice of the ABI that calibration touches: enough to open a
//! disabled hardware event and read the mmap'd metadata page.

#![allow(dead_code)]

use libc::{SYS_perf_event_open, c_int, c_ulong, pid_t, syscall};
use std::mem;

pub const PERF_TYPE_HARDWARE: u32 = 0;

pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;

// --- attr.flags (bitfield) ---
// On little-endian, bit N is simply (1 << N).

pub const PERF_ATTR_FLAG_DISABLED: u64 = 1 << 0;
pub const PERF_ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
pub const PERF_ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

// --- perf_event_open flags ---

pub const PERF_FLAG_FD_CLOEXEC: c_ulong = 1 << 3;

// --- mmap page capabilities ---

pub const PERF_CAP_USER_RDPMC: u64 = 1 << 2;
pub const PERF_CAP_USER_TIME: u64 = 1 << 3;

// --- perf_event_attr ---

#[repr(C)]
#[derive(Debug)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub bp_addr_or_config1: u64,
    pub bp_len_or_config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clock_id: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub __reserved_2: u16,
    pub aux_sample_size: u32,
    pub __reserved_3: u32,
}

impl PerfEventAttr {
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }
}

// --- perf_event_mmap_page (metadata page) ---

#[repr(C)]
pub struct PerfEventMmapPage {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    pub _reserved: [u8; 948], // pad to offset 0x400 = 1024
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
}

// --- Syscall wrapper ---

pub fn perf_event_open(
    attr: &PerfEventAttr,
    pid: pid_t,
    cpu: c_int,
    group_fd: c_int,
    flags: c_ulong,
) -> c_int {
    unsafe {
        syscall(
            SYS_perf_event_open,
            attr as *const _ as *const libc::c_void,
            pid,
            cpu,
            group_fd,
            flags,
        ) as c_int
    }
}
