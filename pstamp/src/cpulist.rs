//! CPU list parsing and thread affinity.
//!
//! The kernel describes processor sets as comma-separated ids and inclusive
//! ranges (`"0-3,5,7-11"`), the format of `/sys/devices/system/cpu/online`
//! and the usual shape of a `--cpu-list` style argument.

use std::fs;
use std::io;
use std::mem;

/// Parse a kernel-format cpu list into the cpu ids it names, in order.
pub fn parse_cpu_list(list: &str) -> io::Result<Vec<usize>> {
    let trimmed = list.trim();
    if trimmed.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty cpu list"));
    }
    let mut cpus = Vec::new();
    for part in trimmed.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad cpu range {part:?}: {e}"),
                )
            })?;
            let end: usize = end.trim().parse().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad cpu range {part:?}: {e}"),
                )
            })?;
            if end < start {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad cpu range {part:?}: end before start"),
                ));
            }
            cpus.extend(start..=end);
        } else {
            let cpu: usize = part.trim().parse().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad cpu id {part:?}: {e}"),
                )
            })?;
            cpus.push(cpu);
        }
    }
    Ok(cpus)
}

/// Cpus currently online, from `/sys/devices/system/cpu/online`.
pub fn online_cpus() -> io::Result<Vec<usize>> {
    let text = fs::read_to_string("/sys/devices/system/cpu/online")?;
    parse_cpu_list(&text)
}

/// Restrict the calling thread to the given cpus.
pub fn pin_current_thread(cpus: &[usize]) -> io::Result<()> {
    if cpus.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty cpu set"));
    }
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
    }
    for &cpu in cpus {
        if cpu >= libc::CPU_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cpu {cpu} exceeds CPU_SETSIZE"),
            ));
        }
        unsafe {
            libc::CPU_SET(cpu, &mut set);
        }
    }
    let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Logical processor the calling thread is running on right now.
pub fn current_cpu() -> usize {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 { 0 } else { cpu as usize }
}
