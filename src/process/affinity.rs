//! CPU affinity for the subject process.
//!
//! The mask is applied inside the forked child before `exec`, so the subject
//! program never runs on a disallowed core. Only Linux supports this; on
//! other platforms the mask is accepted and ignored.

use std::process::Command;

/// Logical CPU indices selected by `mask` (bit *i* set means CPU *i*).
pub fn cpus_in_mask(mask: u64) -> Vec<usize> {
    (0..u64::BITS as usize)
        .filter(|cpu| mask & (1u64 << cpu) != 0)
        .collect()
}

/// Arranges for `command` to pin itself to `mask` right before exec.
///
/// A zero mask means "not configured" and leaves the command untouched.
#[cfg(target_os = "linux")]
pub fn apply_to_command(command: &mut Command, mask: u64) {
    use std::io;
    use std::mem;
    use std::os::unix::process::CommandExt;

    if mask == 0 {
        return;
    }

    // SAFETY: Zero-initialized cpu_set_t is a valid value.
    let mut cpu_set: libc::cpu_set_t = unsafe { mem::zeroed() };
    for cpu in cpus_in_mask(mask) {
        // SAFETY: cpu < 64, well inside the fixed-size set.
        unsafe {
            libc::CPU_SET(cpu, &mut cpu_set);
        }
    }

    // SAFETY: the closure only issues a single syscall on a value captured
    // by copy, which is async-signal-safe between fork and exec.
    unsafe {
        command.pre_exec(move || {
            // 0 means the calling (child) process.
            let result =
                libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpu_set);
            if result == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_to_command(_command: &mut Command, mask: u64) {
    if mask != 0 {
        log::debug!("CPU affinity mask {:#x} ignored on this platform", mask);
    }
}
