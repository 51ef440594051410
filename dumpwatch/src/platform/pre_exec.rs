//! Pre-exec hooks for the watchdog child.
//!
//! Applied after `fork()` but before `exec()`:
//! 1. **New session**: `setsid()` detaches the watchdog from the terminal's
//!    process group, so a Ctrl-C aimed at the application does not also
//!    take down its crash reporter.
//! 2. **FD cleanup**: no inherited file descriptor ≥ 3 survives `exec()`.
//!
//! No `PR_SET_PDEATHSIG`: the watchdog must outlive a crashing parent
//! until its report is uploaded.

use std::process::Command;

/// Install pre-exec hooks on the command.
///
/// On non-Unix platforms this is a no-op.
#[cfg(not(unix))]
pub fn apply(_cmd: &mut Command) {}

/// Install pre-exec hooks on the command.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn apply(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: all operations inside are async-signal-safe syscalls.
    unsafe {
        cmd.pre_exec(|| {
            // Fails only if already a group leader, which a fresh child never is.
            libc::setsid();
            close_inherited_fds();
            Ok(())
        });
    }
}

/// Mark all file descriptors >= 3 close-on-exec.
///
/// FDs 0 (stdin), 1 (stdout), 2 (stderr) are preserved. Descriptors are
/// marked rather than closed: `Command` reports exec failures through one
/// of them.
#[cfg(unix)]
#[allow(unsafe_code)]
fn close_inherited_fds() {
    // close_range(3, u32::MAX, CLOSE_RANGE_CLOEXEC), Linux 5.11+.
    #[cfg(target_os = "linux")]
    {
        const CLOSE_RANGE_CLOEXEC: u32 = 1 << 2;
        // SAFETY: close_range is an async-signal-safe syscall.
        let ret =
            unsafe { libc::syscall(libc::SYS_close_range, 3_u32, u32::MAX, CLOSE_RANGE_CLOEXEC) };
        if ret == 0 {
            return;
        }
    }

    // Fallback: walk up to sysconf(_SC_OPEN_MAX).
    // SAFETY: sysconf and fcntl are async-signal-safe.
    let max_fd = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let limit = if max_fd > 0 {
        i32::try_from(max_fd).unwrap_or(i32::MAX)
    } else {
        1024
    };
    for fd in 3..limit {
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    }
}
