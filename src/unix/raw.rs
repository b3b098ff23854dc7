//! Entry points over the sentinel-terminated wire form.
//!
//! `argv` and `envp` are null-terminated pointer arrays and the descriptor map
//! is `src, dst, src, dst, ..., -1`. Pairs are installed in the listed order,
//! so a later pair may overwrite an earlier pair's destination, and a pair
//! reading a descriptor an earlier pair rewrote sees the rewritten one.

use std::ffi::{CStr, c_char};

use fdspawn_shared::{fd_map::FdOperation, terminated::FdPairs};
use nix::{errno::Errno, unistd::Pid};

/// Spawns `command` and returns the child's pid, or the errno that prevented it.
///
/// # Safety
/// `command` must be a valid nul-terminated string. `argv` and `envp` must be
/// null-terminated arrays of valid nul-terminated strings, and `fd_map` must be
/// a `-1`-terminated list of complete pairs. None of this is checked: a missing
/// terminator is undefined behavior.
///
/// A file that exists and is executable but is not in a format the kernel
/// runs (such as a script without a `#!` line) fails with `ENOEXEC`; it is not
/// retried through `/bin/sh` the way glibc's `execvpe` does.
pub unsafe fn spawn(
    command: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
    fd_map: *const i32,
    path_resolve: bool,
) -> Result<i32, i32> {
    let command = unsafe { CStr::from_ptr(command) };
    let ops = unsafe { FdPairs::from_ptr(fd_map) }
        .map(FdOperation::from)
        .collect::<Vec<_>>();
    unsafe { super::spawn_ptrs(command, argv, envp, &ops, path_resolve) }
        .map(Pid::as_raw)
        .map_err(|err| err as i32)
}

/// Waits for a pid returned by [`spawn`] and returns its exit code.
///
/// A signal-terminated child yields [`crate::SIGNALED_EXIT_CODE`].
pub fn wait(pid: i32) -> Result<i32, i32> {
    super::wait(Pid::from_raw(pid))
        // at most `SIGNALED_EXIT_CODE`
        .map(|status| status.code() as i32)
        .map_err(|err: Errno| err as i32)
}
