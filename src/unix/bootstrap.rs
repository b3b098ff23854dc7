//! The forked child, from `fork` returning to `execve` or `_exit`.
//!
//! Everything here runs in a copy of a possibly multi-threaded parent, so only
//! async-signal-safe calls are allowed: no allocation, no locks, no logging.
//! All inputs are prepared by the parent before it forks.

use std::{
    convert::Infallible,
    ffi::{CString, c_char, c_int},
    os::fd::RawFd,
};

use fdspawn_shared::fd_map::FdOperation;
use nix::errno::Errno;

use super::{exec::exec_candidates, fd_table::FdTable};

/// What the child needs, fully built before `fork`.
pub struct ChildPlan<'a> {
    pub table: &'a FdTable,
    pub ops: &'a [FdOperation],
    pub candidates: &'a [CString],
    pub argv: *const *const c_char,
    pub envp: *const *const c_char,
}

/// Sets up the descriptor table and execs. Never returns.
///
/// On failure the errno is written to the back-channel as 4 native-endian
/// bytes and the child exits with it as its status.
pub fn run(plan: &ChildPlan<'_>, back_channel: RawFd) -> ! {
    let mut report_fd = back_channel;
    let Err(err) = bootstrap(plan, back_channel, &mut report_fd);
    report_and_exit(report_fd, err)
}

fn bootstrap(plan: &ChildPlan<'_>, back_channel: RawFd, report_fd: &mut RawFd) -> Result<Infallible, Errno> {
    let parking = plan.table.lowest_free().ok_or(Errno::EMFILE)?;
    *report_fd = relocate(back_channel, parking)?;

    for op in plan.ops {
        match *op {
            FdOperation::Dup { src, dst } if src == dst => clear_cloexec(dst)?,
            FdOperation::Dup { src, dst } => dup_onto(src, dst)?,
            FdOperation::Close(fd) => unsafe {
                libc::close(fd);
            },
        }
    }

    for fd in plan.table.closable() {
        if fd != *report_fd {
            unsafe { libc::close(fd) };
        }
    }
    close_tail(plan.table, *report_fd);

    exec_candidates(plan.candidates, plan.argv, plan.envp)
}

fn check(ret: c_int) -> Result<c_int, Errno> {
    if ret == -1 { Err(Errno::last()) } else { Ok(ret) }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))] {
        /// Moves the back-channel onto `target`, keeping it close-on-exec.
        fn relocate(fd: RawFd, target: RawFd) -> Result<RawFd, Errno> {
            if fd != target {
                retry(|| check(unsafe { libc::dup3(fd, target, libc::O_CLOEXEC) }))?;
            }
            Ok(target)
        }
    } else {
        fn relocate(fd: RawFd, target: RawFd) -> Result<RawFd, Errno> {
            if fd != target {
                retry(|| check(unsafe { libc::dup2(fd, target) }))?;
                check(unsafe { libc::fcntl(target, libc::F_SETFD, libc::FD_CLOEXEC) })?;
            }
            Ok(target)
        }
    }
}

fn dup_onto(src: RawFd, dst: RawFd) -> Result<(), Errno> {
    retry(|| check(unsafe { libc::dup2(src, dst) }))?;
    Ok(())
}

/// A descriptor mapped onto itself only needs to survive `execve`.
fn clear_cloexec(fd: RawFd) -> Result<(), Errno> {
    let flags = check(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    if flags & libc::FD_CLOEXEC != 0 {
        check(unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) })?;
    }
    Ok(())
}

fn retry(mut f: impl FnMut() -> Result<c_int, Errno>) -> Result<c_int, Errno> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            result => return result,
        }
    }
}

/// Closes every descriptor from the end of the explicit table up to the
/// limit, except `keep`. Nothing in that range is a destination.
fn close_tail(table: &FdTable, keep: RawFd) {
    let first = table.explicit_len() as u32;
    let limit = table.limit() as u32;
    let keep = keep as u32;
    if keep >= first {
        if keep > first {
            close_range(first, keep - 1, limit);
        }
        close_range(keep + 1, u32::MAX, limit);
    } else {
        close_range(first, u32::MAX, limit);
    }
}

/// Closes `first..=last`, stopping at `limit` when it has to go one by one.
fn close_range(first: u32, last: u32, limit: u32) {
    #[cfg(target_os = "linux")]
    {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_close_range,
                first as libc::c_uint,
                last as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if ret == 0 {
            return;
        }
    }
    for fd in first..=last.min(limit.saturating_sub(1)) {
        unsafe { libc::close(fd as c_int) };
    }
}

fn report_and_exit(report_fd: RawFd, err: Errno) -> ! {
    let code = err as i32;
    let bytes = code.to_ne_bytes();
    let mut written = 0;
    while written < bytes.len() {
        let ret = unsafe {
            libc::write(
                report_fd,
                bytes[written..].as_ptr().cast(),
                bytes.len() - written,
            )
        };
        match ret {
            n if n > 0 => written += n as usize,
            -1 if Errno::last() == Errno::EINTR => {}
            _ => break,
        }
    }
    unsafe { libc::_exit(code) }
}
