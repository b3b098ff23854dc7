//! `fork` + `execve` with an exact descriptor table.
//!
//! The parent builds everything the child needs (descriptor roles, `execve`
//! candidates, `argv`/`envp` pointer arrays), creates a close-on-exec pipe,
//! and forks. The child rewrites its descriptor table and execs; if anything
//! fails it writes the errno to the pipe and exits. The parent reads the pipe:
//! end-of-file means `execve` succeeded and closed the pipe.

mod bootstrap;
pub mod exec;
pub mod fd_table;
pub mod raw;

use std::{
    env,
    ffi::{CStr, CString, OsStr, c_char},
    fs::File,
    io::{self, Read as _},
    os::{
        fd::{AsRawFd as _, OwnedFd},
        unix::ffi::OsStrExt as _,
    },
    ptr,
};

use bstr::ByteSlice as _;
use fdspawn_shared::fd_map::FdOperation;
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork},
};
use tracing::{debug, trace};

use self::{
    bootstrap::ChildPlan,
    fd_table::{FdTable, open_file_limit},
};
use crate::{ExitStatus, command::Command};

/// Spawns `program` with exactly the descriptors `ops` install.
///
/// `ops` run in the listed order. Returns the child's pid once `execve`
/// succeeded; any failure before that is returned as the errno the child (or
/// the parent) hit, and no child is left behind.
pub fn spawn(
    program: &CStr,
    argv: &[CString],
    envp: &[CString],
    ops: &[FdOperation],
    path_resolve: bool,
) -> nix::Result<Pid> {
    let argv = null_terminated(argv);
    let envp = null_terminated(envp);
    // SAFETY: both arrays are null-terminated and borrow strings that outlive the call
    unsafe { spawn_ptrs(program, argv.as_ptr(), envp.as_ptr(), ops, path_resolve) }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain([ptr::null()])
        .collect()
}

/// # Safety
/// `argv` and `envp` must be null-terminated arrays of nul-terminated strings.
unsafe fn spawn_ptrs(
    program: &CStr,
    argv: *const *const c_char,
    envp: *const *const c_char,
    ops: &[FdOperation],
    path_resolve: bool,
) -> nix::Result<Pid> {
    let table = FdTable::new(ops, open_file_limit()?)?;
    let path = env::var_os("PATH");
    let candidates = exec::candidates(
        program,
        path_resolve,
        path.as_deref().map(|path| path.as_bytes().as_bstr()),
    )?;
    trace!(?candidates, ops = ops.len(), "prepared child");

    let (read_end, write_end) = back_channel()?;
    let plan = ChildPlan {
        table: &table,
        ops,
        candidates: &candidates,
        argv,
        envp,
    };

    match unsafe { fork() }? {
        ForkResult::Child => bootstrap::run(&plan, write_end.as_raw_fd()),
        ForkResult::Parent { child } => {
            drop(write_end);
            settle(child, program, read_report(read_end))
        }
    }
}

/// Turns the back-channel report into the spawn result. A child that did not
/// reach `execve` is reaped here and its pid is never returned.
fn settle(child: Pid, program: &CStr, report: nix::Result<Option<Errno>>) -> nix::Result<Pid> {
    match report {
        Ok(None) => {
            debug!(pid = child.as_raw(), ?program, "spawned");
            Ok(child)
        }
        Ok(Some(err)) => {
            debug!(pid = child.as_raw(), ?program, %err, "child failed before exec");
            // it has already exited with `err`
            let _ = wait(child);
            Err(err)
        }
        Err(err) => {
            debug!(pid = child.as_raw(), %err, "reading back-channel failed");
            // its outcome is unknown, so it must not outlive the failed spawn
            let _ = kill(child, Signal::SIGKILL);
            let _ = wait(child);
            Err(err)
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))] {
        fn back_channel() -> nix::Result<(OwnedFd, OwnedFd)> {
            nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
        }
    } else {
        fn back_channel() -> nix::Result<(OwnedFd, OwnedFd)> {
            let (read_end, write_end) = nix::unistd::pipe()?;
            for fd in [&read_end, &write_end] {
                if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
                    return Err(Errno::last());
                }
            }
            Ok((read_end, write_end))
        }
    }
}

/// Reads the child's report: `None` on end-of-file, the errno it sent otherwise.
fn read_report(read_end: OwnedFd) -> nix::Result<Option<Errno>> {
    let mut pipe = File::from(read_end);
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(io_errno(&err)),
        }
    }
    match filled {
        0 => Ok(None),
        4 => Ok(Some(Errno::from_raw(i32::from_ne_bytes(buf)))),
        // the child died mid-write
        _ => Err(Errno::EIO),
    }
}

fn io_errno(err: &io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Blocks until `pid` terminates.
///
/// Stops and continues are not terminal and are skipped. A child killed by a
/// signal is [`ExitStatus::Signaled`].
pub fn wait(pid: Pid) -> nix::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                // only the low 8 bits of a POSIX exit code are ever reported
                return Ok(ExitStatus::Exited(code as u32));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ExitStatus::Signaled(signal as i32)),
            Ok(status) => trace!(?status, "ignoring non-terminal wait status"),
            Err(Errno::EINTR) => {}
            Err(err) => return Err(err),
        }
    }
}

/// A spawned child that has not been waited for.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
}

impl Process {
    pub fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn wait(self) -> io::Result<ExitStatus> {
        let status = wait(self.pid)?;
        debug!(pid = self.pid.as_raw(), %status, "child exited");
        Ok(status)
    }
}

fn c_string(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("nul byte in {:?}", s),
        )
    })
}

pub(crate) fn spawn_command(command: &Command) -> io::Result<Process> {
    let program = c_string(&command.program)?;

    let mut argv = Vec::with_capacity(command.args.len() + 1);
    argv.push(c_string(command.arg0.as_deref().unwrap_or(command.program.as_os_str()))?);
    for arg in &command.args {
        argv.push(c_string(arg)?);
    }

    let mut envp = Vec::with_capacity(command.envs.len());
    for (name, value) in &command.envs {
        let mut entry = name.clone();
        entry.push("=");
        entry.push(value);
        envp.push(c_string(&entry)?);
    }

    let ops = command.fd_map.operations();
    let pid = spawn(&program, &argv, &envp, &ops, command.path_resolve)?;
    Ok(Process { pid })
}
