//! `CreateProcessW` with Unix-style inputs.
//!
//! Windows has no `execvp`: the executable is located with the shell's rules,
//! the argument list is quoted into one command line, and the environment is
//! flattened into a sorted block, all before the process is created. Mapped
//! descriptors reach C-runtime children through the `lpReserved2` handle
//! buffer; descriptors 0 to 2 also become the standard handles.

mod sys;

use std::{
    env,
    ffi::OsString,
    io, mem,
    os::windows::{
        ffi::OsStrExt as _,
        io::{AsRawHandle as _, FromRawHandle as _, OwnedHandle},
    },
    ptr::{null, null_mut},
};

use fdspawn_shared::{
    Error,
    fd_map::FdOperation,
    win32::{
        env::{build_env_block, entry_name, simple_uppercase},
        handles::{ChildHandleBuffer, FDEV, FOPEN, FPIPE, InheritedHandle, slot_count},
        path::search_path,
        quote::build_argument_line,
    },
    wtf8,
};
use tracing::{debug, trace};
use winapi::{
    shared::{
        minwindef::{DWORD, TRUE},
        winerror::{ERROR_FILE_NOT_FOUND, ERROR_INVALID_HANDLE},
    },
    um::{
        fileapi::GetFileType,
        handleapi::{DuplicateHandle, INVALID_HANDLE_VALUE},
        processthreadsapi::{
            CreateProcessW, GetCurrentProcess, GetExitCodeProcess, PROCESS_INFORMATION,
            STARTUPINFOW,
        },
        synchapi::WaitForSingleObject,
        winbase::{
            CREATE_DEFAULT_ERROR_MODE, CREATE_UNICODE_ENVIRONMENT, FILE_TYPE_CHAR, FILE_TYPE_PIPE,
            INFINITE, STARTF_USESTDHANDLES, WAIT_FAILED,
        },
        winnt::{DUPLICATE_SAME_ACCESS, HANDLE},
    },
};

use self::sys::{ProcessEnv, Win32Probe, ck, last_error};
use crate::{ExitStatus, command::Command};

fn io_error(err: Error) -> io::Error {
    match err {
        Error::Os(code) => io::Error::from_raw_os_error(code as i32),
        Error::BadDescriptor(_) => io::Error::from_raw_os_error(ERROR_INVALID_HANDLE as i32),
        Error::OutOfMemory(_) => io::Error::new(io::ErrorKind::OutOfMemory, err),
        Error::Wtf8(_) | Error::TooManyHandles(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        Error::EnvChanged { .. } => io::Error::other(err),
    }
}

/// The caller's `PATH` if `envp` sets one, otherwise the parent's.
fn search_list(envp: &[&[u8]]) -> Result<Option<Vec<u16>>, Error> {
    const PATH: [u16; 4] = [b'P' as u16, b'A' as u16, b'T' as u16, b'H' as u16];
    for entry in envp {
        let entry = wtf8::to_utf16(entry)?;
        if let Some(name) = entry_name(&entry) {
            if simple_uppercase(name) == PATH {
                return Ok(Some(entry[name.len() + 1..].to_vec()));
            }
        }
    }
    Ok(env::var_os("PATH").map(|path| path.encode_wide().collect()))
}

/// Handles the child inherits, one slot per descriptor up to the highest mapped one.
fn inherited_handles(ops: &[FdOperation]) -> io::Result<Vec<Option<(OwnedHandle, u8)>>> {
    let table = FdOperation::simulate(ops);
    let count = slot_count(table.keys().copied()).map_err(io_error)?;
    let mut slots = Vec::with_capacity(count);
    for fd in 0..count as i32 {
        let Some(&src) = table.get(&fd) else {
            slots.push(None);
            continue;
        };
        let raw = unsafe { libc::get_osfhandle(src) };
        if raw == -1 || raw == -2 {
            return Err(io::Error::from_raw_os_error(ERROR_INVALID_HANDLE as i32));
        }

        let mut duplicate: HANDLE = null_mut();
        ck(unsafe {
            DuplicateHandle(
                GetCurrentProcess(),
                raw as HANDLE,
                GetCurrentProcess(),
                &mut duplicate,
                0,
                TRUE,
                DUPLICATE_SAME_ACCESS,
            )
        })?;
        let duplicate = unsafe { OwnedHandle::from_raw_handle(duplicate.cast()) };

        let flags = FOPEN
            | match unsafe { GetFileType(duplicate.as_raw_handle().cast()) } {
                FILE_TYPE_PIPE => FPIPE,
                FILE_TYPE_CHAR => FDEV,
                _ => 0,
            };
        trace!(fd, src, flags, "inheriting handle");
        slots.push(Some((duplicate, flags)));
    }
    Ok(slots)
}

fn raw_handle(slot: Option<&(OwnedHandle, u8)>) -> HANDLE {
    slot.map_or(INVALID_HANDLE_VALUE, |(handle, _)| handle.as_raw_handle().cast())
}

/// Starts `program` with WTF-8 `args` (the first one being the program name as
/// the child should see it) and `NAME=VALUE` entries `envp`.
///
/// With `path_resolve` off, `program` is only looked up relative to the
/// current directory. A program that cannot be found is `ERROR_FILE_NOT_FOUND`.
pub fn spawn(
    program: &[u8],
    args: &[&[u8]],
    envp: &[&[u8]],
    ops: &[FdOperation],
    path_resolve: bool,
    verbatim_arguments: bool,
) -> io::Result<Process> {
    let file = wtf8::to_utf16(program).map_err(io_error)?;
    let cwd = env::current_dir()?.as_os_str().encode_wide().collect::<Vec<u16>>();
    let path = if path_resolve {
        search_list(envp).map_err(io_error)?
    } else {
        None
    };
    let Some(mut application) = search_path(&Win32Probe, &file, &cwd, path.as_deref()) else {
        return Err(io::Error::from_raw_os_error(ERROR_FILE_NOT_FOUND as i32));
    };
    application.push(0);
    trace!(application = %String::from_utf16_lossy(&application), "resolved program");

    let mut command_line = build_argument_line(args, verbatim_arguments).map_err(io_error)?;
    let mut env_block = build_env_block(envp, &ProcessEnv).map_err(io_error)?;

    let handles = inherited_handles(ops)?;
    let mut handle_buffer = ChildHandleBuffer::new(
        &handles
            .iter()
            .map(|slot| {
                slot.as_ref().map(|(handle, flags)| InheritedHandle {
                    flags: *flags,
                    handle: handle.as_raw_handle() as usize,
                })
            })
            .collect::<Vec<_>>(),
    )
    .map_err(io_error)?;

    let mut startup_info: STARTUPINFOW = unsafe { mem::zeroed() };
    startup_info.cb = mem::size_of::<STARTUPINFOW>() as DWORD;
    startup_info.dwFlags = STARTF_USESTDHANDLES;
    startup_info.hStdInput = raw_handle(handles.first().and_then(Option::as_ref));
    startup_info.hStdOutput = raw_handle(handles.get(1).and_then(Option::as_ref));
    startup_info.hStdError = raw_handle(handles.get(2).and_then(Option::as_ref));
    startup_info.cbReserved2 = handle_buffer.reserved_len();
    startup_info.lpReserved2 = handle_buffer.as_mut_ptr();

    let mut process_info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    ck(unsafe {
        CreateProcessW(
            application.as_ptr(),
            command_line.as_mut_ptr(),
            null_mut(),
            null_mut(),
            TRUE,
            CREATE_UNICODE_ENVIRONMENT | CREATE_DEFAULT_ERROR_MODE,
            env_block.as_mut_ptr().cast(),
            null(),
            &mut startup_info,
            &mut process_info,
        )
    })?;
    drop(unsafe { OwnedHandle::from_raw_handle(process_info.hThread.cast()) });
    let process = unsafe { OwnedHandle::from_raw_handle(process_info.hProcess.cast()) };
    debug!(pid = process_info.dwProcessId, "created process");

    // the child holds its own copies now
    drop(handles);
    Ok(Process {
        pid: process_info.dwProcessId,
        handle: process,
    })
}

/// Blocks until the process exits and returns its exit code.
pub fn wait(process: &OwnedHandle) -> io::Result<ExitStatus> {
    let handle: HANDLE = process.as_raw_handle().cast();
    if unsafe { WaitForSingleObject(handle, INFINITE) } == WAIT_FAILED {
        return Err(last_error());
    }
    let mut code: DWORD = 0;
    ck(unsafe { GetExitCodeProcess(handle, &mut code) })?;
    Ok(ExitStatus::Exited(code))
}

/// A created process that has not been waited for.
#[derive(Debug)]
pub struct Process {
    pid: u32,
    handle: OwnedHandle,
}

impl Process {
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn wait(self) -> io::Result<ExitStatus> {
        let status = wait(&self.handle)?;
        debug!(pid = self.pid, %status, "process exited");
        Ok(status)
    }
}

pub(crate) fn spawn_command(command: &Command) -> io::Result<Process> {
    let entries = command
        .envs
        .iter()
        .map(|(name, value)| {
            let mut entry = name.clone();
            entry.push("=");
            entry.push(value);
            entry
        })
        .collect::<Vec<OsString>>();
    let envp = entries
        .iter()
        .map(|entry| entry.as_encoded_bytes())
        .collect::<Vec<_>>();

    let args = [command.program.as_os_str()]
        .into_iter()
        .chain(command.args.iter().map(OsString::as_os_str))
        .map(|arg| arg.as_encoded_bytes())
        .collect::<Vec<_>>();

    let ops = command.fd_map.operations();
    spawn(
        command.program.as_encoded_bytes(),
        &args,
        &envp,
        &ops,
        command.path_resolve,
        command.verbatim_arguments,
    )
}
