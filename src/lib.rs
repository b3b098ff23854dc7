//! Spawning a child process with an exactly specified descriptor table.
//!
//! On Unix the child is forked, rewrites its own descriptors, and execs; a
//! close-on-exec pipe tells the parent whether `execve` was reached. On Windows
//! the executable, command line and environment block are computed up front
//! and handed to `CreateProcessW`.

mod command;
mod status;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
use unix as os_impl;

#[cfg(windows)]
use windows as os_impl;

pub use command::{Child, Command};
pub use fdspawn_shared::fd_map::{FdMap, FdMapping, FdOperation};
pub use status::{ExitStatus, SIGNALED_EXIT_CODE};
