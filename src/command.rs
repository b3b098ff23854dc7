use std::{
    collections::HashMap,
    ffi::{OsStr, OsString},
    io,
    sync::{Mutex, PoisonError},
};

use fdspawn_shared::fd_map::FdMap;
use tracing::{debug, instrument};

use crate::{ExitStatus, os_impl};

/// Serializes spawns issued through this crate: the descriptor table is
/// process-wide and a fork must not observe another spawn half-way.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

/// A process builder. The environment starts as a copy of the parent's and
/// descriptors 0, 1 and 2 are passed through.
#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) program: OsString,
    pub(crate) args: Vec<OsString>,
    pub(crate) envs: HashMap<OsString, OsString>,
    #[cfg(unix)]
    pub(crate) arg0: Option<OsString>,
    pub(crate) fd_map: FdMap,
    pub(crate) path_resolve: bool,
    #[cfg(windows)]
    pub(crate) verbatim_arguments: bool,
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: vec![],
            envs: std::env::vars_os().collect(),
            #[cfg(unix)]
            arg0: None,
            fd_map: FdMap::stdio(),
            path_resolve: true,
            #[cfg(windows)]
            verbatim_arguments: false,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Command {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    #[cfg(unix)]
    pub fn arg0<S>(&mut self, arg: S) -> &mut Command
    where
        S: AsRef<OsStr>,
    {
        self.arg0 = Some(arg.as_ref().to_os_string());
        self
    }

    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Command
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .insert(key.as_ref().to_os_string(), val.as_ref().to_os_string());
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Command
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs.extend(
            vars.into_iter()
                .map(|(key, val)| (key.as_ref().to_os_string(), val.as_ref().to_os_string())),
        );
        self
    }

    pub fn env_remove<K: AsRef<OsStr>>(&mut self, key: K) -> &mut Command {
        self.envs.remove(key.as_ref());
        self
    }

    pub fn env_clear(&mut self) -> &mut Command {
        self.envs.clear();
        self
    }

    /// Makes the child's `child_fd` a copy of the parent's `parent_fd`.
    pub fn fd(&mut self, child_fd: i32, parent_fd: i32) -> &mut Command {
        self.fd_map.insert(child_fd, parent_fd);
        self
    }

    /// Leaves `child_fd` closed in the child.
    pub fn close_fd(&mut self, child_fd: i32) -> &mut Command {
        self.fd_map.remove(child_fd);
        self
    }

    /// Replaces the whole descriptor map, including the standard descriptors.
    pub fn fd_map(&mut self, fd_map: FdMap) -> &mut Command {
        self.fd_map = fd_map;
        self
    }

    /// Whether a program name without a directory is looked up in `PATH`. On by default.
    pub fn path_resolve(&mut self, path_resolve: bool) -> &mut Command {
        self.path_resolve = path_resolve;
        self
    }

    /// Passes arguments to the command line as they are, without quoting.
    #[cfg(windows)]
    pub fn verbatim_arguments(&mut self, verbatim: bool) -> &mut Command {
        self.verbatim_arguments = verbatim;
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_fd_map(&self) -> &FdMap {
        &self.fd_map
    }

    #[instrument(level = "debug", skip(self), fields(program = ?self.program, args = self.args.len()))]
    pub fn spawn(&mut self) -> io::Result<Child> {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let process = os_impl::spawn_command(self)?;
        debug!(pid = process.id(), "spawned");
        Ok(Child { process })
    }

    /// Spawns and waits.
    pub fn status(&mut self) -> io::Result<ExitStatus> {
        self.spawn()?.wait()
    }
}

/// A running child. Waiting consumes it: a pid is only valid for one wait.
#[derive(Debug)]
pub struct Child {
    process: os_impl::Process,
}

impl Child {
    pub fn id(&self) -> u32 {
        self.process.id()
    }

    pub fn wait(self) -> io::Result<ExitStatus> {
        self.process.wait()
    }
}
