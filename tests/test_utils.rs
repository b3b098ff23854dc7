use std::{
    fs::File,
    io::{self, Read as _},
    os::fd::OwnedFd,
};

use fdspawn::Command;

/// A [`Command`] that re-runs this test binary and executes `$body` in it
/// (from a constructor, before `main`), then exits with status 0.
macro_rules! child_command {
    ($body: block) => {{
        const ID: &str = ::core::concat!(
            ::core::file!(),
            ":",
            ::core::line!(),
            ":",
            ::core::column!()
        );
        #[ctor::ctor]
        unsafe fn init() {
            let mut args = ::std::env::args();
            let Some(_) = args.next() else {
                return;
            };
            let Some(current_id) = args.next() else {
                return;
            };
            if current_id == ID {
                $body;
                ::std::process::exit(0);
            }
        }
        $crate::test_utils::command_with_id(ID)
    }};
}

pub(crate) use child_command;

pub fn command_with_id(id: &str) -> io::Result<Command> {
    let mut command = Command::new(::std::env::current_exe()?);
    command.arg(id);
    Ok(command)
}

/// Descriptors open in the calling process.
#[allow(dead_code)]
pub fn open_fds() -> Vec<i32> {
    (0..1024)
        .filter(|fd| unsafe { libc::fcntl(*fd, libc::F_GETFD) } != -1)
        .collect()
}

#[allow(dead_code)]
pub fn read_all(fd: OwnedFd) -> io::Result<String> {
    let mut content = String::new();
    File::from(fd).read_to_string(&mut content)?;
    Ok(content)
}
