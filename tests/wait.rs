#![cfg(unix)]

mod test_utils;

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use fdspawn::{Command, ExitStatus, SIGNALED_EXIT_CODE, unix::raw};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use test_log::test;
use test_utils::child_command;

fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    command
}

#[test]
fn exit_codes() -> io::Result<()> {
    for code in 0..=255 {
        let status = sh(&format!("exit {code}")).status()?;
        assert_eq!(status, ExitStatus::Exited(code));
        assert_eq!(status.code(), code);
    }
    Ok(())
}

#[test]
fn exit_code_from_child_body() -> io::Result<()> {
    let status = child_command!({
        std::process::exit(17);
    })?
    .status()?;
    assert_eq!(status.code(), 17);
    Ok(())
}

#[test]
fn signaled_child_reports_sentinel() -> io::Result<()> {
    let status = sh("kill -9 $$").status()?;
    assert_eq!(status, ExitStatus::Signaled(Signal::SIGKILL as i32));
    assert_eq!(status.code(), SIGNALED_EXIT_CODE);
    assert!(!status.success());
    Ok(())
}

#[test]
fn raw_wait_reports_sentinel() -> io::Result<()> {
    let child = sh("kill -TERM $$").spawn()?;
    // `raw::wait` reaps it, so the `Child` handle is never waited
    let pid = child.id() as i32;
    assert_eq!(raw::wait(pid), Ok(SIGNALED_EXIT_CODE as i32));
    Ok(())
}

#[test]
fn stops_are_not_terminal() -> io::Result<()> {
    let child = sh("kill -STOP $$; exit 7").spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let done = Arc::new(AtomicBool::new(false));
    let resumer = thread::spawn({
        let done = Arc::clone(&done);
        move || {
            while !done.load(Ordering::Acquire) {
                let _ = kill(pid, Signal::SIGCONT);
                thread::sleep(Duration::from_millis(20));
            }
        }
    });

    let status = child.wait();
    done.store(true, Ordering::Release);
    resumer.join().unwrap();
    assert_eq!(status?, ExitStatus::Exited(7));
    Ok(())
}
