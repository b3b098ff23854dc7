use std::fmt;

/// What [`ExitStatus::code`] reports for a child killed by a signal.
///
/// It lies outside `0..=255` so it can never be mistaken for a real exit code.
pub const SIGNALED_EXIT_CODE: u32 = 256;

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Exited normally with this code. Windows codes use the full 32 bits,
    /// e.g. `0xC0000005` for an access violation.
    Exited(u32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// The exit code, or [`SIGNALED_EXIT_CODE`] for a signal-terminated child.
    pub fn code(&self) -> u32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(_) => SIGNALED_EXIT_CODE,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match *self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(signal) => Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitStatus::Exited(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code: {code}"),
            ExitStatus::Signaled(signal) => write!(f, "signal: {signal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(ExitStatus::Exited(3).code(), 3);
        assert_eq!(ExitStatus::Signaled(9).code(), SIGNALED_EXIT_CODE);
        assert_eq!(ExitStatus::Exited(0xC000_0005).code(), 0xC000_0005);
        assert!((0..=255).all(|code| ExitStatus::Exited(code).code() != SIGNALED_EXIT_CODE));
    }

    #[test]
    fn success_only_for_zero() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(0xC000_0005).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::Signaled(0).success());
    }

    #[test]
    fn display() {
        assert_eq!(ExitStatus::Exited(2).to_string(), "exit code: 2");
        assert_eq!(ExitStatus::Signaled(15).to_string(), "signal: 15");
    }
}
