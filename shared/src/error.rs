use thiserror::Error;

use crate::wtf8::Wtf8Error;

/// Failures of the Windows helper surface.
///
/// All of them happen before any process is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("malformed WTF-8 input: {0}")]
    Wtf8(#[from] Wtf8Error),
    #[error("out of memory while building {0}")]
    OutOfMemory(&'static str),
    /// The length of a required variable changed between measuring and reading it.
    #[error("environment variable {name} changed while it was being read")]
    EnvChanged { name: String },
    /// A descriptor number that cannot exist.
    #[error("descriptor {0} is out of range")]
    BadDescriptor(i32),
    /// More descriptors than the C runtime's inherited-handle buffer can describe.
    #[error("{0} inherited descriptors do not fit in the C runtime handle buffer")]
    TooManyHandles(usize),
    /// An OS call failed with the given native error code.
    #[error("system error {0}")]
    Os(u32),
}
