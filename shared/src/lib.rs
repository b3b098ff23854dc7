//! Platform-neutral pieces of `fdspawn`.
//!
//! Everything in here is plain data manipulation, so the Windows helpers are
//! built and tested on every host. The OS is reached only through the
//! [`win32::path::ExeProbe`] and [`win32::env::EnvSource`] traits.

pub mod error;
pub mod fd_map;
pub mod terminated;
pub mod win32;
pub mod wtf8;

pub use error::Error;
