//! The parts of Windows process creation that the OS leaves to the caller:
//! finding the executable, flattening the argument list into one command line,
//! building the environment block, and laying out inherited C-runtime handles.
//!
//! Strings are UTF-16 code unit slices without a trailing nul unless stated
//! otherwise.

pub mod env;
pub mod handles;
pub mod path;
pub mod quote;

pub(crate) const fn wide(c: char) -> u16 {
    c as u16
}

pub(crate) fn is_separator(c: u16) -> bool {
    c == wide('\\') || c == wide('/')
}

#[cfg(test)]
pub(crate) mod test_util {
    pub fn w(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    pub fn s(wide: &[u16]) -> String {
        String::from_utf16_lossy(wide)
    }
}
