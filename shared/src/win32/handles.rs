//! The buffer through which the Microsoft C runtime passes descriptors to a child.
//!
//! `STARTUPINFOW::lpReserved2` points at
//!
//! ```text
//! int    count;
//! u8     flags[count];
//! HANDLE handles[count];
//! ```
//!
//! packed without padding. A child built on the C runtime opens descriptor `i`
//! on `handles[i]` at startup if `flags[i]` has `FOPEN` set. `cbReserved2` is a
//! 16-bit size, which caps how many descriptors fit.

use std::mem::size_of;

use crate::Error;

pub const FOPEN: u8 = 0x01;
pub const FPIPE: u8 = 0x08;
pub const FDEV: u8 = 0x40;

/// `INVALID_HANDLE_VALUE` as a raw integer.
pub const INVALID_HANDLE: usize = usize::MAX;

/// A handle the child should see as an open descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritedHandle {
    pub flags: u8,
    pub handle: usize,
}

/// Byte size of a buffer describing `count` descriptors.
pub const fn buffer_len(count: usize) -> usize {
    size_of::<i32>() + count + count * size_of::<usize>()
}

/// Largest descriptor count whose buffer still fits `cbReserved2`.
pub const fn max_handles() -> usize {
    (u16::MAX as usize - size_of::<i32>()) / (1 + size_of::<usize>())
}

/// Number of slots needed to describe the descriptors `fds`: one per
/// descriptor up to the highest.
///
/// Checked before anything is allocated: a negative descriptor is
/// [`Error::BadDescriptor`] and a count past [`max_handles`] is
/// [`Error::TooManyHandles`].
pub fn slot_count(fds: impl IntoIterator<Item = i32>) -> Result<usize, Error> {
    let mut count = 0;
    for fd in fds {
        let slot = usize::try_from(fd).map_err(|_| Error::BadDescriptor(fd))?;
        count = count.max(slot + 1);
    }
    if count > max_handles() {
        return Err(Error::TooManyHandles(count));
    }
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildHandleBuffer {
    bytes: Vec<u8>,
}

impl ChildHandleBuffer {
    /// Lays out `slots`, where index `i` describes descriptor `i`.
    ///
    /// Empty slots get flags `0` and [`INVALID_HANDLE`]. Fails with
    /// [`Error::TooManyHandles`] if the buffer would not fit in 16 bits.
    pub fn new(slots: &[Option<InheritedHandle>]) -> Result<Self, Error> {
        let count = slots.len();
        if count > max_handles() {
            return Err(Error::TooManyHandles(count));
        }
        let count_field = i32::try_from(count).map_err(|_| Error::TooManyHandles(count))?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(buffer_len(count))
            .map_err(|_| Error::OutOfMemory("inherited handle buffer"))?;
        bytes.extend_from_slice(&count_field.to_ne_bytes());
        bytes.extend(slots.iter().map(|slot| slot.map_or(0, |slot| slot.flags)));
        for slot in slots {
            let handle = slot.map_or(INVALID_HANDLE, |slot| slot.handle);
            bytes.extend_from_slice(&handle.to_ne_bytes());
        }
        debug_assert_eq!(bytes.len(), buffer_len(count));
        Ok(Self { bytes })
    }

    #[cfg(test)]
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// The value for `cbReserved2`.
    pub fn reserved_len(&self) -> u16 {
        // bounded by `max_handles` in `new`
        self.bytes.len() as u16
    }
}
