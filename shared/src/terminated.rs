//! Iterators over sentinel-terminated lists handed over by C-style callers.
//!
//! The fd pair list on the wire ends with `-1`; these iterators stop at the
//! sentinel so nothing past them walks raw pointers. `argv` and `envp` are
//! handed to `execve` as they are and never walked.
//!
//! Constructing any of these from a list that lacks its sentinel is undefined
//! behavior: the iterator will read past the end of the allocation.

use std::{iter::FusedIterator, marker::PhantomData, ptr::NonNull};

use crate::fd_map::FdMapping;

pub trait HasTerminator: PartialEq {
    const TERMINATOR: Self;
}
impl HasTerminator for i32 {
    const TERMINATOR: i32 = -1;
}

pub struct Terminated<'a, T>(NonNull<T>, PhantomData<&'a [T]>);

impl<'a, T> Clone for Terminated<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T> Copy for Terminated<'a, T> {}

impl<'a, T: HasTerminator> Iterator for Terminated<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let element = unsafe { self.0.as_ref() };
        if element.eq(&T::TERMINATOR) {
            return None;
        }
        self.0 = unsafe { self.0.add(1) };
        Some(element)
    }
}
impl<'a, T: HasTerminator> FusedIterator for Terminated<'a, T> {}

impl<'a, T: HasTerminator> Terminated<'a, T> {
    /// # Safety
    /// `ptr` must be non-null and point to a list ending with `T::TERMINATOR`
    /// that stays alive and unmodified for `'a`.
    pub const unsafe fn from_ptr(ptr: *const T) -> Self {
        Terminated(unsafe { NonNull::new_unchecked(ptr.cast_mut()) }, PhantomData)
    }

    pub fn as_ptr(self) -> *const T {
        self.0.as_ptr()
    }
}

/// Iterator over a `-1`-terminated list of `(src, dst)` pairs.
#[derive(Clone, Copy)]
pub struct FdPairs<'a>(Terminated<'a, i32>);

impl<'a> FdPairs<'a> {
    /// # Safety
    /// `fd_map` must be non-null and hold complete pairs followed by a single
    /// `-1` in the position of the next `src`.
    pub const unsafe fn from_ptr(fd_map: *const i32) -> Self {
        Self(unsafe { Terminated::from_ptr(fd_map) })
    }
}

impl<'a> Iterator for FdPairs<'a> {
    type Item = FdMapping;

    fn next(&mut self) -> Option<Self::Item> {
        let src = *self.0.next()?;
        // dst of a complete pair is never the sentinel position
        let dst = unsafe { *self.0.as_ptr() };
        self.0 = unsafe { Terminated::from_ptr(self.0.as_ptr().add(1)) };
        Some(FdMapping { src, dst })
    }
}
impl<'a> FusedIterator for FdPairs<'a> {}
