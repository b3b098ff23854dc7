//! WTF-8 → UTF-16.
//!
//! Decoding is deliberately loose: surrogate code points encoded as three-byte
//! sequences are accepted (that is what makes it WTF-8), and so are overlong
//! three- and four-byte forms. Only stray continuation bytes, broken
//! sequences and code points above `0x10FFFF` are rejected.
//!
//! [`utf16_len`] and [`encode_utf16`] walk the input identically, so a buffer
//! sized by the former is filled exactly by the latter.

use thiserror::Error;

use crate::Error as CrateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Wtf8Error {
    #[error("unexpected continuation byte at offset {offset}")]
    UnexpectedContinuation { offset: usize },
    #[error("incomplete multi-byte sequence at offset {offset}")]
    IncompleteSequence { offset: usize },
    #[error("code point above U+10FFFF at offset {offset}")]
    OutOfRange { offset: usize },
}

const MAX_CODE_POINT: u32 = 0x10FFFF;

fn continuation(input: &[u8], start: usize, index: usize) -> Result<u32, Wtf8Error> {
    match input.get(index) {
        Some(b) if b & 0xC0 == 0x80 => Ok(u32::from(b & 0x3F)),
        _ => Err(Wtf8Error::IncompleteSequence { offset: start }),
    }
}

/// Decodes the code point starting at `input[start]`.
///
/// Returns the code point and the number of bytes it occupied.
pub fn decode_code_point(input: &[u8], start: usize) -> Result<(u32, usize), Wtf8Error> {
    let b1 = input[start];
    if b1 <= 0x7F {
        return Ok((u32::from(b1), 1));
    }
    if b1 < 0xC2 {
        return Err(Wtf8Error::UnexpectedContinuation { offset: start });
    }
    let mut code_point = u32::from(b1);

    code_point = (code_point << 6) | continuation(input, start, start + 1)?;
    if b1 <= 0xDF {
        return Ok((code_point & 0x7FF, 2));
    }

    code_point = (code_point << 6) | continuation(input, start, start + 2)?;
    if b1 <= 0xEF {
        return Ok((code_point & 0xFFFF, 3));
    }

    code_point = (code_point << 6) | continuation(input, start, start + 3)?;
    if b1 <= 0xF4 {
        code_point &= 0x1FFFFF;
        if code_point <= MAX_CODE_POINT {
            return Ok((code_point, 4));
        }
    }
    Err(Wtf8Error::OutOfRange { offset: start })
}

/// Iterator over the code points of a WTF-8 byte string.
#[derive(Debug, Clone)]
pub struct CodePoints<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> CodePoints<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }
}

impl Iterator for CodePoints<'_> {
    type Item = Result<u32, Wtf8Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.input.len() {
            return None;
        }
        match decode_code_point(self.input, self.pos) {
            Ok((code_point, len)) => {
                self.pos += len;
                Some(Ok(code_point))
            }
            Err(err) => {
                self.pos = self.input.len();
                Some(Err(err))
            }
        }
    }
}

fn units(code_point: u32) -> usize {
    if code_point > 0xFFFF { 2 } else { 1 }
}

/// Number of UTF-16 code units `input` encodes to, without allocating.
pub fn utf16_len(input: &[u8]) -> Result<usize, Wtf8Error> {
    CodePoints::new(input).try_fold(0usize, |len, code_point| Ok(len + units(code_point?)))
}

/// Appends the UTF-16 form of `input` to `target`. Returns the number of units written.
///
/// Nothing is appended if `input` is malformed.
pub fn encode_utf16(input: &[u8], target: &mut Vec<u16>) -> Result<usize, Wtf8Error> {
    let len = utf16_len(input)?;
    target.reserve(len);
    let before = target.len();
    for code_point in CodePoints::new(input) {
        push_code_point(code_point?, target);
    }
    debug_assert_eq!(target.len() - before, len);
    Ok(len)
}

/// Appends one code point, splitting it into a surrogate pair when needed.
pub fn push_code_point(code_point: u32, target: &mut Vec<u16>) {
    if code_point > 0xFFFF {
        let offset = code_point - 0x10000;
        target.push(((offset >> 10) + 0xD800) as u16);
        target.push(((offset & 0x3FF) + 0xDC00) as u16);
    } else {
        target.push(code_point as u16);
    }
}

/// Measures, allocates exactly, then encodes.
pub fn to_utf16(input: &[u8]) -> Result<Vec<u16>, CrateError> {
    let len = utf16_len(input)?;
    let mut wide = Vec::new();
    wide.try_reserve_exact(len)
        .map_err(|_| CrateError::OutOfMemory("UTF-16 string"))?;
    for code_point in CodePoints::new(input) {
        push_code_point(code_point?, &mut wide);
    }
    debug_assert_eq!(wide.len(), len);
    Ok(wide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii() {
        assert_eq!(to_utf16(b"abc").unwrap(), vec![0x61, 0x62, 0x63]);
        assert_eq!(to_utf16(b"").unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn multi_byte() {
        let s = "é€😀";
        assert_eq!(
            to_utf16(s.as_bytes()).unwrap(),
            s.encode_utf16().collect::<Vec<_>>()
        );
        assert_eq!(utf16_len(s.as_bytes()), Ok(4));
    }

    #[test]
    fn first_supplementary_code_point_is_a_pair() {
        let s = "\u{10000}";
        assert_eq!(to_utf16(s.as_bytes()).unwrap(), vec![0xD800, 0xDC00]);
    }

    #[test]
    fn lone_surrogate_is_accepted() {
        // U+D800 encoded as if it were a scalar value
        assert_eq!(to_utf16(&[0xED, 0xA0, 0x80]).unwrap(), vec![0xD800]);
    }

    #[test]
    fn stray_continuation() {
        assert_eq!(
            utf16_len(b"a\x80"),
            Err(Wtf8Error::UnexpectedContinuation { offset: 1 })
        );
        assert_eq!(
            utf16_len(&[0xC0, 0x80]),
            Err(Wtf8Error::UnexpectedContinuation { offset: 0 })
        );
    }

    #[test]
    fn truncated() {
        assert_eq!(
            utf16_len(&[b'x', 0xE2, 0x82]),
            Err(Wtf8Error::IncompleteSequence { offset: 1 })
        );
        assert_eq!(
            utf16_len(&[0xC3, b'A']),
            Err(Wtf8Error::IncompleteSequence { offset: 0 })
        );
    }

    #[test]
    fn too_large() {
        assert_eq!(
            utf16_len(&[0xF4, 0x90, 0x80, 0x80]),
            Err(Wtf8Error::OutOfRange { offset: 0 })
        );
        assert_eq!(
            utf16_len(&[0xF5, 0x80, 0x80, 0x80]),
            Err(Wtf8Error::OutOfRange { offset: 0 })
        );
    }

    #[test]
    fn malformed_input_appends_nothing() {
        let mut target = vec![1u16];
        assert!(encode_utf16(b"ok\xFF", &mut target).is_err());
        assert_eq!(target, vec![1]);
    }

    proptest! {
        #[test]
        fn measure_agrees_with_encode(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(len) = utf16_len(&bytes) {
                let mut target = Vec::new();
                prop_assert_eq!(encode_utf16(&bytes, &mut target), Ok(len));
                prop_assert_eq!(target.len(), len);
            }
        }

        #[test]
        fn valid_utf8_matches_std(s in "\\PC*") {
            prop_assert_eq!(to_utf16(s.as_bytes()).unwrap(), s.encode_utf16().collect::<Vec<_>>());
        }
    }
}
