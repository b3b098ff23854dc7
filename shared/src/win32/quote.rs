//! Flattening an argument list into the single command line `CreateProcessW` takes.
//!
//! The quoting is the inverse of the Microsoft C runtime's argument splitting:
//! backslashes are literal unless they precede a `"`, where `2n` backslashes
//! yield `n` and toggle quoting, and `2n + 1` yield `n` and a literal `"`.

use super::wide;
use crate::{Error, wtf8};

fn needs_quotes(arg: &[u16]) -> bool {
    arg.iter()
        .any(|c| *c == wide(' ') || *c == wide('\t') || *c == wide('"'))
}

fn needs_escapes(arg: &[u16]) -> bool {
    arg.iter().any(|c| *c == wide('"') || *c == wide('\\'))
}

/// Upper bound of what [`quote_into`] appends for `len` input units.
fn quoted_capacity(len: usize) -> usize {
    len * 2 + 2
}

/// Appends the quoted form of `arg` to `target`.
pub fn quote_into(arg: &[u16], verbatim: bool, target: &mut Vec<u16>) {
    if verbatim {
        target.extend_from_slice(arg);
        return;
    }
    if arg.is_empty() {
        target.extend_from_slice(&[wide('"'), wide('"')]);
        return;
    }
    if !needs_quotes(arg) {
        target.extend_from_slice(arg);
        return;
    }
    if !needs_escapes(arg) {
        target.push(wide('"'));
        target.extend_from_slice(arg);
        target.push(wide('"'));
        return;
    }

    // Built back to front: a backslash is doubled only while every unit after
    // it up to a quote (or the closing quote) is also a backslash.
    target.push(wide('"'));
    let start = target.len();
    let mut quote_hit = true;
    for &c in arg.iter().rev() {
        target.push(c);
        if quote_hit && c == wide('\\') {
            target.push(wide('\\'));
        } else if c == wide('"') {
            quote_hit = true;
            target.push(wide('\\'));
        } else {
            quote_hit = false;
        }
    }
    target[start..].reverse();
    target.push(wide('"'));
}

/// Returns the quoted form of `arg`.
///
/// ```
/// use fdspawn_shared::win32::quote::quote;
///
/// let w = |s: &str| s.encode_utf16().collect::<Vec<u16>>();
/// assert_eq!(quote(&w(r#"hello"world"#), false), w(r#""hello\"world""#));
/// assert_eq!(quote(&w(r"hello\world"), false), w(r"hello\world"));
/// assert_eq!(quote(&w(r"a b"), true), w(r"a b"));
/// ```
pub fn quote(arg: &[u16], verbatim: bool) -> Vec<u16> {
    let mut quoted = Vec::with_capacity(quoted_capacity(arg.len()));
    quote_into(arg, verbatim, &mut quoted);
    quoted
}

/// Converts each WTF-8 argument, quotes it, and joins the results with spaces.
///
/// The returned line is nul-terminated. It is allocated once, sized for the
/// worst case, after all arguments have been validated.
pub fn build_argument_line<A: AsRef<[u8]>>(args: &[A], verbatim: bool) -> Result<Vec<u16>, Error> {
    let mut total = 0usize;
    for arg in args {
        total += wtf8::utf16_len(arg.as_ref())?;
    }

    let mut line = Vec::new();
    line.try_reserve_exact(total * 2 + args.len() * 3 + 1)
        .map_err(|_| Error::OutOfMemory("command line"))?;

    let mut scratch = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            line.push(wide(' '));
        }
        scratch.clear();
        wtf8::encode_utf16(arg.as_ref(), &mut scratch)?;
        quote_into(&scratch, verbatim, &mut line);
    }
    line.push(0);
    Ok(line)
}
