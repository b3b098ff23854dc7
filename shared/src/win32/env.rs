//! Environment blocks for `CreateProcessW`.
//!
//! A child started with an arbitrary environment may be missing variables
//! Windows components expect (`SYSTEMROOT` in particular breaks Winsock). The
//! builder splices those in from the parent's environment unless the caller
//! already provided them.

use std::cmp::Ordering;

use super::wide;
use crate::{Error, wtf8};

/// Variables every child gets, sorted by their uppercase form.
pub static REQUIRED_VARS: [&str; 11] = [
    "HOMEDRIVE",
    "HOMEPATH",
    "LOGONSERVER",
    "PATH",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERDOMAIN",
    "USERNAME",
    "USERPROFILE",
    "WINDIR",
];

/// Access to the parent's environment and to the comparison Windows uses for names.
pub trait EnvSource {
    /// The current value of `name`, or `None` if it is unset.
    fn var(&self, name: &[u16]) -> Result<Option<Vec<u16>>, Error>;

    /// Locale-invariant uppercase form of `name`.
    ///
    /// The default is [`simple_uppercase`].
    fn to_upper(&self, name: &[u16]) -> Vec<u16> {
        simple_uppercase(name)
    }
}

/// Maps each BMP unit that has a single-unit uppercase form and leaves
/// everything else alone.
pub fn simple_uppercase(name: &[u16]) -> Vec<u16> {
    name.iter().copied().map(upper_unit).collect()
}

fn upper_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if u32::from(u) <= 0xFFFF => u as u16,
        _ => unit,
    }
}

/// The part of a `NAME=VALUE` entry before the first `=`.
pub fn entry_name(entry: &[u16]) -> Option<&[u16]> {
    let eq = entry.iter().position(|c| *c == wide('='))?;
    Some(&entry[..eq])
}

struct SortedEntry {
    key: Vec<u16>,
    entry: Vec<u16>,
}

/// Builds a double-nul-terminated environment block from WTF-8 `NAME=VALUE` entries.
///
/// Entries without `=` are dropped. The rest are sorted by uppercase name
/// (stable, so duplicates keep their relative order), and each variable of
/// [`REQUIRED_VARS`] the caller did not set is inserted at its sorted position
/// with its value from `source`, if it has a non-empty one there. An empty
/// block is `[0, 0]`.
pub fn build_env_block<E: AsRef<[u8]>>(
    vars: &[E],
    source: &impl EnvSource,
) -> Result<Vec<u16>, Error> {
    let mut sorted = Vec::new();
    sorted
        .try_reserve_exact(vars.len())
        .map_err(|_| Error::OutOfMemory("environment list"))?;
    for var in vars {
        let entry = wtf8::to_utf16(var.as_ref())?;
        let Some(name) = entry_name(&entry) else {
            continue;
        };
        let key = source.to_upper(name);
        sorted.push(SortedEntry { key, entry });
    }
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let mut merged: Vec<Vec<u16>> = Vec::new();
    let mut caller = sorted.into_iter().peekable();
    let mut required = REQUIRED_VARS.iter().peekable();
    loop {
        let order = match (caller.peek(), required.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(var), Some(name)) => var.key.as_slice().cmp(&wide_str(name)[..]),
        };
        match order {
            Ordering::Less => merged.extend(caller.next().map(|var| var.entry)),
            Ordering::Equal => {
                // caller duplicates of this name now compare Less against the next one
                merged.extend(caller.next().map(|var| var.entry));
                required.next();
            }
            Ordering::Greater => {
                let Some(name) = required.next() else { break };
                let name = wide_str(name);
                if let Some(value) = source.var(&name)?.filter(|value| !value.is_empty()) {
                    let mut entry = name;
                    entry.push(wide('='));
                    entry.extend_from_slice(&value);
                    merged.push(entry);
                }
            }
        }
    }

    let len = merged.iter().map(|entry| entry.len() + 1).sum::<usize>() + 1;
    let mut block = Vec::new();
    block
        .try_reserve_exact(len.max(2))
        .map_err(|_| Error::OutOfMemory("environment block"))?;
    for entry in &merged {
        block.extend_from_slice(entry);
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

fn wide_str(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}
