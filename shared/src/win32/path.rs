//! Executable lookup with `cmd.exe` semantics, minus `PATHEXT`.
//!
//! `CreateProcessW` can only start `.com` and `.exe` images, so those are the
//! only extensions ever appended. Rules:
//!
//! - A name that already contains a directory (relative or absolute) is only
//!   tried at that location; `PATH` is not consulted.
//! - A bare name is looked up in the current directory first (unless the OS
//!   says not to), then in every `PATH` entry in order.
//! - If the name has an extension, it is tried as-is before appending `.com`
//!   and then `.exe`.
//! - `PATH` entries may be relative to `cwd`, may or may not end with a
//!   separator, and may be wrapped in one level of `"` or `'`. Whitespace is
//!   not trimmed.
//! - Directories are never a match, and the first existing file wins: a file
//!   that later fails to start does not resume the search.
//!
//! UNC paths are accepted both in `PATH` and in the name.

use super::{is_separator, wide};

/// Filesystem queries the resolver needs.
pub trait ExeProbe {
    /// Whether `path` names an existing file that is not a directory.
    fn is_file(&self, path: &[u16]) -> bool;

    /// Whether the bare name `file` should be looked up in the current directory before `PATH`.
    fn search_current_dir(&self, file: &[u16]) -> bool;
}

fn is_dir_end(c: u16) -> bool {
    is_separator(c) || c == wide(':')
}

fn is_quote(c: u16) -> bool {
    c == wide('"') || c == wide('\'')
}

fn same_drive(a: &[u16], b: &[u16]) -> bool {
    a.iter()
        .zip(b)
        .all(|(a, b)| fold_ascii(*a) == fold_ascii(*b))
}

fn fold_ascii(c: u16) -> u16 {
    if (u16::from(b'A')..=u16::from(b'Z')).contains(&c) {
        c + 32
    } else {
        c
    }
}

/// Combines `cwd`, `dir`, `name` and `ext` into the path to probe.
fn join_candidate(dir: &[u16], name: &[u16], ext: &[u16], cwd: &[u16]) -> Vec<u16> {
    let mut dir = dir;
    let mut cwd_len = cwd.len();

    if dir.len() > 2 && is_separator(dir[0]) && is_separator(dir[1]) {
        // UNC
        cwd_len = 0;
    } else if dir.first().is_some_and(|c| is_separator(*c)) {
        // rooted without a drive letter: borrow cwd's drive
        cwd_len = cwd_len.min(2);
    } else if dir.len() >= 2
        && dir[1] == wide(':')
        && (dir.len() < 3 || !is_separator(dir[2]))
    {
        // drive-relative, e.g. D:..\bin
        if cwd.len() < 2 || !same_drive(&cwd[..2], &dir[..2]) {
            cwd_len = 0;
        } else {
            dir = &dir[2..];
        }
    } else if dir.len() > 2 && dir[1] == wide(':') {
        // drive-absolute
        cwd_len = 0;
    }

    let mut result = Vec::with_capacity(cwd_len + 1 + dir.len() + 1 + name.len() + 1 + ext.len());
    result.extend_from_slice(&cwd[..cwd_len]);
    if cwd_len > 0 && !result.last().copied().is_some_and(is_dir_end) {
        result.push(wide('\\'));
    }

    result.extend_from_slice(dir);
    if !dir.is_empty() && !result.last().copied().is_some_and(is_dir_end) {
        result.push(wide('\\'));
    }

    result.extend_from_slice(name);
    if !ext.is_empty() {
        if !name.is_empty() && result.last() != Some(&wide('.')) {
            result.push(wide('.'));
        }
        result.extend_from_slice(ext);
    }
    result
}

const COM: &[u16] = &[wide('c'), wide('o'), wide('m')];
const EXE: &[u16] = &[wide('e'), wide('x'), wide('e')];

/// Tries the name's own extension, then `.com`, then `.exe` in one directory.
fn probe_dir(
    probe: &impl ExeProbe,
    dir: &[u16],
    name: &[u16],
    cwd: &[u16],
    name_has_ext: bool,
) -> Option<Vec<u16>> {
    let own_ext: Option<&[u16]> = if name_has_ext { Some(&[]) } else { None };
    own_ext
        .into_iter()
        .chain([COM, EXE])
        .map(|ext| join_candidate(dir, name, ext, cwd))
        .find(|candidate| probe.is_file(candidate))
}

/// Yields the directories of a `;`-separated search list.
///
/// One level of quoting is honored around an entry, and zero-length entries
/// are skipped.
pub fn split_path_list(path: &[u16]) -> impl Iterator<Item = &[u16]> {
    let mut dir_end = 0usize;
    std::iter::from_fn(move || {
        loop {
            if dir_end >= path.len() {
                return None;
            }
            // skip the separator the previous slice stopped at
            if dir_end != 0 || path[0] == wide(';') {
                dir_end += 1;
            }
            let dir_start = dir_end;

            if let Some(&quote) = path.get(dir_start).filter(|c| is_quote(**c)) {
                dir_end = path[dir_start + 1..]
                    .iter()
                    .position(|c| *c == quote)
                    .map_or(path.len(), |i| dir_start + 1 + i);
            }
            dir_end = path[dir_end.min(path.len())..]
                .iter()
                .position(|c| *c == wide(';'))
                .map_or(path.len(), |i| dir_end + i);

            let mut dir = &path[dir_start.min(path.len())..dir_end];
            if dir.first().copied().is_some_and(is_quote) {
                dir = &dir[1..];
            }
            if dir.last().copied().is_some_and(is_quote) {
                dir = &dir[..dir.len() - 1];
            }
            if dir.is_empty() {
                continue;
            }
            return Some(dir);
        }
    })
}

/// Finds the executable `file` would start, relative to `cwd` and the `path` search list.
///
/// Returns `None` for an empty name, for `.`, and when no candidate exists.
pub fn search_path(
    probe: &impl ExeProbe,
    file: &[u16],
    cwd: &[u16],
    path: Option<&[u16]>,
) -> Option<Vec<u16>> {
    if file.is_empty() || file == [wide('.')] {
        return None;
    }

    let name_start = file
        .iter()
        .rposition(|c| is_dir_end(*c))
        .map_or(0, |i| i + 1);
    let (dir, name) = file.split_at(name_start);

    // only the first dot counts, and it must be followed by something
    let name_has_ext = name
        .iter()
        .position(|c| *c == wide('.'))
        .is_some_and(|dot| dot + 1 < name.len());

    if !dir.is_empty() {
        return probe_dir(probe, dir, name, cwd, name_has_ext);
    }

    if probe.search_current_dir(file) {
        if let Some(found) = probe_dir(probe, &[], file, cwd, name_has_ext) {
            return Some(found);
        }
    }

    split_path_list(path.unwrap_or_default())
        .find_map(|dir| probe_dir(probe, dir, file, cwd, name_has_ext))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::BTreeSet};

    use super::*;
    use crate::win32::test_util::{s, w};

    #[derive(Default)]
    struct FakeFs {
        files: BTreeSet<String>,
        dirs: BTreeSet<String>,
        skip_cwd: bool,
        probed: RefCell<Vec<String>>,
    }

    impl FakeFs {
        fn with_files(files: &[&str]) -> Self {
            Self {
                files: files.iter().map(|f| f.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl ExeProbe for FakeFs {
        fn is_file(&self, path: &[u16]) -> bool {
            let path = s(path);
            self.probed.borrow_mut().push(path.clone());
            self.files.contains(&path) && !self.dirs.contains(&path)
        }

        fn search_current_dir(&self, _file: &[u16]) -> bool {
            !self.skip_cwd
        }
    }

    fn search(fs: &FakeFs, file: &str, cwd: &str, path: Option<&str>) -> Option<String> {
        let path = path.map(w);
        search_path(fs, &w(file), &w(cwd), path.as_deref()).map(|found| s(&found))
    }

    #[test]
    fn empty_and_dot_are_rejected() {
        let fs = FakeFs::with_files(&[r"C:\cwd\.exe"]);
        assert_eq!(search(&fs, "", r"C:\cwd", Some(r"C:\bin")), None);
        assert_eq!(search(&fs, ".", r"C:\cwd", Some(r"C:\bin")), None);
        assert!(fs.probed.borrow().is_empty());
    }

    #[test]
    fn cwd_before_path() {
        let fs = FakeFs::with_files(&[r"C:\cwd\tool.exe", r"C:\bin\tool.exe"]);
        assert_eq!(
            search(&fs, "tool", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\cwd\tool.exe")
        );
    }

    #[test]
    fn cwd_skipped_when_disabled() {
        let mut fs = FakeFs::with_files(&[r"C:\cwd\tool.exe", r"C:\bin\tool.exe"]);
        fs.skip_cwd = true;
        assert_eq!(
            search(&fs, "tool", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\bin\tool.exe")
        );
    }

    #[test]
    fn own_extension_then_com_then_exe() {
        let fs = FakeFs::with_files(&[r"C:\bin\run.cmd.com", r"C:\bin\run.cmd"]);
        assert_eq!(
            search(&fs, "run.cmd", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\bin\run.cmd")
        );
        assert_eq!(
            fs.probed.borrow().as_slice(),
            [r"C:\cwd\run.cmd", r"C:\cwd\run.cmd.com", r"C:\cwd\run.cmd.exe", r"C:\bin\run.cmd"]
        );

        let fs = FakeFs::with_files(&[r"C:\bin\app.com", r"C:\bin\app.exe"]);
        assert_eq!(
            search(&fs, "app", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\bin\app.com")
        );
    }

    #[test]
    fn trailing_dot_is_not_an_extension() {
        let fs = FakeFs::with_files(&[r"C:\bin\app.", r"C:\bin\app.exe"]);
        assert_eq!(
            search(&fs, "app.", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\bin\app.exe")
        );
    }

    #[test]
    fn directory_is_never_a_match() {
        let mut fs = FakeFs::with_files(&[r"C:\bin\tool.exe"]);
        fs.dirs.insert(r"C:\bin\tool.exe".to_string());
        assert_eq!(search(&fs, "tool", r"C:\cwd", Some(r"C:\bin")), None);
    }

    #[test]
    fn name_with_dir_ignores_path() {
        let fs = FakeFs::with_files(&[r"C:\bin\sub\tool.exe", r"C:\cwd\sub\tool.exe"]);
        assert_eq!(
            search(&fs, r"sub\tool", r"C:\cwd", Some(r"C:\bin")).as_deref(),
            Some(r"C:\cwd\sub\tool.exe")
        );
        assert!(fs.probed.borrow().iter().all(|p| p.starts_with(r"C:\cwd")));
    }

    #[test]
    fn path_entries_quoted_and_empty() {
        let fs = FakeFs::with_files(&[r"D:\my tools\tool.exe"]);
        assert_eq!(
            search(&fs, "tool", r"C:\cwd", Some(r#";;"C:\x;y";'D:\my tools\'"#)).as_deref(),
            Some(r"D:\my tools\tool.exe")
        );
        // the quoted entry keeps its `;` and the empty entries are never probed
        assert!(fs.probed.borrow().iter().any(|p| p == r"C:\x;y\tool.com"));
        assert!(!fs.probed.borrow().iter().any(|p| p == r"C:\cwd\\tool.com"));
    }

    #[test]
    fn relative_path_entry_uses_cwd() {
        let fs = FakeFs::with_files(&[r"C:\cwd\bin\tool.exe"]);
        assert_eq!(
            search(&fs, "tool", r"C:\cwd\", Some("bin")).as_deref(),
            Some(r"C:\cwd\bin\tool.exe")
        );
    }

    #[test]
    fn no_path_at_all() {
        let fs = FakeFs::with_files(&[r"C:\bin\tool.exe"]);
        assert_eq!(search(&fs, "tool", r"C:\cwd", None), None);
    }

    #[test]
    fn join_unc_ignores_cwd() {
        let joined = join_candidate(&w(r"\\server\share"), &w("a"), &w("exe"), &w(r"C:\cwd"));
        assert_eq!(s(&joined), r"\\server\share\a.exe");
    }

    #[test]
    fn join_rooted_borrows_drive() {
        let joined = join_candidate(&w(r"\tools"), &w("a"), &[], &w(r"E:\cwd"));
        assert_eq!(s(&joined), r"E:\tools\a");
    }

    #[test]
    fn join_drive_relative() {
        let same = join_candidate(&w(r"c:bin"), &w("a"), &[], &w(r"C:\cwd"));
        assert_eq!(s(&same), r"C:\cwd\bin\a");
        let other = join_candidate(&w(r"D:bin"), &w("a"), &[], &w(r"C:\cwd"));
        assert_eq!(s(&other), r"D:bin\a");
    }

    #[test]
    fn join_drive_absolute_ignores_cwd() {
        let joined = join_candidate(&w(r"D:\bin/"), &w("a"), &w("com"), &w(r"C:\cwd"));
        assert_eq!(s(&joined), r"D:\bin/a.com");
    }

    #[test]
    fn split_list() {
        let list = w(r#"a;;"b;c";'d'"#);
        let dirs = split_path_list(&list).map(s).collect::<Vec<_>>();
        assert_eq!(dirs, ["a", "b;c", "d"]);
        assert_eq!(split_path_list(&w(";")).count(), 0);
        assert_eq!(split_path_list(&[]).count(), 0);
    }
}
