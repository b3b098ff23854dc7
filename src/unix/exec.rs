use std::{
    convert::Infallible,
    ffi::{CStr, CString, c_char},
};

use bstr::{BStr, ByteSlice};
use nix::errno::Errno;

// https://github.com/kraj/musl/blob/1b06420abdf46f7d06ab4067e7c51b8b63731852/src/process/execvp.c#L5
const NAME_MAX: usize = 255;

/// `PATH` used when the parent has none.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/bin:/usr/bin";

/// Every path `execve` should be tried on, in order.
///
/// A program containing `/`, or any program when `path_resolve` is off, is
/// its own single candidate. Otherwise it is joined to each `PATH` entry, where
/// an empty entry stands for the current directory.
pub fn candidates(program: &CStr, path_resolve: bool, path: Option<&BStr>) -> nix::Result<Vec<CString>> {
    let file = program.to_bytes();
    if !path_resolve || file.contains(&b'/') {
        return Ok(vec![program.to_owned()]);
    }
    if file.is_empty() {
        return Err(Errno::ENOENT);
    }
    if file.len() > NAME_MAX {
        return Err(Errno::ENAMETOOLONG);
    }

    let path = path.unwrap_or(DEFAULT_PATH.into());
    path.split_str(":")
        .map(|dir| {
            let mut candidate = Vec::with_capacity(dir.len() + 1 + file.len() + 1);
            if !dir.is_empty() {
                candidate.extend_from_slice(dir);
                candidate.push(b'/');
            }
            candidate.extend_from_slice(file);
            CString::new(candidate).map_err(|_| Errno::EINVAL)
        })
        .collect()
}

/// Tries `execve` on each candidate and returns the error to report once none worked.
///
/// The search moves on after `ENOENT`, `ENOTDIR` and `EACCES` and stops at any
/// other error. `EACCES` wins over whatever the remaining candidates returned.
/// Runs in the forked child: no allocation, no locks.
pub fn exec_candidates(
    candidates: &[CString],
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> Result<Infallible, Errno> {
    let mut seen_eacces = false;
    let mut last_err = Errno::ENOENT;
    for candidate in candidates {
        unsafe { libc::execve(candidate.as_ptr(), argv, envp) };
        match Errno::last() {
            err @ (Errno::ENOENT | Errno::ENOTDIR | Errno::EACCES) => {
                seen_eacces |= err == Errno::EACCES;
                last_err = err;
            }
            other_err => return Err(other_err),
        }
    }
    Err(if seen_eacces { Errno::EACCES } else { last_err })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(program: &CStr, path: Option<&str>) -> nix::Result<Vec<String>> {
        let candidates = candidates(program, true, path.map(|path| path.into()))?;
        Ok(candidates
            .into_iter()
            .map(|candidate| candidate.into_string().unwrap())
            .collect())
    }

    #[test]
    fn splits_path() {
        assert_eq!(
            resolve(c"ls", Some("/a:/b/c")).unwrap(),
            ["/a/ls", "/b/c/ls"]
        );
    }

    #[test]
    fn empty_entry_is_current_dir() {
        assert_eq!(resolve(c"ls", Some(":/bin:")).unwrap(), ["ls", "/bin/ls", "ls"]);
    }

    #[test]
    fn default_path() {
        assert_eq!(
            resolve(c"ls", None).unwrap(),
            ["/usr/local/bin/ls", "/bin/ls", "/usr/bin/ls"]
        );
    }

    #[test]
    fn slash_skips_search() {
        assert_eq!(resolve(c"./ls", Some("/bin")).unwrap(), ["./ls"]);
        assert_eq!(resolve(c"/bin/ls", Some("/usr/bin")).unwrap(), ["/bin/ls"]);
    }

    #[test]
    fn no_resolution() {
        let candidates = candidates(c"ls", false, Some("/bin".into())).unwrap();
        assert_eq!(candidates, [c"ls".to_owned()]);
    }

    #[test]
    fn bad_names() {
        assert_eq!(resolve(c"", Some("/bin")), Err(Errno::ENOENT));
        let long = CString::new("a".repeat(NAME_MAX + 1)).unwrap();
        assert_eq!(resolve(&long, Some("/bin")), Err(Errno::ENAMETOOLONG));
        let longest = CString::new("a".repeat(NAME_MAX)).unwrap();
        assert!(resolve(&longest, Some("/bin")).is_ok());
    }

    #[test]
    fn exec_reports_last_error() {
        let argv = [c"x".as_ptr(), std::ptr::null()];
        let envp = [std::ptr::null()];
        let missing = [c"/nonexistent/fdspawn-a".to_owned(), c"/nonexistent/fdspawn-b".to_owned()];
        assert_eq!(
            exec_candidates(&missing, argv.as_ptr(), envp.as_ptr()).unwrap_err(),
            Errno::ENOENT
        );
        assert_eq!(
            exec_candidates(&[], argv.as_ptr(), envp.as_ptr()).unwrap_err(),
            Errno::ENOENT
        );
    }

    #[test]
    fn exec_prefers_eacces() {
        let dir = tempfile::tempdir().unwrap();
        let not_executable = dir.path().join("plain");
        std::fs::write(&not_executable, b"data").unwrap();
        let not_executable = CString::new(not_executable.into_os_string().into_encoded_bytes()).unwrap();

        let argv = [c"x".as_ptr(), std::ptr::null()];
        let envp = [std::ptr::null()];
        let candidates = [not_executable, c"/nonexistent/fdspawn".to_owned()];
        assert_eq!(
            exec_candidates(&candidates, argv.as_ptr(), envp.as_ptr()).unwrap_err(),
            Errno::EACCES
        );
    }
}
