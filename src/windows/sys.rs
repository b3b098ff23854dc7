use std::{io, ptr::null_mut};

use fdspawn_shared::{
    Error,
    win32::{
        env::{EnvSource, simple_uppercase},
        path::ExeProbe,
    },
};
use widestring::U16CString;
use winapi::{
    shared::{
        minwindef::{BOOL, FALSE},
        winerror::ERROR_ENVVAR_NOT_FOUND,
    },
    um::{
        fileapi::{GetFileAttributesW, INVALID_FILE_ATTRIBUTES},
        processenv::{GetEnvironmentVariableW, NeedCurrentDirectoryForExePathW},
        winnls::LCMapStringW,
        winnt::FILE_ATTRIBUTE_DIRECTORY,
    },
};
use winsafe::GetLastError;

const LOCALE_INVARIANT: u32 = 0x007f;
const LCMAP_UPPERCASE: u32 = 0x0000_0200;

pub fn ck(b: BOOL) -> io::Result<()> {
    if b == FALSE {
        Err(last_error())
    } else {
        Ok(())
    }
}

pub fn last_error() -> io::Error {
    io::Error::from_raw_os_error(GetLastError().raw() as i32)
}

/// The live filesystem.
pub struct Win32Probe;

impl ExeProbe for Win32Probe {
    fn is_file(&self, path: &[u16]) -> bool {
        let Ok(path) = U16CString::from_vec(path) else {
            return false;
        };
        let attributes = unsafe { GetFileAttributesW(path.as_ptr()) };
        attributes != INVALID_FILE_ATTRIBUTES && attributes & FILE_ATTRIBUTE_DIRECTORY == 0
    }

    fn search_current_dir(&self, file: &[u16]) -> bool {
        let Ok(file) = U16CString::from_vec(file) else {
            return true;
        };
        unsafe { NeedCurrentDirectoryForExePathW(file.as_ptr()) } != FALSE
    }
}

/// The parent's environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &[u16]) -> Result<Option<Vec<u16>>, Error> {
        let Ok(name_z) = U16CString::from_vec(name) else {
            return Ok(None);
        };

        let size = unsafe { GetEnvironmentVariableW(name_z.as_ptr(), null_mut(), 0) };
        if size == 0 {
            let err = GetLastError().raw();
            return if err == ERROR_ENVVAR_NOT_FOUND {
                Ok(None)
            } else {
                Err(Error::Os(err))
            };
        }

        let mut value = Vec::new();
        value
            .try_reserve_exact(size as usize)
            .map_err(|_| Error::OutOfMemory("environment variable"))?;
        value.resize(size as usize, 0);
        let len = unsafe { GetEnvironmentVariableW(name_z.as_ptr(), value.as_mut_ptr(), size) };
        // `size` counts the nul, `len` does not
        if len.checked_add(1) != Some(size) {
            return Err(Error::EnvChanged {
                name: String::from_utf16_lossy(name),
            });
        }
        value.truncate(len as usize);
        Ok(Some(value))
    }

    fn to_upper(&self, name: &[u16]) -> Vec<u16> {
        let Ok(len) = i32::try_from(name.len()) else {
            return simple_uppercase(name);
        };
        if len == 0 {
            return Vec::new();
        }
        let mut upper = vec![0u16; name.len()];
        let written = unsafe {
            LCMapStringW(
                LOCALE_INVARIANT,
                LCMAP_UPPERCASE,
                name.as_ptr(),
                len,
                upper.as_mut_ptr(),
                len,
            )
        };
        if written <= 0 {
            return simple_uppercase(name);
        }
        upper.truncate(written as usize);
        upper
    }
}
