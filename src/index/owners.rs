//! uid/gid <-> user/group name lookups via the reentrant libc passwd/group calls.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::ptr;

const MAX_BUFFER: usize = 1024 * 1024;

/// Run a `get*_r` style lookup, growing the scratch buffer on ERANGE.
/// `call` returns the libc errno (0 on success) and the decoded value.
fn with_scratch<T>(mut call: impl FnMut(&mut [u8]) -> (i32, Option<T>)) -> Option<T> {
    let mut buffer = vec![0_u8; 1024];
    loop {
        match call(&mut buffer) {
            (0, value) => return value,
            (libc::ERANGE, _) if buffer.len() < MAX_BUFFER => {
                let grown = buffer.len().saturating_mul(2);
                buffer.resize(grown, 0);
            }
            _ => return None,
        }
    }
}

/// Name of the user owning `uid`, if the local database knows it.
pub fn user_name(uid: u32) -> Option<String> {
    with_scratch(|buf| {
        let mut pwd = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();
        // SAFETY: `pwd`, `buf` and `result` are valid for the duration of the call.
        let errno = unsafe {
            libc::getpwuid_r(
                uid as libc::uid_t,
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if errno != 0 || result.is_null() {
            return (errno, None);
        }
        // SAFETY: non-null result means `pwd` is initialized; pw_name points into `buf`.
        let name = unsafe { CStr::from_ptr((*result).pw_name) };
        (0, name.to_str().ok().map(str::to_owned))
    })
}

pub fn group_name(gid: u32) -> Option<String> {
    with_scratch(|buf| {
        let mut grp = MaybeUninit::<libc::group>::zeroed();
        let mut result: *mut libc::group = ptr::null_mut();
        // SAFETY: as above.
        let errno = unsafe {
            libc::getgrgid_r(
                gid as libc::gid_t,
                grp.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if errno != 0 || result.is_null() {
            return (errno, None);
        }
        // SAFETY: non-null result means `grp` is initialized; gr_name points into `buf`.
        let name = unsafe { CStr::from_ptr((*result).gr_name) };
        (0, name.to_str().ok().map(str::to_owned))
    })
}

/// uid for a user name on this machine.
pub fn uid_by_name(name: &str) -> Option<u32> {
    let c_name = CString::new(name).ok()?;
    with_scratch(|buf| {
        let mut pwd = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();
        // SAFETY: `c_name` is a valid C string; other pointers as above.
        let errno = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if errno != 0 || result.is_null() {
            return (errno, None);
        }
        // SAFETY: non-null result means `pwd` is initialized.
        (0, Some(unsafe { (*result).pw_uid } as u32))
    })
}

pub fn gid_by_name(name: &str) -> Option<u32> {
    let c_name = CString::new(name).ok()?;
    with_scratch(|buf| {
        let mut grp = MaybeUninit::<libc::group>::zeroed();
        let mut result: *mut libc::group = ptr::null_mut();
        // SAFETY: `c_name` is a valid C string; other pointers as above.
        let errno = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if errno != 0 || result.is_null() {
            return (errno, None);
        }
        // SAFETY: non-null result means `grp` is initialized.
        (0, Some(unsafe { (*result).gr_gid } as u32))
    })
}
