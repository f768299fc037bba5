use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use crate::error::exit;

/// Name of this host as reported by `gethostname(2)`.
/// Falls back to `"localhost"` if the call fails.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Exit code a shell would report for `status`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => exit::signaled(sig),
        (None, None) => 1,
    }
}

/// Sends `sig` to every process in the group `pgid`.
/// Returns `Ok(false)` if the group no longer exists.
pub fn signal_group(pgid: u32, sig: libc::c_int) -> std::io::Result<bool> {
    // SAFETY: killpg takes plain integers and has no memory-safety preconditions
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, sig) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}
