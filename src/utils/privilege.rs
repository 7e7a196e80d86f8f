/// Packet capture needs elevated privileges on most systems. This check is a
/// preflight hint for a clearer startup warning; the capture backend still
/// reports the authoritative error.
#[cfg(unix)]
pub fn has_capture_privilege() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn has_capture_privilege() -> bool {
    true
}
