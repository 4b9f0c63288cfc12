// Parking on a token word that may sit in a MAP_SHARED region.
// FUTEX_PRIVATE_FLAG is never set: the peer can be another process.

use std::sync::atomic::AtomicU32;

#[cfg(target_os = "linux")]
fn futex(word: &AtomicU32, op: libc::c_int, val: u32) -> libc::c_long {
    // SAFETY: `word` is a live, 4-byte aligned u32 for the duration of the call.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            op,
            val,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        )
    }
}

/// Sleep while `word == expected`.
///
/// May return spuriously (value already changed, signal); callers re-check
/// in a loop.
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32) {
    futex(word, libc::FUTEX_WAIT, expected);
}

/// Wake every waiter parked on `word`, in any process.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(word: &AtomicU32) {
    futex(word, libc::FUTEX_WAKE, i32::MAX as u32);
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_word: &AtomicU32, _expected: u32) {
    std::thread::yield_now();
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_word: &AtomicU32) {}
