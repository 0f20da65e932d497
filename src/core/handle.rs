//! Owned Win32 handle with close-exactly-once semantics.

use std::ffi::c_void;
use std::sync::atomic::{AtomicIsize, Ordering};

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};

/// A Win32 `HANDLE` with single ownership.
///
/// The raw handle is stored as an atomic so that `close` can be called from
/// any thread holding a shared reference (teardown runs concurrently with the
/// output pump). Closing is idempotent: the first call closes the OS handle,
/// later calls and `Drop` are no-ops.
pub struct OwnedHandle {
    raw: AtomicIsize,
}

impl OwnedHandle {
    /// Take ownership of a raw handle.
    pub fn from_raw(handle: HANDLE) -> Self {
        Self {
            raw: AtomicIsize::new(handle.0 as isize),
        }
    }

    /// The raw handle value.
    ///
    /// Returns `INVALID_HANDLE_VALUE` once the handle has been closed; callers
    /// racing against `close` get an OS error from the subsequent call instead.
    pub fn raw(&self) -> HANDLE {
        HANDLE(self.raw.load(Ordering::SeqCst) as *mut c_void)
    }

    /// Whether the handle has already been closed.
    pub fn is_closed(&self) -> bool {
        self.raw.load(Ordering::SeqCst) == INVALID_HANDLE_VALUE.0 as isize
    }

    /// Close the handle. Only the first call has effect.
    pub fn close(&self) {
        let prev = self
            .raw
            .swap(INVALID_HANDLE_VALUE.0 as isize, Ordering::SeqCst);
        let handle = HANDLE(prev as *mut c_void);
        if prev != INVALID_HANDLE_VALUE.0 as isize && !handle.is_invalid() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let handle = OwnedHandle::from_raw(HANDLE::default());
        assert!(!handle.is_closed());
        handle.close();
        assert!(handle.is_closed());
        // Second close must not attempt another CloseHandle
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_raw_after_close_is_invalid() {
        let handle = OwnedHandle::from_raw(HANDLE::default());
        handle.close();
        assert!(handle.raw().is_invalid());
    }
}
