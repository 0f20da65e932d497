//! Pseudo-console (ConPTY) device wrapper.

use std::ffi::c_void;
use std::sync::atomic::{AtomicIsize, Ordering};

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};

use super::{PtyError, Result};

/// A pseudo-console device of a given (columns, rows) size.
///
/// The device reads its input from one pipe end and writes its output to
/// another; both are duplicated into the device at creation, so the caller
/// keeps ownership of the handles it passed in. Resizing mutates the device
/// in place and the attached client is notified through the device itself.
/// Closing is idempotent and unconditional once the device was allocated.
pub struct PseudoConsole {
    hpc: AtomicIsize,
}

impl PseudoConsole {
    /// Allocate a pseudo-console bound to (input read end, output write end).
    pub fn new(cols: u16, rows: u16, input: HANDLE, output: HANDLE) -> Result<Self> {
        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };

        let hpc = unsafe {
            CreatePseudoConsole(size, input, output, 0).map_err(PtyError::ConsoleCreation)?
        };

        Ok(Self {
            hpc: AtomicIsize::new(hpc.0 as isize),
        })
    }

    /// The raw `HPCON`, or a null handle if the device was closed.
    pub fn raw(&self) -> HPCON {
        HPCON(self.hpc.load(Ordering::SeqCst) as *mut c_void)
    }

    /// Resize the device in place.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let hpc = self.raw();
        if hpc.0.is_null() {
            return Err(PtyError::Disposed);
        }

        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };

        unsafe {
            ResizePseudoConsole(hpc, size).map_err(PtyError::Resize)?;
        }

        Ok(())
    }

    /// Close the device. Only the first call has effect.
    pub fn close(&self) {
        let prev = self.hpc.swap(0, Ordering::SeqCst);
        if prev != 0 {
            unsafe {
                ClosePseudoConsole(HPCON(prev as *mut c_void));
            }
        }
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::PipePair;

    #[test]
    fn test_create_resize_close() {
        let input = PipePair::inheritable().unwrap();
        let output = PipePair::inheritable().unwrap();

        let pcon = PseudoConsole::new(80, 24, input.read.raw(), output.write.raw()).unwrap();
        pcon.resize(100, 40).unwrap();

        pcon.close();
        assert!(matches!(pcon.resize(80, 24), Err(PtyError::Disposed)));
        // Second close must be a no-op
        pcon.close();
    }
}
