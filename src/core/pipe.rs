//! Anonymous pipe pairs for pseudo-console I/O.

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::System::Pipes::CreatePipe;

use super::handle::OwnedHandle;
use super::{PtyError, Result};

/// One anonymous byte pipe: a read end and a write end.
///
/// Both ends are created inheritable so a child process launched with
/// inherited handles receives usable duplicates. One end of each pair is
/// handed to the child at launch and closed in the parent right after; the
/// other end stays with the session until teardown.
pub struct PipePair {
    pub read: OwnedHandle,
    pub write: OwnedHandle,
}

impl PipePair {
    /// Create an inheritable anonymous pipe.
    pub fn inheritable() -> Result<Self> {
        let sa = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: true.into(),
        };

        let mut read = HANDLE::default();
        let mut write = HANDLE::default();
        unsafe {
            CreatePipe(&mut read, &mut write, Some(&sa), 0).map_err(PtyError::PipeCreation)?;
        }

        Ok(Self {
            read: OwnedHandle::from_raw(read),
            write: OwnedHandle::from_raw(write),
        })
    }
}
