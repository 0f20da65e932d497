//! Child process launch with an attached pseudo-console.
//!
//! Process creation goes through an extended startup info block carrying a
//! variable-size attribute list. The list is sized by a two-call probe
//! (first call reports the required size, second call initializes the
//! allocation) and must stay alive until `CreateProcessW` has returned.

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::HPCON;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, UpdateProcThreadAttribute, WaitForSingleObject,
    CREATE_NO_WINDOW, EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST,
    PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOEXW,
};

use super::handle::OwnedHandle;
use super::pseudocon::PseudoConsole;
use super::{PtyError, Result};

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;

/// The process/thread attribute list attached to a launch request.
///
/// Constructed fully initialized; the intermediate "sized but uninitialized"
/// state never escapes. Deleted and freed exactly once on drop, which the
/// launch path only reaches after `CreateProcessW` has returned.
struct ProcThreadAttributeList {
    buffer: Vec<u8>,
}

impl ProcThreadAttributeList {
    /// Build a one-attribute list carrying the pseudo-console handle.
    fn for_console(hpc: HPCON) -> Result<Self> {
        let mut size: usize = 0;

        unsafe {
            // Probe call, expected to fail with ERROR_INSUFFICIENT_BUFFER
            // while reporting the required size.
            let _ = InitializeProcThreadAttributeList(
                LPPROC_THREAD_ATTRIBUTE_LIST::default(),
                1,
                0,
                &mut size,
            );

            let mut buffer = vec![0u8; size];
            let list = LPPROC_THREAD_ATTRIBUTE_LIST(buffer.as_mut_ptr() as *mut _);

            InitializeProcThreadAttributeList(list, 1, 0, &mut size)
                .map_err(PtyError::AttributeList)?;
            let mut initialized = Self { buffer };

            UpdateProcThreadAttribute(
                initialized.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(hpc.0 as *const _),
                std::mem::size_of::<HPCON>(),
                None,
                None,
            )
            .map_err(PtyError::AttributeList)?;

            Ok(initialized)
        }
    }

    fn as_raw(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr() as *mut _)
    }
}

impl Drop for ProcThreadAttributeList {
    fn drop(&mut self) {
        unsafe {
            DeleteProcThreadAttributeList(self.as_raw());
        }
    }
}

/// Handles for a spawned child process and its primary thread.
pub struct ChildProcess {
    process: OwnedHandle,
    thread: OwnedHandle,
    pid: u32,
}

impl ChildProcess {
    /// Process ID of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child is still running.
    pub fn is_running(&self) -> bool {
        if self.process.is_closed() {
            return false;
        }
        unsafe {
            let result = WaitForSingleObject(self.process.raw(), 0);
            result.0 != 0 // WAIT_OBJECT_0 = 0 means signaled (exited)
        }
    }

    /// Exit code of the child, if it has exited.
    pub fn exit_code(&self) -> Option<u32> {
        if self.process.is_closed() || self.is_running() {
            return None;
        }

        let mut exit_code: u32 = 0;
        unsafe {
            if GetExitCodeProcess(self.process.raw(), &mut exit_code).is_ok() {
                Some(exit_code)
            } else {
                None
            }
        }
    }

    /// Close both handles. Only the first call has effect.
    pub fn close(&self) {
        self.process.close();
        self.thread.close();
    }
}

/// Launch `command` attached to the pseudo-console, with stdin/stdout/stderr
/// routed through the given pipe ends (stderr shares the stdout pipe).
///
/// The child is created with no window, inherited handles, and the extended
/// startup info carrying the console attribute. The attribute list is freed
/// on every path out of this function, after the launch call has returned.
pub fn spawn_console_process(
    command: &str,
    console: &PseudoConsole,
    stdin: HANDLE,
    stdout: HANDLE,
) -> Result<ChildProcess> {
    let mut attr_list = ProcThreadAttributeList::for_console(console.raw())?;

    let mut startup_info = STARTUPINFOEXW {
        StartupInfo: unsafe { std::mem::zeroed() },
        lpAttributeList: attr_list.as_raw(),
    };
    startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
    startup_info.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
    startup_info.StartupInfo.hStdInput = stdin;
    startup_info.StartupInfo.hStdOutput = stdout;
    startup_info.StartupInfo.hStdError = stdout;

    let mut cmd_wide: Vec<u16> = command.encode_utf16().chain(std::iter::once(0)).collect();
    let mut process_info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(cmd_wide.as_mut_ptr()),
            None,
            None,
            true,
            CREATE_NO_WINDOW | EXTENDED_STARTUPINFO_PRESENT,
            None,
            PCWSTR::null(),
            &startup_info.StartupInfo,
            &mut process_info,
        )
        .map_err(PtyError::ProcessSpawn)?;
    }

    Ok(ChildProcess {
        process: OwnedHandle::from_raw(process_info.hProcess),
        thread: OwnedHandle::from_raw(process_info.hThread),
        pid: process_info.dwProcessId,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::PipePair;
    use std::time::{Duration, Instant};

    #[test]
    fn test_spawn_and_exit() {
        let input = PipePair::inheritable().unwrap();
        let output = PipePair::inheritable().unwrap();
        let pcon = PseudoConsole::new(80, 24, input.read.raw(), output.write.raw()).unwrap();

        let child = spawn_console_process(
            "cmd.exe /c exit 7",
            &pcon,
            input.read.raw(),
            output.write.raw(),
        )
        .unwrap();
        assert_ne!(child.pid(), 0);

        let deadline = Instant::now() + Duration::from_secs(10);
        while child.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(child.exit_code(), Some(7));

        child.close();
        assert!(!child.is_running());
    }

    #[test]
    fn test_spawn_failure_reports_os_error() {
        let input = PipePair::inheritable().unwrap();
        let output = PipePair::inheritable().unwrap();
        let pcon = PseudoConsole::new(80, 24, input.read.raw(), output.write.raw()).unwrap();

        let result = spawn_console_process(
            "nonexistent-binary-wpty.exe",
            &pcon,
            input.read.raw(),
            output.write.raw(),
        );
        assert!(matches!(result, Err(PtyError::ProcessSpawn(_))));
    }
}
