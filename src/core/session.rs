//! Pseudo-console session orchestration.
//!
//! A [`Session`] owns every OS resource behind one interactive shell: the two
//! pipe pairs, the pseudo-console device, the child process handles, and the
//! background output pump. Construction is all-or-nothing; teardown is
//! idempotent and ordered.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use windows::Win32::Foundation::ERROR_BROKEN_PIPE;
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::IO::CancelIoEx;

use crate::config::SessionConfig;
use crate::encoding::{OutputDecoder, CP_UTF8};

use super::handle::OwnedHandle;
use super::pipe::PipePair;
use super::pseudocon::PseudoConsole;
use super::spawn::{spawn_console_process, ChildProcess};
use super::{PtyError, Result};

/// Bytes read per chunk, by pull reads and the output pump alike.
const CHUNK_SIZE: usize = 1024;

/// How long disposal waits for the output pump before abandoning it.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared state between the session and its output pump.
struct SessionInner {
    console: PseudoConsole,
    input_write: OwnedHandle,
    output_read: OwnedHandle,
    child: ChildProcess,
    disposed: AtomicBool,
    pump_started: AtomicBool,
    decoder: Mutex<OutputDecoder>,
    subscribers: Mutex<Vec<Sender<String>>>,
}

impl SessionInner {
    fn write_all(&self, data: &[u8]) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PtyError::Disposed);
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let mut written: u32 = 0;
            unsafe {
                WriteFile(
                    self.input_write.raw(),
                    Some(remaining),
                    Some(&mut written),
                    None,
                )
                .map_err(|e| PtyError::Write(io::Error::from_raw_os_error(e.code().0 as i32)))?;
            }
            if written == 0 {
                return Err(PtyError::Write(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "pipe accepted no bytes",
                )));
            }
            remaining = &remaining[written as usize..];
        }

        Ok(())
    }

    /// Blocking read of up to `buffer.len()` bytes; `Ok(0)` is end of stream.
    fn read_output(&self, buffer: &mut [u8]) -> Result<usize> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PtyError::Disposed);
        }

        let mut read: u32 = 0;
        unsafe {
            match ReadFile(self.output_read.raw(), Some(buffer), Some(&mut read), None) {
                Ok(()) => Ok(read as usize),
                // The child closed its end of the pipe: end of stream
                Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => Ok(0),
                Err(e) => Err(PtyError::Read(io::Error::from_raw_os_error(
                    e.code().0 as i32,
                ))),
            }
        }
    }

    /// Cancel a pending blocking read on the output pipe, from any thread.
    fn cancel_output_read(&self) {
        unsafe {
            let _ = CancelIoEx(self.output_read.raw(), None);
        }
    }
}

/// An interactive pseudo-console session around one child shell process.
///
/// Output can be consumed either by pull ([`read_chunk`](Session::read_chunk))
/// or by push ([`subscribe`](Session::subscribe)); a byte stream cannot feed
/// two independent consumers, so the two modes are mutually exclusive. The
/// pump starts with the first subscription, and pull reads fail with
/// [`PtyError::PumpActive`] from then on.
pub struct Session {
    inner: Arc<SessionInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Launch `command` attached to a fresh pseudo-console of the given size.
    ///
    /// Fails before touching the OS if either dimension is zero. Any failure
    /// after that rolls back every resource acquired so far; no partially
    /// live session is ever returned.
    pub fn spawn(command: &str, cols: u16, rows: u16) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(PtyError::InvalidSize { cols, rows });
        }

        // Input pipe: we write, the device and child read.
        let input = PipePair::inheritable()?;
        // Output pipe: the device and child write, we read.
        let output = PipePair::inheritable()?;

        let console = PseudoConsole::new(cols, rows, input.read.raw(), output.write.raw())?;
        let child =
            spawn_console_process(command, &console, input.read.raw(), output.write.raw())?;

        info!(pid = child.pid(), command, cols, rows, "session started");

        // The child keeps its inherited duplicates; holding these open here
        // would keep the output pipe alive past child exit and hang reads.
        input.read.close();
        output.write.close();

        let inner = Arc::new(SessionInner {
            console,
            input_write: input.write,
            output_read: output.read,
            child,
            disposed: AtomicBool::new(false),
            pump_started: AtomicBool::new(false),
            decoder: Mutex::new(OutputDecoder::default()),
            subscribers: Mutex::new(Vec::new()),
        });

        Ok(Self {
            inner,
            pump: Mutex::new(None),
        })
    }

    /// Launch a session from a [`SessionConfig`].
    ///
    /// The configured code page becomes the decoder's starting assumption;
    /// no process-wide encoding state is touched.
    pub fn with_config(config: &SessionConfig) -> Result<Self> {
        let session = Self::spawn(&config.shell, config.cols, config.rows)?;
        if let Some(code_page) = config.codepage {
            session.inner.decoder.lock().unwrap().set_code_page(code_page);
        }
        Ok(session)
    }

    /// Send one line of input, terminated with CRLF and flushed immediately.
    pub fn send_line(&self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.inner.write_all(&bytes)
    }

    /// Write raw bytes to the child's input (keystroke passthrough).
    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)
    }

    /// Pull-based read of the next output chunk, decoded to text.
    ///
    /// Blocks until output is available; returns `Ok(None)` at end of stream.
    /// Unavailable once the output pump has been started by a subscription.
    pub fn read_chunk(&self) -> Result<Option<String>> {
        if self.inner.pump_started.load(Ordering::SeqCst) {
            return Err(PtyError::PumpActive);
        }

        let mut buffer = [0u8; CHUNK_SIZE];
        let n = self.inner.read_output(&mut buffer)?;
        if n == 0 {
            return Ok(None);
        }

        let mut decoder = self.inner.decoder.lock().unwrap();
        Ok(Some(decoder.decode(&buffer[..n])))
    }

    /// Subscribe to pushed output chunks.
    ///
    /// The first subscription starts the output pump; every receiver gets
    /// every chunk published after it subscribed. Receivers disconnect (and
    /// are pruned) by being dropped. Chunks are published from the pump's
    /// thread, so UI consumers must marshal back to their own context.
    pub fn subscribe(&self) -> Result<Receiver<String>> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PtyError::Disposed);
        }

        let (tx, rx) = mpsc::channel();
        self.inner.subscribers.lock().unwrap().push(tx);
        self.ensure_pump();
        Ok(rx)
    }

    fn ensure_pump(&self) {
        let mut pump = self.pump.lock().unwrap();
        if pump.is_some() {
            return;
        }

        self.inner.pump_started.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *pump = Some(thread::spawn(move || run_output_pump(inner)));
    }

    /// Resize the pseudo-console in place.
    ///
    /// The child observes the new size through the device itself; no message
    /// is sent over the pipes.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if cols == 0 || rows == 0 {
            return Err(PtyError::InvalidSize { cols, rows });
        }
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PtyError::Disposed);
        }

        self.inner.console.resize(cols, rows)?;
        debug!(cols, rows, "resized pseudo-console");
        Ok(())
    }

    /// Best-effort alignment of the child console's code page with UTF-8.
    ///
    /// Queries `chcp`, and unless the response already reports 65001, issues
    /// the switch (without verifying it took effect). Runs a query/response
    /// pair over the session's streams: it must not be interleaved with other
    /// writers, and it is only available in pull mode, before any
    /// subscription. Intended to run once, shortly after construction.
    pub fn negotiate_utf8(&self) {
        if self.inner.disposed.load(Ordering::SeqCst)
            || self.inner.pump_started.load(Ordering::SeqCst)
        {
            return;
        }

        if self.send_line("chcp").is_err() {
            return;
        }
        match self.read_chunk() {
            Ok(Some(response)) if !response.contains("65001") => {
                let _ = self.send_line("chcp 65001 > nul");
            }
            _ => {}
        }

        self.inner.decoder.lock().unwrap().set_code_page(CP_UTF8);
    }

    /// Whether the child process is still running.
    pub fn is_running(&self) -> bool {
        !self.inner.disposed.load(Ordering::SeqCst) && self.inner.child.is_running()
    }

    /// Exit code of the child, if it has exited.
    pub fn exit_code(&self) -> Option<u32> {
        self.inner.child.exit_code()
    }

    /// Process ID of the child.
    pub fn pid(&self) -> u32 {
        self.inner.child.pid()
    }

    /// Tear the session down. Safe to call more than once.
    ///
    /// Order: mark disposed, unblock and close the streams, close the
    /// pseudo-console, close the process handles, then join the pump within
    /// a bounded timeout. A pump that does not stop in time is abandoned.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(pid = self.inner.child.pid(), "disposing session");

        // Force the pump's blocked read to return before its handle goes away.
        self.inner.cancel_output_read();
        self.inner.input_write.close();
        self.inner.output_read.close();
        self.inner.console.close();
        self.inner.child.close();

        let handle = self.pump.lock().unwrap().take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + PUMP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    "output pump did not stop within {:?}, abandoning it",
                    PUMP_JOIN_TIMEOUT
                );
            }
        }

        // Drop any remaining senders so receivers observe disconnection
        self.inner.subscribers.lock().unwrap().clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Drain the output stream and publish decoded chunks to all subscribers.
///
/// Runs until the session is disposed, the stream ends, or a read fails.
/// There is no restart: a failed read means the child has most likely
/// exited, which subscribers observe as channel disconnection.
fn run_output_pump(inner: Arc<SessionInner>) {
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        if inner.disposed.load(Ordering::SeqCst) {
            break;
        }

        match inner.read_output(&mut buffer) {
            Ok(0) => {
                debug!("output stream ended");
                break;
            }
            Ok(n) => {
                let text = inner.decoder.lock().unwrap().decode(&buffer[..n]);
                if text.is_empty() {
                    continue;
                }
                let mut subscribers = inner.subscribers.lock().unwrap();
                subscribers.retain(|tx| tx.send(text.clone()).is_ok());
            }
            Err(e) => {
                if !inner.disposed.load(Ordering::SeqCst) {
                    debug!("output pump stopped: {}", e);
                }
                break;
            }
        }
    }

    // End of stream: dropping the senders disconnects every receiver
    inner.subscribers.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL: &str = "cmd.exe";

    fn read_until(session: &Session, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = String::new();
        while Instant::now() < deadline {
            match session.read_chunk() {
                Ok(Some(chunk)) => {
                    seen.push_str(&chunk);
                    if seen.contains(needle) {
                        return true;
                    }
                }
                Ok(None) => return false,
                Err(_) => return false,
            }
        }
        false
    }

    #[test]
    fn test_invalid_size_fails_before_allocation() {
        assert!(matches!(
            Session::spawn(SHELL, 0, 24),
            Err(PtyError::InvalidSize { .. })
        ));
        assert!(matches!(
            Session::spawn(SHELL, 80, 0),
            Err(PtyError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_spawn_and_dispose_is_idempotent() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        assert!(session.is_running());

        session.dispose();
        assert!(!session.is_running());
        // Second dispose must be a no-op
        session.dispose();
    }

    #[test]
    fn test_echo_round_trip() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        session.send_line("echo wpty-roundtrip-token").unwrap();
        assert!(read_until(&session, "wpty-roundtrip-token"));
        session.dispose();
    }

    #[test]
    fn test_resize_is_observable() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        session.resize(100, 40).unwrap();
        // mode con reports the console dimensions through the device
        session.send_line("mode con").unwrap();
        assert!(read_until(&session, "100"));
        session.dispose();
    }

    #[test]
    fn test_write_after_dispose_fails() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        session.dispose();
        assert!(matches!(
            session.send_line("echo nope"),
            Err(PtyError::Disposed)
        ));
        assert!(matches!(session.resize(90, 30), Err(PtyError::Disposed)));
    }

    #[test]
    fn test_pump_publishes_to_subscribers() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        let rx = session.subscribe().unwrap();

        session.send_line("echo wpty-pump-token").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = String::new();
        while Instant::now() < deadline && !seen.contains("wpty-pump-token") {
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(chunk) => seen.push_str(&chunk),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        assert!(seen.contains("wpty-pump-token"));

        session.dispose();
    }

    #[test]
    fn test_pull_read_conflicts_with_pump() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        let _rx = session.subscribe().unwrap();
        assert!(matches!(
            session.read_chunk(),
            Err(PtyError::PumpActive)
        ));
        session.dispose();
    }

    #[test]
    fn test_dispose_unblocks_pump_within_timeout() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        let rx = session.subscribe().unwrap();

        // Let the pump reach its blocking read
        thread::sleep(Duration::from_millis(200));

        let start = Instant::now();
        session.dispose();
        assert!(start.elapsed() < Duration::from_secs(2));

        // The pump is gone: the channel drains and disconnects
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(_) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    assert!(Instant::now() < deadline, "pump did not release channel");
                }
            }
        }
    }

    #[test]
    fn test_concurrent_dispose_runs_one_teardown() {
        let session = Arc::new(Session::spawn(SHELL, 80, 24).unwrap());
        let other = Arc::clone(&session);

        let handle = thread::spawn(move || other.dispose());
        session.dispose();
        handle.join().unwrap();

        assert!(!session.is_running());
    }

    #[test]
    fn test_negotiate_utf8_is_best_effort() {
        let session = Session::spawn(SHELL, 80, 24).unwrap();
        session.negotiate_utf8();
        // Still fully usable afterwards
        session.send_line("echo wpty-after-chcp").unwrap();
        assert!(read_until(&session, "wpty-after-chcp"));
        session.dispose();
    }
}
