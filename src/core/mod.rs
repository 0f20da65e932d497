//! Core pseudo-console session components.
//!
//! This module contains the OS-facing layer:
//!
//! - **handle**: owned Win32 handles with close-exactly-once semantics
//! - **pipe**: inheritable anonymous pipe pairs
//! - **pseudocon**: the ConPTY device (create, resize, close)
//! - **spawn**: launch attribute list + child process creation
//! - **session**: the orchestrator tying it all together
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── PipePair × 2 (child stdin / child stdout+stderr)
//! ├── PseudoConsole (ConPTY device bound to the pipes)
//! ├── ChildProcess (process + thread handles)
//! └── output pump thread (publishes decoded chunks)
//! ```

use std::io;
use thiserror::Error;

pub mod handle;
pub mod pipe;
pub mod pseudocon;
pub mod session;
pub mod spawn;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },

    #[error("Failed to create pipe: {0}")]
    PipeCreation(#[source] windows::core::Error),

    #[error("Failed to create pseudo console: {0}")]
    ConsoleCreation(#[source] windows::core::Error),

    #[error("Failed to build process attribute list: {0}")]
    AttributeList(#[source] windows::core::Error),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(#[source] windows::core::Error),

    #[error("Failed to resize pseudo console: {0}")]
    Resize(#[source] windows::core::Error),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("Session is disposed")]
    Disposed,

    #[error("Output pump owns the output stream")]
    PumpActive,
}

pub type Result<T> = std::result::Result<T, PtyError>;
