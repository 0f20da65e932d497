//! wpty - a Windows pseudo-console (ConPTY) session manager
//!
//! wpty allocates a pseudo-console device, spawns a child shell attached to
//! it, and exposes the child's interactive input/output as text streams. It
//! is a session/process/stream manager, not a terminal emulator: no escape
//! sequences are interpreted and no screen grid is kept.
//!
//! # Features
//!
//! - **Session lifecycle**: all-or-nothing construction, idempotent teardown
//! - **Line input**: CRLF-terminated writes flushed straight to the child
//! - **Pull or push output**: blocking chunk reads, or a background pump
//!   publishing decoded chunks to subscribers
//! - **Resize**: in-place pseudo-console resizing
//! - **Encoding negotiation**: best-effort `chcp 65001` alignment
//!
//! # Quick Start
//!
//! ```no_run
//! # #[cfg(windows)] {
//! use wpty::Session;
//!
//! let session = Session::spawn("cmd.exe", 120, 30).unwrap();
//! session.negotiate_utf8();
//!
//! let rx = session.subscribe().unwrap();
//! session.send_line("echo hello").unwrap();
//! while let Ok(chunk) = rx.recv() {
//!     print!("{chunk}");
//! }
//!
//! session.dispose();
//! # }
//! ```
//!
//! The session layer is Windows-only; the `config` and `encoding` modules
//! build everywhere.

pub mod config;
pub mod encoding;

#[cfg(windows)]
pub mod core;

pub use config::SessionConfig;
pub use encoding::{OutputDecoder, CP_UTF8};

#[cfg(windows)]
pub use crate::core::session::Session;
#[cfg(windows)]
pub use crate::core::{PtyError, Result};
