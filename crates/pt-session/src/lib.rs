//! Pseudo-terminal sessions for padterm.
//!
//! - [`pty`]: one pty pair plus its shell, with non-blocking output reads
//! - [`session`]: identity and lifecycle state around a pty process
//! - [`registry`]: the shared table of live sessions

pub mod pty;
pub mod registry;
pub mod session;

pub use pty::{PtyError, PtyProcess, SpawnOptions};
pub use registry::{SessionDefaults, SessionRegistry};
pub use session::{SessionInfo, SessionState, TerminalSession};
