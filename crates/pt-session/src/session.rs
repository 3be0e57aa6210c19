use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pty::{PtyError, PtyProcess, Result, SpawnOptions};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Starting,
    Running,
    Stopped,
    Error,
}

/// Serializable snapshot of a session, used for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub state: SessionState,
    pub rows: u16,
    pub cols: u16,
    pub shell: PathBuf,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TerminalSession
// ---------------------------------------------------------------------------

struct Inner {
    state: SessionState,
    process: PtyProcess,
}

/// Identity and lifecycle gate around one [`PtyProcess`].
///
/// All methods take `&self` so a session can be shared through an `Arc`;
/// the process itself stays behind the session's mutex and is never handed
/// out.
pub struct TerminalSession {
    id: Uuid,
    shell: PathBuf,
    created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl TerminalSession {
    pub fn new(shell: impl Into<PathBuf>, options: SpawnOptions) -> Self {
        Self::with_id(Uuid::new_v4(), shell, options)
    }

    pub fn with_id(id: Uuid, shell: impl Into<PathBuf>, options: SpawnOptions) -> Self {
        Self {
            id,
            shell: shell.into(),
            created_at: Utc::now(),
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                process: PtyProcess::with_options(options),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Start the shell. Only valid from `Uninitialized`; a failure leaves the
    /// session in `Error`, from which only `stop` is accepted.
    pub fn start(&self, rows: u16, cols: u16) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Uninitialized {
            return Err(PtyError::AlreadyStarted);
        }
        inner.state = SessionState::Starting;
        match inner.process.start(&self.shell, rows, cols) {
            Ok(()) => {
                inner.state = SessionState::Running;
                info!(session_id = %self.id, rows, cols, "terminal session running");
                Ok(())
            }
            Err(e) => {
                inner.state = SessionState::Error;
                warn!(session_id = %self.id, error = %e, "terminal session failed to start");
                Err(e)
            }
        }
    }

    /// Forward input to the shell. `NotRunning` outside the `Running` state.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Running {
            return Err(PtyError::NotRunning);
        }
        inner.process.write(data)
    }

    /// Resize the terminal. `NotRunning` outside the `Running` state.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Running {
            return Err(PtyError::NotRunning);
        }
        inner.process.resize(rows, cols)
    }

    /// Buffered shell output. Output produced just before the shell exited is
    /// still returned until the session is stopped.
    pub fn read_available(&self) -> Vec<u8> {
        self.lock().process.read_available()
    }

    /// Liveness check; moves `Running` to `Stopped` once the shell has exited.
    pub fn is_running(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Running {
            return false;
        }
        let alive = inner.process.is_running();
        if !alive {
            debug!(session_id = %self.id, "shell exited");
            inner.state = SessionState::Stopped;
        }
        alive
    }

    /// Whether the shell's terminal echoes input right now. `None` outside
    /// `Running` or when the platform cannot tell.
    pub fn echo_enabled(&self) -> Option<bool> {
        let inner = self.lock();
        if inner.state != SessionState::Running {
            return None;
        }
        inner.process.echo_enabled()
    }

    pub fn dimensions(&self) -> (u16, u16) {
        self.lock().process.dimensions()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().process.pid()
    }

    /// Kill the shell and release the pty. Idempotent; from `Uninitialized`
    /// and `Error` it only performs cleanup and leaves the state as is.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.process.stop();
        if matches!(
            inner.state,
            SessionState::Running | SessionState::Starting
        ) {
            inner.state = SessionState::Stopped;
            info!(session_id = %self.id, "terminal session stopped");
        }
    }

    pub fn info(&self) -> SessionInfo {
        let inner = self.lock();
        let (rows, cols) = inner.process.dimensions();
        SessionInfo {
            id: self.id,
            state: inner.state,
            rows,
            cols,
            shell: self.shell.clone(),
            created_at: self.created_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| {
            warn!(session_id = %self.id, "session lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("shell", &self.shell)
            .field("state", &self.state())
            .finish()
    }
}
