use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pt_core::config::{resolve_working_dir, TerminalConfig};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pty::{PtyError, Result, SpawnOptions};
use crate::session::{SessionInfo, TerminalSession};

/// What every session created by a [`SessionRegistry`] starts with.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub shell: PathBuf,
    pub rows: u16,
    pub cols: u16,
    pub options: SpawnOptions,
    pub max_sessions: usize,
}

impl SessionDefaults {
    pub fn from_config(cfg: &TerminalConfig) -> Self {
        Self {
            shell: PathBuf::from(&cfg.shell),
            rows: cfg.rows,
            cols: cfg.cols,
            options: SpawnOptions {
                term: cfg.term.clone(),
                working_dir: resolve_working_dir(cfg.working_dir.as_deref()),
                env: Vec::new(),
            },
            max_sessions: cfg.max_sessions,
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self::from_config(&TerminalConfig::default())
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Directory of live terminal sessions keyed by id.
///
/// Lookups hand out `Arc` clones, so a session fetched just before a
/// concurrent `remove` stays valid memory; once it has been stopped its
/// operations report `NotRunning`.
pub struct SessionRegistry {
    defaults: SessionDefaults,
    sessions: RwLock<HashMap<Uuid, Arc<TerminalSession>>>,
}

impl SessionRegistry {
    pub fn new(defaults: SessionDefaults) -> Self {
        info!(
            shell = %defaults.shell.display(),
            max_sessions = defaults.max_sessions,
            "creating SessionRegistry"
        );
        Self {
            defaults,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    /// Construct, start and register a new session.
    ///
    /// Nothing is inserted unless the shell started; a session that started
    /// but lost a race for the last free slot is stopped before returning.
    pub fn create(&self) -> Result<Arc<TerminalSession>> {
        let max = self.defaults.max_sessions;
        if self.read().len() >= max {
            return Err(PtyError::AtCapacity { max });
        }

        let session = Arc::new(TerminalSession::new(
            self.defaults.shell.clone(),
            self.defaults.options.clone(),
        ));
        session.start(self.defaults.rows, self.defaults.cols)?;

        let mut sessions = self.write();
        if sessions.len() >= max {
            drop(sessions);
            session.stop();
            return Err(PtyError::AtCapacity { max });
        }
        sessions.insert(session.id(), session.clone());
        debug!(session_id = %session.id(), active = sessions.len(), "session registered");
        Ok(session)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<TerminalSession>> {
        self.read().get(id).cloned()
    }

    /// Drop the entry for `id`. Removing an unknown id is not an error.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<TerminalSession>> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "session deregistered");
        }
        removed
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.read().values().map(|s| s.info()).collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and remove every session.
    pub fn shutdown_all(&self) {
        let drained: Vec<Arc<TerminalSession>> =
            self.write().drain().map(|(_, session)| session).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "stopping all terminal sessions");
        }
        for session in drained {
            session.stop();
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<TerminalSession>>> {
        self.sessions.read().unwrap_or_else(|e| {
            warn!("SessionRegistry lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<TerminalSession>>> {
        self.sessions.write().unwrap_or_else(|e| {
            warn!("SessionRegistry lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("max_sessions", &self.defaults.max_sessions)
            .field("active_count", &self.len())
            .finish()
    }
}
