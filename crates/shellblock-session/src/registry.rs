//! Session registry: the process-wide map of live sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, instrument, warn};

use shellblock_core::{Block, Error, Result, ServerConfig, SessionId, SessionSummary};

use crate::credential::Credential;
use crate::pty::{PtyLauncher, ShellLauncher};
use crate::session::{BlockRange, Session, SessionOptions};
use crate::wait::{ExecutionResult, WaitOutcome};

/// Owns every session and routes operations to them by id.
///
/// The map lock is only held to insert, remove or look up a session, never
/// while a session's own lock is held. The id counter lock is held for the
/// whole of a create up to the insert, so ids are only consumed by sessions
/// that made it into the map.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: Mutex<u64>,
    config: ServerConfig,
    credential: Option<Credential>,
    launcher: Arc<dyn ShellLauncher>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("elevation", &self.credential.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry launching shells on a pseudo-terminal.
    pub fn new(config: ServerConfig, credential: Option<Credential>) -> Self {
        Self::with_launcher(config, credential, Arc::new(PtyLauncher))
    }

    /// Create a registry with a custom launcher.
    pub fn with_launcher(
        config: ServerConfig,
        credential: Option<Credential>,
        launcher: Arc<dyn ShellLauncher>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: Mutex::new(0),
            config,
            credential,
            launcher,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session and wait for its shell hook (or the startup timeout).
    #[instrument(skip(self))]
    pub async fn create(&self, options: SessionOptions) -> Result<SessionId> {
        let session = {
            let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            let max = self.config.server.max_sessions;
            if self.len() >= max {
                return Err(Error::SessionLimitReached(max));
            }

            let id = SessionId::new(*next_id);
            let session = Session::start(
                id,
                options,
                &self.config,
                self.launcher.as_ref(),
                self.credential.clone(),
            )?;
            self.write().insert(id, Arc::clone(&session));
            *next_id += 1;
            session
        };
        let id = session.id();

        session
            .wait_until_started(self.config.server.startup_timeout())
            .await;
        info!(
            "Session ready: id={} lifecycle={} degraded={}",
            id,
            session.lifecycle(),
            session.is_degraded()
        );
        Ok(id)
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Result<Arc<Session>> {
        self.read().get(&id).cloned().ok_or(Error::SessionNotFound(id))
    }

    /// Terminate a session and remove it.
    pub fn terminate(&self, id: SessionId) -> Result<()> {
        let session = self.write().remove(&id).ok_or(Error::SessionNotFound(id))?;
        session.terminate();
        Ok(())
    }

    /// Terminate every session. Used on shutdown.
    pub fn terminate_all(&self) {
        let sessions: Vec<Arc<Session>> = self.write().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            info!("Terminating {} session(s)", sessions.len());
        }
        for session in sessions {
            session.terminate();
        }
    }

    /// Summaries of all sessions, sorted by id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.read().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> =
            sessions.iter().map(|session| session.summary()).collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submit a command line; returns the sequence number its blocks start at.
    pub fn submit_input(&self, id: SessionId, text: &str) -> Result<u64> {
        self.get(id)?.submit_input(text)
    }

    /// Read blocks.
    pub fn read_blocks(&self, id: SessionId, range: BlockRange) -> Result<Vec<Block>> {
        Ok(self.get(id)?.read_blocks(range))
    }

    /// Blocks from the latest command onward, or all of them.
    pub fn snapshot(&self, id: SessionId, include_all: bool) -> Result<Vec<Block>> {
        Ok(self.get(id)?.snapshot(include_all))
    }

    /// Update label and/or description.
    pub fn set_metadata(
        &self,
        id: SessionId,
        label: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        self.get(id)?.set_metadata(label, description);
        Ok(())
    }

    /// Wait for the first Output block at or after `after_seq` to close.
    /// The timeout is clamped to the configured maximum.
    pub async fn wait_for_output(
        &self,
        id: SessionId,
        after_seq: u64,
        timeout_ms: Option<u64>,
    ) -> Result<WaitOutcome> {
        let session = self.get(id)?;
        let timeout = self.config.execution.resolve_timeout(timeout_ms);
        Ok(session.wait_for_output(after_seq, timeout).await)
    }

    /// Submit a command and wait for its output.
    pub async fn execute(
        &self,
        id: SessionId,
        text: &str,
        timeout_ms: Option<u64>,
        raw: bool,
    ) -> Result<ExecutionResult> {
        let session = self.get(id)?;
        let timeout = self.config.execution.resolve_timeout(timeout_ms);
        session.execute(text, timeout, raw).await
    }

    /// Send raw keys to the running command.
    pub fn send_keys(&self, id: SessionId, keys: &[u8]) -> Result<()> {
        self.get(id)?.send_keys(keys)
    }

    /// Type the configured credential into the running command.
    pub fn enter_credential(&self, id: SessionId) -> Result<()> {
        let session = self.get(id)?;
        if self.credential.is_none() {
            warn!("root password requested but none is configured");
        }
        session.enter_credential()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
