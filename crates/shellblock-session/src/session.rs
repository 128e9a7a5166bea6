//! Shell session management.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shellblock_core::{
    Block, BlockKind, Error, ExitStatus, Lifecycle, Result, ServerConfig, SessionId,
    SessionSummary,
};
use shellblock_engine::{MarkerCodec, SegmentEvent, Segmenter, StoreLimits};

use crate::credential::{elevation_prompt, Credential, PromptWatch};
use crate::hook::HookDir;
use crate::pty::{LaunchSpec, ShellEvent, ShellLauncher, ShellProcess};

/// Clears whatever is on the zsh command line (end of line, kill line).
const CLEAR_LINE: &[u8] = b"\x05\x15";
const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

/// Options for a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Short title
    pub label: Option<String>,
    /// Longer free-text summary
    pub description: Option<String>,
    /// Run the shell with elevated privilege
    pub elevated: bool,
}

/// Which blocks to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRange {
    /// Blocks with sequence number >= N
    Since(u64),
    /// The last K blocks
    Last(usize),
    /// Every retained block
    All,
}

/// Mutable session state, guarded by the session lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) label: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) segmenter: Segmenter,
    /// Input was submitted and the shell has not yet started a command for it
    pub(crate) awaiting_command: bool,
    pub(crate) exit_code: Option<u32>,
    /// Elevated session still waiting for the elevation program's prompt
    pub(crate) elevation: Option<PromptWatch>,
}

/// One running shell, its segmentation engine and its metadata.
pub struct Session {
    id: SessionId,
    elevated: bool,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    process: Box<dyn ShellProcess>,
    credential: Option<Credential>,
    hook_dir: Option<HookDir>,
    revision: watch::Sender<u64>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("elevated", &self.elevated)
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Launch a shell and start draining its output.
    ///
    /// The session starts in [`Lifecycle::Starting`]; see
    /// [`Session::wait_until_started`]. Must be called within a tokio runtime.
    pub fn start(
        id: SessionId,
        options: SessionOptions,
        config: &ServerConfig,
        launcher: &dyn ShellLauncher,
        credential: Option<Credential>,
    ) -> Result<Arc<Self>> {
        if options.elevated && credential.is_none() {
            return Err(Error::PermissionDenied(
                "elevated sessions need a root password configured at startup".to_string(),
            ));
        }

        let codec = MarkerCodec::random();
        let hook_dir = if config.shell.is_zsh() {
            Some(HookDir::create(&codec)?)
        } else {
            info!(
                "no hook for shell '{}'; session id={} will run degraded",
                config.shell.program, id
            );
            None
        };

        let spec = launch_spec(config, &codec, hook_dir.as_ref(), options.elevated);
        let launched = launcher.launch(&spec)?;
        let elevation = options
            .elevated
            .then(|| PromptWatch::new(elevation_prompt(&codec)));

        let (revision, _) = watch::channel(0u64);
        let session = Arc::new(Self {
            id,
            elevated: options.elevated,
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                label: options.label,
                description: options.description,
                lifecycle: Lifecycle::Starting,
                segmenter: Segmenter::new(codec, StoreLimits::from(&config.blocks)),
                awaiting_command: false,
                exit_code: None,
                elevation,
            }),
            process: launched.process,
            credential: if options.elevated { credential } else { None },
            hook_dir,
            revision,
            drain: Mutex::new(None),
        });

        let handle = tokio::spawn(drain(Arc::downgrade(&session), launched.events));
        *session.drain.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        if session.hook_dir.is_none() {
            session.degrade();
        }

        info!("Session created: id={} elevated={}", id, options.elevated);
        Ok(session)
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the shell runs with elevated privilege.
    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// Whether the session runs without markers.
    pub fn is_degraded(&self) -> bool {
        self.lock().segmenter.is_degraded()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Wait until the hook is detected, the shell exits, or `timeout`
    /// passes. On timeout the session switches to degraded mode.
    pub async fn wait_until_started(&self, timeout: Duration) {
        let mut changes = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.lifecycle() != Lifecycle::Starting {
                return;
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return,
                Err(_) => {
                    self.degrade();
                    return;
                }
            }
        }
    }

    /// Give up on markers: everything from now on goes to one open Output
    /// block and input is always accepted.
    pub fn degrade(&self) {
        let mut state = self.lock();
        if state.lifecycle != Lifecycle::Starting {
            return;
        }
        let events = state.segmenter.degrade();
        self.apply(&mut state, events);
        state.lifecycle = Lifecycle::Ready;
        drop(state);
        warn!("No shell hook detected in session id={}; running degraded", self.id);
        self.bump();
    }

    /// Feed shell output into the engine. Every chunk bumps the revision so
    /// waiters can also follow content growth.
    pub(crate) fn ingest(&self, bytes: &[u8]) {
        let mut state = self.lock();
        let prompted = state
            .elevation
            .as_mut()
            .is_some_and(|watch| watch.scan(bytes));
        if prompted {
            state.elevation = None;
        }
        let events = state.segmenter.feed(bytes);
        self.apply(&mut state, events);
        drop(state);
        if prompted {
            self.answer_elevation_prompt();
        }
        self.bump();
    }

    /// Type the credential at the elevation program's prompt. Only ever
    /// done once, and only after the prompt was seen.
    fn answer_elevation_prompt(&self) {
        let Some(credential) = &self.credential else {
            return;
        };
        info!("Answering elevation prompt: id={}", self.id);
        if let Err(e) = self.process.write(&credential.as_keystrokes()) {
            warn!("Cannot answer elevation prompt in session id={}: {}", self.id, e);
        }
    }

    /// Translate engine events into lifecycle transitions.
    fn apply(&self, state: &mut SessionState, events: Vec<SegmentEvent>) {
        for event in events {
            match event {
                SegmentEvent::HookDetected => {
                    // The shell is up; a prompt seen from now on is not ours to answer.
                    state.elevation = None;
                    if state.lifecycle == Lifecycle::Starting {
                        state.lifecycle = Lifecycle::Ready;
                        info!("Shell hook detected: id={}", self.id);
                    }
                }
                SegmentEvent::BlockOpened {
                    seq,
                    kind: BlockKind::Output,
                } => {
                    if !state.segmenter.is_degraded() && state.lifecycle != Lifecycle::Terminated
                    {
                        state.lifecycle = Lifecycle::Running;
                        state.awaiting_command = false;
                    }
                    debug!("output block opened: id={} seq={}", self.id, seq);
                }
                SegmentEvent::BlockClosed {
                    seq,
                    kind: BlockKind::Output,
                    exit,
                } => {
                    if state.lifecycle == Lifecycle::Running && !state.awaiting_command {
                        state.lifecycle = Lifecycle::Ready;
                    }
                    debug!("output block closed: id={} seq={} exit={:?}", self.id, seq, exit);
                }
                SegmentEvent::InputEnded { after_command } => {
                    if !after_command && state.awaiting_command {
                        // The submitted line produced no command.
                        state.awaiting_command = false;
                        if state.lifecycle == Lifecycle::Running {
                            state.lifecycle = Lifecycle::Ready;
                        }
                    }
                }
                SegmentEvent::Violation(violation) => {
                    warn!("Protocol violation in session id={}: {}", self.id, violation);
                }
                SegmentEvent::BlockOpened { .. } | SegmentEvent::BlockClosed { .. } => {}
            }
        }
    }

    /// The shell's output stream ended.
    pub(crate) fn upstream_closed(&self, exit_code: Option<u32>) {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::Terminated {
            return;
        }
        let events = state.segmenter.finish(ExitStatus::NotObserved);
        self.apply(&mut state, events);
        state.lifecycle = Lifecycle::Terminated;
        state.awaiting_command = false;
        state.exit_code = exit_code;
        drop(state);

        warn!("Shell exited: id={} code={:?}", self.id, exit_code);
        if let Some(dir) = &self.hook_dir {
            dir.remove();
        }
        self.bump();
    }

    /// Stop the session: close any open block as terminated, stop draining
    /// and kill the process. Idempotent.
    pub fn terminate(&self) {
        {
            let mut state = self.lock();
            if state.lifecycle != Lifecycle::Terminated {
                let events = state.segmenter.finish(ExitStatus::Terminated);
                self.apply(&mut state, events);
                state.lifecycle = Lifecycle::Terminated;
                state.awaiting_command = false;
            }
        }

        if let Some(handle) = self.drain.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            if let Err(e) = self.process.kill() {
                debug!("kill failed for session id={}: {}", self.id, e);
            }
            info!("Session terminated: id={}", self.id);
        }

        if let Some(dir) = &self.hook_dir {
            dir.remove();
        }
        self.bump();
    }

    /// Submit a command line.
    ///
    /// Returns the sequence number from which the command's blocks will be
    /// numbered. Returns once the bytes were handed to the shell.
    pub fn submit_input(&self, text: &str) -> Result<u64> {
        if text.is_empty() {
            return Err(Error::InvalidInput("command text is empty".to_string()));
        }

        let (from_seq, degraded) = {
            let mut state = self.lock();
            match state.lifecycle {
                Lifecycle::Ready => {}
                Lifecycle::Terminated => return Err(Error::UpstreamTerminated(self.id)),
                lifecycle => {
                    return Err(Error::NotReady {
                        id: self.id,
                        lifecycle,
                    })
                }
            }
            state.elevation = None;
            let degraded = state.segmenter.is_degraded();
            if !degraded {
                state.lifecycle = Lifecycle::Running;
                state.awaiting_command = true;
            }
            (state.segmenter.store().next_seq(), degraded)
        };

        let bytes = if degraded {
            [text.as_bytes(), b"\r"].concat()
        } else {
            [CLEAR_LINE, PASTE_START, text.as_bytes(), PASTE_END, b"\r"].concat()
        };

        if let Err(e) = self.process.write(&bytes) {
            let mut state = self.lock();
            if state.lifecycle == Lifecycle::Running && state.awaiting_command {
                state.lifecycle = Lifecycle::Ready;
                state.awaiting_command = false;
            }
            return Err(self.write_error(&state, e));
        }

        debug!("input submitted: id={} bytes={}", self.id, text.len());
        self.bump();
        Ok(from_seq)
    }

    /// A write that failed because the session was terminated underneath
    /// it reports the termination.
    fn write_error(&self, state: &SessionState, error: Error) -> Error {
        if state.lifecycle == Lifecycle::Terminated {
            debug!("write after termination: id={} error={}", self.id, error);
            Error::UpstreamTerminated(self.id)
        } else {
            error
        }
    }

    /// Send raw keys to the running command.
    pub fn send_keys(&self, keys: &[u8]) -> Result<()> {
        self.check_command_running()?;
        self.process.write(keys)
    }

    /// Type the configured credential into the running command.
    pub fn enter_credential(&self) -> Result<()> {
        let credential = match (&self.credential, self.elevated) {
            (Some(credential), true) => credential,
            _ => {
                return Err(Error::PermissionDenied(format!(
                    "session {} was not created with root privilege",
                    self.id
                )))
            }
        };
        self.check_command_running()?;
        info!("Entering root password: id={}", self.id);
        self.process.write(&credential.as_keystrokes())
    }

    fn check_command_running(&self) -> Result<()> {
        let state = self.lock();
        match state.lifecycle {
            Lifecycle::Terminated => Err(Error::UpstreamTerminated(self.id)),
            Lifecycle::Running => Ok(()),
            _ if state.segmenter.is_degraded() => Ok(()),
            _ => Err(Error::NoCommandRunning(self.id)),
        }
    }

    /// Update label and/or description.
    pub fn set_metadata(&self, label: Option<String>, description: Option<String>) {
        let mut state = self.lock();
        if let Some(label) = label {
            state.label = Some(label);
        }
        if let Some(description) = description {
            state.description = Some(description);
        }
    }

    /// Read blocks. The open block is included with its content so far.
    pub fn read_blocks(&self, range: BlockRange) -> Vec<Block> {
        let state = self.lock();
        let store = state.segmenter.store();
        match range {
            BlockRange::Since(seq) => store.since(seq),
            BlockRange::Last(count) => store.last(count),
            BlockRange::All => store.since(0),
        }
    }

    /// Blocks from the most recent command onward, or everything.
    pub fn snapshot(&self, include_all: bool) -> Vec<Block> {
        let state = self.lock();
        let store = state.segmenter.store();
        if include_all {
            store.since(0)
        } else {
            store.latest_command_onward()
        }
    }

    /// Listing entry for this session.
    pub fn summary(&self) -> SessionSummary {
        let state = self.lock();
        SessionSummary {
            id: self.id,
            label: state.label.clone(),
            description: state.description.clone(),
            lifecycle: state.lifecycle,
            current_command: if state.lifecycle == Lifecycle::Running {
                state.segmenter.current_command()
            } else {
                None
            },
            elevated: self.elevated,
            degraded: state.segmenter.is_degraded(),
            block_count: state.segmenter.store().len(),
            protocol_violations: state.segmenter.violations(),
            exit_code: state.exit_code,
            created_at: self.created_at,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.drain.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            let _ = self.process.kill();
        }
    }
}

/// Move output from the shell into the session until end of stream.
async fn drain(session: Weak<Session>, mut events: mpsc::UnboundedReceiver<ShellEvent>) {
    let mut exit_code = None;
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            ShellEvent::Output(bytes) => session.ingest(&bytes),
            ShellEvent::Exited(code) => {
                exit_code = code;
                break;
            }
        }
    }
    if let Some(session) = session.upgrade() {
        session.upstream_closed(exit_code);
    }
}

/// Build the launch description for a session.
fn launch_spec(
    config: &ServerConfig,
    codec: &MarkerCodec,
    hook_dir: Option<&HookDir>,
    elevated: bool,
) -> LaunchSpec {
    let mut env: Vec<(String, String)> = vec![("TERM".to_string(), config.shell.term.clone())];
    if let Some(dir) = hook_dir {
        env.push(("ZDOTDIR".to_string(), dir.path().display().to_string()));
    }
    env.extend(
        config
            .shell
            .env
            .iter()
            .map(|var| (var.name.clone(), var.value.clone())),
    );

    let (program, args) = if elevated {
        // The elevation program resets the environment, so pass it through
        // `env` on its command line. `-k` makes it ask even with cached
        // credentials; the session answers only the prompt given here.
        let mut args = vec![
            "-S".to_string(),
            "-k".to_string(),
            "-p".to_string(),
            elevation_prompt(codec),
        ];
        args.push("env".to_string());
        args.extend(env.iter().map(|(key, value)| format!("{key}={value}")));
        args.push(config.shell.program.clone());
        args.extend(config.shell.args.iter().cloned());
        (config.security.elevation_program.clone(), args)
    } else {
        (config.shell.program.clone(), config.shell.args.clone())
    };

    LaunchSpec {
        program,
        args,
        env,
        cwd: config.shell.working_directory.clone(),
        rows: config.shell.rows,
        cols: config.shell.cols,
        codec: hook_dir.map(|_| codec.clone()),
    }
}
