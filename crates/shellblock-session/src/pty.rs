//! Shell process launching.
//!
//! A [`ShellLauncher`] starts a shell and hands back two halves: a
//! [`ShellProcess`] to write input to and kill, and a channel of
//! [`ShellEvent`]s carrying output chunks and the exit status. The
//! production implementation, [`PtyLauncher`], runs the shell on a
//! pseudo-terminal with `portable-pty`.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use shellblock_core::{Error, Result};
use shellblock_engine::MarkerCodec;

/// Everything needed to start a shell.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// Markers the shell is expected to emit, when a hook is installed
    pub codec: Option<MarkerCodec>,
}

/// Output from a running shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A chunk of output bytes
    Output(Vec<u8>),
    /// The process exited; no output follows
    Exited(Option<u32>),
}

/// Input side of a running shell.
pub trait ShellProcess: Send + Sync {
    /// Write bytes to the shell's terminal input.
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Kill the process.
    fn kill(&self) -> Result<()>;

    /// Operating system process id, when known.
    fn pid(&self) -> Option<u32>;
}

/// A started shell. Dropping the receiver stops output delivery; closing of
/// the channel without an `Exited` event also means end of stream.
pub struct LaunchedShell {
    /// Input sink and kill switch
    pub process: Box<dyn ShellProcess>,
    /// Output stream
    pub events: mpsc::UnboundedReceiver<ShellEvent>,
}

impl std::fmt::Debug for LaunchedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedShell")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Starts shells.
pub trait ShellLauncher: Send + Sync {
    /// Start a shell described by `spec`.
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedShell>;
}

/// Launches shells on a native pseudo-terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyLauncher;

impl ShellLauncher for PtyLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedShell> {
        info!(
            "Spawning PTY: program='{}' args={:?} dimensions={}x{} cwd={:?}",
            spec.program, spec.args, spec.rows, spec.cols, spec.cwd
        );

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::PtyError(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn '{}': {}", spec.program, e);
            Error::PtyError(format!("Failed to spawn command: {e}"))
        })?;
        // Only the child keeps the slave end open, so its exit ends our reads.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyError(format!("Failed to take writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::PtyError(format!("Failed to clone reader: {e}")))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(format!("shellblock-pty-{}", pid.unwrap_or_default()))
            .spawn(move || {
                let mut buffer = [0u8; 8192];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(ShellEvent::Output(buffer[..n].to_vec())).is_err() {
                                // Receiver dropped
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            // EIO once the slave side is gone
                            debug!("PTY read ended: {}", e);
                            break;
                        }
                    }
                }
                let code = child.wait().ok().map(|status| status.exit_code());
                let _ = tx.send(ShellEvent::Exited(code));
            })
            .map_err(|e| Error::PtyError(format!("Failed to start reader thread: {e}")))?;

        info!("PTY spawned: program='{}' pid={:?}", spec.program, pid);

        Ok(LaunchedShell {
            process: Box::new(PtyProcess {
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
                _master: Mutex::new(pair.master),
                pid,
            }),
            events: rx,
        })
    }
}

struct PtyProcess {
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    // Dropping the master hangs up the terminal.
    _master: Mutex<Box<dyn MasterPty + Send>>,
    pid: Option<u32>,
}

impl ShellProcess for PtyProcess {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        debug!("Writing {} bytes to PTY", bytes.len());
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;
        writer
            .write_all(bytes)
            .map_err(|e| Error::PtyError(format!("Write failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| Error::PtyError(format!("Flush failed: {e}")))
    }

    fn kill(&self) -> Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;
        killer
            .kill()
            .map_err(|e| Error::PtyError(format!("Kill failed: {e}")))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: vec![("SHELLBLOCK_TEST".to_string(), "1".to_string())],
            cwd: None,
            rows: 24,
            cols: 80,
            codec: None,
        }
    }

    async fn collect(mut launched: LaunchedShell) -> (Vec<u8>, Option<Option<u32>>) {
        let mut output = Vec::new();
        let mut exit = None;
        while let Some(event) = launched.events.recv().await {
            match event {
                ShellEvent::Output(bytes) => output.extend(bytes),
                ShellEvent::Exited(code) => exit = Some(code),
            }
        }
        (output, exit)
    }

    #[tokio::test]
    async fn test_pty_launch_and_exit() {
        let launched = PtyLauncher
            .launch(&spec("sh", &["-c", "echo $SHELLBLOCK_TEST; exit 3"]))
            .unwrap();
        let (output, exit) =
            tokio::time::timeout(std::time::Duration::from_secs(10), collect(launched))
                .await
                .unwrap();
        assert!(String::from_utf8_lossy(&output).contains('1'));
        assert_eq!(exit, Some(Some(3)));
    }

    #[tokio::test]
    async fn test_pty_write_and_kill() {
        let mut launched = PtyLauncher.launch(&spec("cat", &[])).unwrap();
        assert!(launched.process.pid().is_some());
        launched.process.write(b"ping\r").unwrap();

        let mut output = Vec::new();
        let echoed = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while let Some(ShellEvent::Output(bytes)) = launched.events.recv().await {
                output.extend(bytes);
                if String::from_utf8_lossy(&output).contains("ping") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(echoed);

        launched.process.kill().unwrap();
        let (_, exit) =
            tokio::time::timeout(std::time::Duration::from_secs(10), collect(launched))
                .await
                .unwrap();
        assert!(exit.is_some());
    }

    #[test]
    fn test_spawn_failure_is_pty_error() {
        let result = PtyLauncher.launch(&spec("/nonexistent/shellblock-shell", &[]));
        assert!(matches!(result, Err(Error::PtyError(_))));
    }
}
