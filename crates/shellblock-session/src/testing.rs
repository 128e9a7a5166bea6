//! A scripted in-process shell for tests.
//!
//! [`ScriptedLauncher`] behaves like a hooked zsh without spawning
//! anything: it echoes submitted lines, emits markers around each command
//! and understands a handful of commands:
//!
//! | command    | behavior                                          |
//! |------------|---------------------------------------------------|
//! | `echo X`   | prints `X`, status 0                              |
//! | `true`     | status 0                                          |
//! | `false`    | status 1                                          |
//! | `exit N`   | the shell exits with code N                       |
//! | `sleep ..` | runs until Ctrl-C, then status 130                |
//! | `read ..`  | prompts, waits for a line, prints `ok`, status 0  |
//! | other      | `command not found`, status 127                   |
//!
//! A blank line produces no command, only an input-end marker.
//!
//! Launched through the elevation program (`-S -p PROMPT ...`), the shell
//! prints the prompt and starts once it receives a line, unless built with
//! [`ScriptedLauncher::without_elevation_prompt`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use shellblock_core::{Error, Result};
use shellblock_engine::{Marker, MarkerCodec};

use crate::pty::{LaunchSpec, LaunchedShell, ShellEvent, ShellLauncher, ShellProcess};

const PROMPT: &[u8] = b"$ ";

/// Test double for [`ShellLauncher`].
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    hookless: bool,
    fail_writes: bool,
    skip_elevation_prompt: bool,
    chunk_size: Option<usize>,
    launches: Mutex<Vec<LaunchSpec>>,
}

impl ScriptedLauncher {
    /// Shells emit markers whenever the session installs a hook.
    pub fn hooked() -> Self {
        Self::default()
    }

    /// Shells never emit markers, as if the hook failed to load.
    pub fn hookless() -> Self {
        Self {
            hookless: true,
            ..Self::default()
        }
    }

    /// Every write to the shell fails.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Elevation succeeds without asking for a password, as with NOPASSWD.
    pub fn without_elevation_prompt(mut self) -> Self {
        self.skip_elevation_prompt = true;
        self
    }

    /// Deliver output in chunks of at most `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Number of shells launched.
    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The most recent launch request.
    pub fn last_spec(&self) -> Option<LaunchSpec> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ShellLauncher for ScriptedLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedShell> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());

        let elevation_prompt = match spec.args.first().map(String::as_str) {
            Some("-S") if !self.skip_elevation_prompt => spec
                .args
                .iter()
                .position(|arg| arg == "-p")
                .and_then(|index| spec.args.get(index + 1))
                .cloned(),
            _ => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut shell = ScriptedShell {
            tx: Some(tx),
            codec: if self.hookless { None } else { spec.codec.clone() },
            chunk_size: self.chunk_size,
            running: Running::Nothing,
            awaiting_elevation: elevation_prompt.is_some(),
        };
        match &elevation_prompt {
            Some(prompt) => shell.emit(prompt.as_bytes()),
            None => shell.greet(),
        }

        Ok(LaunchedShell {
            process: Box::new(ScriptedProcess {
                shell: Arc::new(Mutex::new(shell)),
                fail_writes: self.fail_writes,
            }),
            events: rx,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Running {
    Nothing,
    Sleep,
    Read,
}

struct ScriptedShell {
    tx: Option<mpsc::UnboundedSender<ShellEvent>>,
    codec: Option<MarkerCodec>,
    chunk_size: Option<usize>,
    running: Running,
    awaiting_elevation: bool,
}

impl ScriptedShell {
    fn emit(&self, bytes: &[u8]) {
        let Some(tx) = &self.tx else {
            return;
        };
        let size = self.chunk_size.unwrap_or(bytes.len()).max(1);
        for chunk in bytes.chunks(size) {
            let _ = tx.send(ShellEvent::Output(chunk.to_vec()));
        }
    }

    fn marker(&self, marker: Marker) {
        if let Some(codec) = &self.codec {
            self.emit(&codec.encode(&marker));
        }
    }

    fn greet(&self) {
        self.emit(b"scripted shell\r\n");
        // The first prompt runs precmd with no command pending.
        self.marker(Marker::InputEnd);
        self.emit(PROMPT);
    }

    fn finish_command(&mut self, status: i32) {
        self.running = Running::Nothing;
        self.marker(Marker::OutputEnd(status));
        self.emit(PROMPT);
    }

    fn exit(&mut self, code: u32) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(ShellEvent::Exited(Some(code)));
        }
    }

    fn input(&mut self, bytes: &[u8]) {
        if self.awaiting_elevation {
            self.awaiting_elevation = false;
            self.emit(b"\r\n");
            self.greet();
            return;
        }

        match self.running {
            Running::Sleep | Running::Read if bytes.contains(&0x03) => {
                self.emit(b"^C\r\n");
                self.finish_command(130);
            }
            Running::Read if bytes.contains(&b'\r') => {
                self.emit(b"\r\nok\r\n");
                self.finish_command(0);
            }
            Running::Sleep | Running::Read => {}
            Running::Nothing => self.line(&command_line(bytes)),
        }
    }

    fn line(&mut self, line: &str) {
        self.emit(line.as_bytes());
        self.emit(b"\r\n");

        if line.trim().is_empty() {
            self.marker(Marker::InputEnd);
            self.emit(PROMPT);
            return;
        }

        self.marker(Marker::InputStart(line.as_bytes().to_vec()));
        self.marker(Marker::InputEnd);
        self.marker(Marker::OutputStart);

        let (program, rest) = line
            .trim()
            .split_once(' ')
            .unwrap_or((line.trim(), ""));
        match program {
            "echo" => {
                self.emit(format!("{rest}\r\n").as_bytes());
                self.finish_command(0);
            }
            "true" => self.finish_command(0),
            "false" => self.finish_command(1),
            "exit" => self.exit(rest.trim().parse().unwrap_or(0)),
            "sleep" => self.running = Running::Sleep,
            "read" => {
                self.emit(b"Password: ");
                self.running = Running::Read;
            }
            other => {
                self.emit(format!("zsh: command not found: {other}\r\n").as_bytes());
                self.finish_command(127);
            }
        }
    }
}

/// Recover the submitted line from the bytes a session writes.
fn command_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches("\x05\x15");
    let text = text.strip_suffix('\r').unwrap_or(text);
    text.replace("\x1b[200~", "").replace("\x1b[201~", "")
}

struct ScriptedProcess {
    shell: Arc<Mutex<ScriptedShell>>,
    fail_writes: bool,
}

impl ShellProcess for ScriptedProcess {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(Error::PtyError("scripted write failure".to_string()));
        }
        let mut shell = self.shell.lock().unwrap_or_else(PoisonError::into_inner);
        if shell.tx.is_none() {
            return Err(Error::PtyError("shell has exited".to_string()));
        }
        shell.input(bytes);
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        self.shell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .take();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(codec: Option<MarkerCodec>) -> LaunchSpec {
        LaunchSpec {
            program: "zsh".to_string(),
            args: vec!["-i".to_string()],
            env: Vec::new(),
            cwd: None,
            rows: 24,
            cols: 80,
            codec,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ShellEvent>) -> Vec<u8> {
        drain_all(events).0
    }

    fn drain_all(events: &mut mpsc::UnboundedReceiver<ShellEvent>) -> (Vec<u8>, Option<Option<u32>>) {
        let mut out = Vec::new();
        let mut exit = None;
        while let Ok(event) = events.try_recv() {
            match event {
                ShellEvent::Output(bytes) => out.extend(bytes),
                ShellEvent::Exited(code) => exit = Some(code),
            }
        }
        (out, exit)
    }

    #[test]
    fn test_command_line_unwraps_paste() {
        assert_eq!(command_line(b"\x05\x15\x1b[200~echo hi\x1b[201~\r"), "echo hi");
        assert_eq!(command_line(b"ls\r"), "ls");
    }

    #[test]
    fn test_hooked_echo_emits_markers() {
        let codec = MarkerCodec::new("feed");
        let mut launched = ScriptedLauncher::hooked()
            .launch(&spec(Some(codec.clone())))
            .unwrap();
        let greeting = drain(&mut launched.events);
        assert!(greeting.ends_with(&[codec.encode(&Marker::InputEnd), PROMPT.to_vec()].concat()));

        launched.process.write(b"echo hi\r").unwrap();
        let out = drain(&mut launched.events);
        let expected = [
            b"echo hi\r\n".to_vec(),
            codec.encode(&Marker::InputStart(b"echo hi".to_vec())),
            codec.encode(&Marker::InputEnd),
            codec.encode(&Marker::OutputStart),
            b"hi\r\n".to_vec(),
            codec.encode(&Marker::OutputEnd(0)),
            PROMPT.to_vec(),
        ]
        .concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_hookless_has_no_markers() {
        let mut launched = ScriptedLauncher::hookless()
            .launch(&spec(Some(MarkerCodec::new("feed"))))
            .unwrap();
        launched.process.write(b"echo hi\r").unwrap();
        let out = String::from_utf8(drain(&mut launched.events)).unwrap();
        assert!(!out.contains('\x1b'));
        assert!(out.contains("hi\r\n"));
    }

    #[test]
    fn test_exit_and_kill() {
        let launcher = ScriptedLauncher::hooked();
        let mut launched = launcher.launch(&spec(None)).unwrap();
        launched.process.write(b"exit 4\r").unwrap();
        let (_, exit) = drain_all(&mut launched.events);
        assert_eq!(exit, Some(Some(4)));
        assert!(launched.process.write(b"x\r").is_err());
        assert_eq!(launcher.launch_count(), 1);

        let mut other = launcher.launch(&spec(None)).unwrap();
        other.process.kill().unwrap();
        let (_, exit) = drain_all(&mut other.events);
        assert_eq!(exit, None);
        assert!(other.events.try_recv().is_err());
    }

    #[test]
    fn test_elevation_prompt_gates_greeting() {
        let mut elevated = spec(None);
        elevated.program = "sudo".to_string();
        elevated.args = ["-S", "-k", "-p", "pw? ", "env", "zsh", "-i"]
            .map(String::from)
            .to_vec();

        let mut launched = ScriptedLauncher::hooked().launch(&elevated).unwrap();
        assert_eq!(drain(&mut launched.events), b"pw? ");
        launched.process.write(b"secret\r").unwrap();
        let out = String::from_utf8(drain(&mut launched.events)).unwrap();
        assert!(out.contains("scripted shell"));
        assert!(!out.contains("secret"));

        let mut launched = ScriptedLauncher::hooked()
            .without_elevation_prompt()
            .launch(&elevated)
            .unwrap();
        let out = String::from_utf8(drain(&mut launched.events)).unwrap();
        assert!(out.starts_with("scripted shell"));
    }
}
