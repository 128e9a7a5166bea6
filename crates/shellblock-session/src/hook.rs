//! zsh hook installation.
//!
//! zsh reads its startup files from `$ZDOTDIR`. Each hooked session gets a
//! private directory whose `.zshrc` sources the user's own `.zshrc` and then
//! installs the marker hook, and the shell is started with `ZDOTDIR` pointing there.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;
use tracing::debug;

use shellblock_core::{Error, Result};
use shellblock_engine::MarkerCodec;

/// Generate the zsh hook emitting markers for `codec`.
///
/// `preexec` announces the command (hex-encoded), ends the input phase and
/// starts output. `precmd` runs first among the precmd functions so `$?` is
/// still the command's status; it closes the output, or, when no command
/// ran, ends the input phase. The first prompt therefore always emits a
/// marker, which doubles as the handshake.
pub fn zsh_hook_script(codec: &MarkerCodec) -> String {
    format!(
        r#"
# --- shellblock markers ---
typeset -g __shellblock_sentinel=$'\eP'"shellblock;{nonce};"
typeset -g __shellblock_st=$'\e\\'
typeset -gi __shellblock_exec_open=0

__shellblock_hex() {{
  print -rn -- "$1" | command od -An -v -tx1 | command tr -d ' \n'
}}

__shellblock_preexec() {{
  print -rn -- "${{__shellblock_sentinel}}I;$(__shellblock_hex "$1")${{__shellblock_st}}"
  print -rn -- "${{__shellblock_sentinel}}i${{__shellblock_st}}"
  print -rn -- "${{__shellblock_sentinel}}O${{__shellblock_st}}"
  __shellblock_exec_open=1
}}

__shellblock_precmd() {{
  local ret=$?
  if (( __shellblock_exec_open )); then
    print -rn -- "${{__shellblock_sentinel}}o;${{ret}}${{__shellblock_st}}"
    __shellblock_exec_open=0
  else
    print -rn -- "${{__shellblock_sentinel}}i${{__shellblock_st}}"
  fi
}}

typeset -ga preexec_functions precmd_functions
(( ${{preexec_functions[(Ie)__shellblock_preexec]}} )) || preexec_functions+=(__shellblock_preexec)
(( ${{precmd_functions[(Ie)__shellblock_precmd]}} )) || precmd_functions=(__shellblock_precmd $precmd_functions)
"#,
        nonce = codec.nonce()
    )
}

/// A private temporary `ZDOTDIR` holding the hooked `.zshrc`. Removed on
/// [`HookDir::remove`] or drop.
#[derive(Debug)]
pub struct HookDir {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl HookDir {
    /// Create the directory under the system temp dir.
    pub fn create(codec: &MarkerCodec) -> Result<Self> {
        Self::create_in(&std::env::temp_dir(), codec, user_zshrc().as_deref())
    }

    /// Create the directory under `parent`. The generated `.zshrc` sources
    /// `user_zshrc` when given, then installs the hook. Only the owner can
    /// read the directory.
    pub fn create_in(parent: &Path, codec: &MarkerCodec, user_zshrc: Option<&Path>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("shellblock-")
            .tempdir_in(parent)
            .map_err(|e| {
                Error::Other(format!(
                    "cannot create hook directory in {}: {}",
                    parent.display(),
                    e
                ))
            })?;

        let mut zshrc = String::new();
        if let Some(file) = user_zshrc {
            let quoted = shell_quote(&file.to_string_lossy());
            zshrc.push_str(&format!("[[ -r {quoted} ]] && source {quoted}\n"));
        }
        zshrc.push_str(&zsh_hook_script(codec));
        write_private(&dir.path().join(".zshrc"), &zshrc)?;

        debug!("hook directory created at {}", dir.path().display());
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    /// Directory to pass as `ZDOTDIR`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory. Idempotent.
    pub fn remove(&self) {
        let dir = self
            .dir
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(dir) = dir {
            if let Err(e) = dir.close() {
                debug!("cannot remove {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for HookDir {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

/// Single-quote `text` for zsh.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// The `.zshrc` zsh would read without our `ZDOTDIR`.
fn user_zshrc() -> Option<PathBuf> {
    std::env::var_os("ZDOTDIR")
        .or_else(|| std::env::var_os("HOME"))
        .map(|dir| PathBuf::from(dir).join(".zshrc"))
}
