//! Configuration types for the shellblock server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Shell launch settings
    pub shell: ShellSettings,
    /// Block retention settings
    pub blocks: BlockSettings,
    /// Command execution settings
    pub execution: ExecutionSettings,
    /// Security settings
    pub security: SecuritySettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_sessions == 0 {
            return Err(invalid("server.max_sessions must be > 0"));
        }

        if self.shell.program.trim().is_empty() {
            return Err(invalid("shell.program cannot be empty"));
        }

        if self.shell.rows == 0 || self.shell.cols == 0 {
            return Err(invalid("shell dimensions must be > 0"));
        }

        if self.blocks.max_blocks == 0 {
            return Err(invalid("blocks.max_blocks must be > 0"));
        }

        if self.blocks.max_block_bytes == 0 {
            return Err(invalid("blocks.max_block_bytes must be > 0"));
        }

        if self.blocks.max_total_bytes < self.blocks.max_block_bytes {
            return Err(invalid(
                "blocks.max_total_bytes must be >= blocks.max_block_bytes",
            ));
        }

        if self.execution.default_timeout_ms > self.execution.max_timeout_ms {
            return Err(invalid(
                "execution.default_timeout_ms must be <= execution.max_timeout_ms",
            ));
        }

        for var in &self.shell.env {
            if var.name.is_empty() || var.name.contains('=') {
                return Err(crate::Error::Config(format!(
                    "invalid environment variable name '{}'",
                    var.name
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> crate::Error {
    crate::Error::Config(msg.to_string())
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Transport type (only stdio is served)
    pub transport: String,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// How long a new session may take to show its first marker before it
    /// runs in degraded mode
    pub startup_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            max_sessions: 10,
            log_level: "info".to_string(),
            startup_timeout_ms: 10_000,
        }
    }
}

impl ServerSettings {
    /// Startup timeout as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Shell launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    /// Shell program to run
    pub program: String,
    /// Arguments passed to the shell
    pub args: Vec<String>,
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// TERM environment variable value
    pub term: String,
    /// Working directory for new sessions (defaults to the server's)
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<EnvVar>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "zsh".to_string(),
            args: vec!["-i".to_string()],
            rows: 40,
            cols: 120,
            term: "xterm-256color".to_string(),
            working_directory: None,
            env: vec![],
        }
    }
}

impl ShellSettings {
    /// Whether the configured program is zsh, the only shell with a hook.
    pub fn is_zsh(&self) -> bool {
        Path::new(&self.program)
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == "zsh")
    }
}

/// An environment variable passed to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Block retention limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSettings {
    /// Maximum number of blocks retained per session
    pub max_blocks: usize,
    /// Maximum bytes stored per block; the rest is counted, not kept
    pub max_block_bytes: usize,
    /// Maximum bytes retained across all blocks of a session
    pub max_total_bytes: usize,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            max_blocks: 1000,
            max_block_bytes: 1024 * 1024,
            max_total_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Command execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Timeout used when a caller does not give one
    pub default_timeout_ms: u64,
    /// Upper bound for caller-supplied timeouts
    pub max_timeout_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_timeout_ms: 600_000,
        }
    }
}

impl ExecutionSettings {
    /// Resolve a caller-supplied timeout, falling back to the default and
    /// clamping to the maximum.
    pub fn resolve_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Program used to start elevated shells; it must read the credential
    /// from stdin when given `-S`
    pub elevation_program: String,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            elevation_program: "sudo".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.server.startup_timeout_ms, 10_000);
        assert_eq!(config.shell.program, "zsh");
        assert_eq!(config.shell.rows, 40);
        assert_eq!(config.shell.cols, 120);
        assert_eq!(config.blocks.max_blocks, 1000);
        assert_eq!(config.execution.default_timeout_ms, 5_000);
        assert_eq!(config.security.elevation_program, "sudo");
    }

    #[test]
    fn test_config_validation() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_sessions() {
        let mut config = ServerConfig::default();
        config.server.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut config = ServerConfig::default();
        config.shell.rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_block_limits() {
        let mut config = ServerConfig::default();
        config.blocks.max_blocks = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.blocks.max_total_bytes = config.blocks.max_block_bytes - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timeouts() {
        let mut config = ServerConfig::default();
        config.execution.default_timeout_ms = config.execution.max_timeout_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_shell_program() {
        let mut config = ServerConfig::default();
        config.shell.program = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: shell.program cannot be empty"
        );
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  transport: stdio
  max_sessions: 5
  log_level: debug
  startup_timeout_ms: 2000

shell:
  program: /bin/zsh
  args: ["-i"]
  rows: 30
  cols: 100
  env:
    - name: LANG
      value: C.UTF-8

blocks:
  max_blocks: 50
  max_block_bytes: 4096
  max_total_bytes: 65536

execution:
  default_timeout_ms: 1000
  max_timeout_ms: 60000
"#;

        let config = ServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.max_sessions, 5);
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.startup_timeout(), Duration::from_secs(2));
        assert_eq!(config.shell.program, "/bin/zsh");
        assert!(config.shell.is_zsh());
        assert_eq!(config.shell.rows, 30);
        assert_eq!(config.shell.env.len(), 1);
        assert_eq!(config.shell.env[0].name, "LANG");
        assert_eq!(config.blocks.max_blocks, 50);
        assert_eq!(config.execution.max_timeout_ms, 60000);
        // Omitted sections fall back to defaults
        assert_eq!(config.security.elevation_program, "sudo");
    }

    #[test]
    fn test_invalid_env_name() {
        let yaml = r#"
shell:
  env:
    - name: "A=B"
      value: x
"#;
        assert!(ServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = ServerConfig::from_yaml("server: [unclosed");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_is_zsh() {
        let mut shell = ShellSettings::default();
        assert!(shell.is_zsh());
        shell.program = "/usr/bin/bash".to_string();
        assert!(!shell.is_zsh());
    }

    #[test]
    fn test_resolve_timeout() {
        let exec = ExecutionSettings::default();
        assert_eq!(exec.resolve_timeout(None), Duration::from_millis(5_000));
        assert_eq!(exec.resolve_timeout(Some(250)), Duration::from_millis(250));
        assert_eq!(
            exec.resolve_timeout(Some(10_000_000)),
            Duration::from_millis(600_000)
        );
    }
}
