//! Server configuration: TOML file + CLI overrides.

use aurora_core::{AuroraError, AuroraResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// `[engine]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Grace period before a stop escalates to a forced kill.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

/// `[storage]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

fn default_port() -> u16 {
    8000
}
fn default_engine_binary() -> String {
    "gost".to_string()
}
fn default_stop_grace_ms() -> u64 {
    5000
}
fn default_data_file() -> String {
    "~/.aurora/rules.json".to_string()
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub engine_binary: PathBuf,
    pub stop_grace: Duration,
    pub data_file: PathBuf,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_engine: Option<&str>,
        cli_data_file: Option<&str>,
    ) -> AuroraResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| AuroraError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let port = cli_port.unwrap_or(file_config.server.port);
        let engine_str = cli_engine
            .map(|s| s.to_string())
            .unwrap_or(file_config.engine.binary);
        let data_file_str = cli_data_file
            .map(|s| s.to_string())
            .unwrap_or(file_config.storage.data_file);

        Ok(Self {
            port,
            engine_binary: expand_tilde_str(&engine_str),
            stop_grace: Duration::from_millis(file_config.engine.stop_grace_ms),
            data_file: expand_tilde_str(&data_file_str),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::load(None, None, None, None).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.engine_binary, PathBuf::from("gost"));
        assert_eq!(cfg.stop_grace, Duration::from_millis(5000));
    }

    #[test]
    fn cli_overrides_win() {
        let cfg =
            ServerConfig::load(None, Some(9001), Some("/usr/local/bin/gost"), Some("/tmp/r.json"))
                .unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.engine_binary, PathBuf::from("/usr/local/bin/gost"));
        assert_eq!(cfg.data_file, PathBuf::from("/tmp/r.json"));
    }

    #[test]
    fn file_values_parse() {
        let dir = std::env::temp_dir().join("aurora-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8100\n\n[engine]\nbinary = \"/opt/gost\"\nstop_grace_ms = 1000\n",
        )
        .unwrap();

        let cfg = ServerConfig::load(Some(path.as_path()), None, None, None).unwrap();
        assert_eq!(cfg.port, 8100);
        assert_eq!(cfg.engine_binary, PathBuf::from("/opt/gost"));
        assert_eq!(cfg.stop_grace, Duration::from_millis(1000));
    }

    #[test]
    fn bad_file_is_a_config_error() {
        let dir = std::env::temp_dir().join("aurora-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "server = \"not a table\"").unwrap();

        let err = ServerConfig::load(Some(path.as_path()), None, None, None).unwrap_err();
        assert!(matches!(err, AuroraError::Config(_)));
    }
}
