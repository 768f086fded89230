//! Server configuration (config.toml)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置文件路径环境变量
pub const CONFIG_ENV: &str = "DEVBENCH_CONFIG";
/// 端口覆盖环境变量
pub const PORT_ENV: &str = "DEVBENCH_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Application configuration loaded from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub env: EnvSection,
    #[serde(default)]
    pub editor: EditorSection,
    #[serde(default)]
    pub logs: LogsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shell used for free-form `execute` commands
    pub shell: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shell: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4001
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSection {
    /// 数据根目录，默认 `~/.devbench`
    pub data_dir: Option<PathBuf>,
}

impl StorageSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// 永久项目目录：`<data_dir>/projects/<project_id>`
    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir().join("projects")
    }

    /// 生成器暂存目录，成功或失败后都会被清理
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir().join("scratch")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join("devbench.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".devbench"))
        .unwrap_or_else(|| PathBuf::from(".devbench"))
}

/// A program plus its arguments. `{name}` in an argument is replaced with the
/// project name when used as a generator step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    /// Run `npm install` in the scratch directory after the generator succeeds
    #[serde(default = "default_true")]
    pub install_dependencies: bool,
    pub install: Option<CommandSpec>,
    /// Per-framework override of the generator attempts, tried in order
    #[serde(default)]
    pub plans: HashMap<String, Vec<CommandSpec>>,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            install_dependencies: true,
            install: None,
            plans: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSection {
    #[serde(default = "default_true")]
    pub inherit: bool,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default)]
    pub path_prepend: PathConfig,
    #[serde(default)]
    pub path_append: PathConfig,
}

impl Default for EnvSection {
    fn default() -> Self {
        Self {
            inherit: true,
            vars: HashMap::new(),
            path_prepend: PathConfig::default(),
            path_append: PathConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorSection {
    #[serde(default = "default_true")]
    pub auto_save: bool,
    #[serde(default = "default_debounce_ms")]
    pub autosave_debounce_ms: u64,
}

impl Default for EditorSection {
    fn default() -> Self {
        Self {
            auto_save: true,
            autosave_debounce_ms: default_debounce_ms(),
        }
    }
}

impl EditorSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsSection {
    /// 是否把流式输出追加到每个项目的日志文件
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            persist: true,
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> i64 {
    7
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Lookup order: the explicit path, `DEVBENCH_CONFIG`, then
    /// `~/.devbench/config.toml`. A missing default file yields the defaults;
    /// a missing explicit file is an error. `DEVBENCH_PORT` overrides the port.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                Self::from_file(&path)?
            }
            None => {
                let path = default_data_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(port) = std::env::var(PORT_ENV)
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        {
            config.server.port = port;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Configuration rooted at a specific data directory, used by tests and embedders
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = Some(data_dir.into());
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 4001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.generator.install_dependencies);
        assert!(config.env.inherit);
        assert_eq!(config.editor.debounce(), Duration::from_millis(1000));
        assert_eq!(config.logs.retention_days, 7);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[server]
port = 4100

[storage]
data_dir = "/var/lib/devbench"

[generator]
install_dependencies = false

[[generator.plans.react]]
program = "sh"
args = ["-c", "mkdir src"]

[env.vars]
NODE_OPTIONS = "--max-old-space-size=4096"

[editor]
autosave_debounce_ms = 250
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.storage.projects_dir(),
            PathBuf::from("/var/lib/devbench/projects")
        );
        assert!(!config.generator.install_dependencies);
        assert_eq!(config.generator.plans["react"].len(), 1);
        assert_eq!(config.generator.plans["react"][0].args[1], "mkdir src");
        assert_eq!(config.env.vars["NODE_OPTIONS"], "--max-old-space-size=4096");
        assert!(config.editor.auto_save);
        assert_eq!(config.editor.autosave_debounce_ms, 250);
    }

    #[test]
    fn test_parse_error() {
        let err = AppConfig::from_toml_str("[server]\nport = \"not a port\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
