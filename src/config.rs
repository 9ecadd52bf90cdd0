//! Configuration for the task board client.
//!
//! Settings live in `.taskboard/taskboard.toml` and are layered
//! file → environment → CLI:
//!
//! ```toml
//! [backend]
//! kind = "rest"                       # local | rest | graphql
//! base_url = "https://boards.example.com/api"
//! graphql_url = "https://boards.example.com/graphql"
//! timeout_secs = 15
//! db_path = ".taskboard/board.db"     # local backend only
//!
//! [logging]
//! level = "info"
//! json = false
//! log_dir = ".taskboard/logs"
//! ```
//!
//! Environment overrides: `TASKBOARD_BACKEND`, `TASKBOARD_API_URL`,
//! `TASKBOARD_GRAPHQL_URL`, `TASKBOARD_TOKEN`, `TASKBOARD_DB_PATH`,
//! `TASKBOARD_LOG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".taskboard";
pub const CONFIG_FILE: &str = "taskboard.toml";

/// Which backend implementation the store talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite file on this machine
    #[default]
    Local,
    /// JSON over HTTP
    Rest,
    Graphql,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Rest => "rest",
            Self::Graphql => "graphql",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "rest" => Ok(Self::Rest),
            "graphql" => Ok(Self::Graphql),
            _ => anyhow::bail!(
                "Invalid backend '{}'. Valid values: local, rest, graphql",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token for remote backends. Prefer `TASKBOARD_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("board.db")
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            db_path: default_db_path(),
            base_url: None,
            graphql_url: None,
            timeout_secs: default_timeout_secs(),
            token: None,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files; stderr only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

/// The complete taskboard.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskboardToml {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TaskboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load `taskboard.toml` from `config_dir`, or defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Return human-readable warnings for settings that will fail at runtime.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match self.backend.kind {
            BackendKind::Rest if self.backend.base_url.is_none() => {
                warnings.push("backend.kind = \"rest\" requires backend.base_url".to_string());
            }
            BackendKind::Graphql if self.backend.graphql_url.is_none() => {
                warnings
                    .push("backend.kind = \"graphql\" requires backend.graphql_url".to_string());
            }
            _ => {}
        }
        for url in [&self.backend.base_url, &self.backend.graphql_url]
            .into_iter()
            .flatten()
        {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                warnings.push(format!("Backend URL '{}' is not an http(s) URL", url));
            }
        }
        if self.backend.timeout_secs == 0 {
            warnings.push("backend.timeout_secs must be greater than zero".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }
        warnings
    }
}

/// Resolved configuration: file, then environment, then CLI overrides.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: TaskboardToml,
    pub verbose: bool,
}

impl BoardConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = TaskboardToml::load_or_default(&config_dir)?;
        apply_env_overrides(&mut toml, |key| std::env::var(key).ok())?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        backend: Option<BackendKind>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(kind) = backend {
            config.toml.backend.kind = kind;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Backend settings with relative paths resolved against the project dir.
    pub fn backend(&self) -> BackendConfig {
        let mut backend = self.toml.backend.clone();
        if backend.db_path.is_relative() {
            backend.db_path = self.project_dir.join(&backend.db_path);
        }
        backend
    }

    pub fn logging(&self) -> LoggingConfig {
        let mut logging = self.toml.logging.clone();
        if self.verbose {
            logging.level = "debug".to_string();
        }
        if let Some(dir) = logging.log_dir.as_mut()
            && dir.is_relative()
        {
            *dir = self.project_dir.join(&*dir);
        }
        logging
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Apply `TASKBOARD_*` variables on top of the file settings.
fn apply_env_overrides(
    toml: &mut TaskboardToml,
    var: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(kind) = var("TASKBOARD_BACKEND") {
        toml.backend.kind = kind.parse().context("Invalid TASKBOARD_BACKEND")?;
    }
    if let Some(url) = var("TASKBOARD_API_URL") {
        toml.backend.base_url = Some(url);
    }
    if let Some(url) = var("TASKBOARD_GRAPHQL_URL") {
        toml.backend.graphql_url = Some(url);
    }
    if let Some(token) = var("TASKBOARD_TOKEN") {
        toml.backend.token = Some(token);
    }
    if let Some(path) = var("TASKBOARD_DB_PATH") {
        toml.backend.db_path = PathBuf::from(path);
    }
    if let Some(level) = var("TASKBOARD_LOG") {
        toml.logging.level = level;
    }
    Ok(())
}
