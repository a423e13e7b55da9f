use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::operators::{Exclusions, Operator};
use crate::pool::{PoolConfig, DEFAULT_BASE_PORT};

pub const CONFIG_FILE_NAME: &str = "jsmutator.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("framework `command` needs a test_command")]
    MissingTestCommand,
    #[error("framework `{0}` needs a server_command")]
    MissingServerCommand(&'static str),
    #[error("nothing to mutate: pass --mutate or set `mutate` in jsmutator.toml")]
    NothingToMutate,
}

/// Test framework adapters. Each one only supplies command templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Mocha,
    Nodeunit,
    /// Browser runner: a long-lived server per sandbox, tests triggered against its port.
    Karma,
    /// A user supplied `test_command`.
    Command,
}

impl TestFramework {
    pub fn name(self) -> &'static str {
        match self {
            TestFramework::Mocha => "mocha",
            TestFramework::Nodeunit => "nodeunit",
            TestFramework::Karma => "karma",
            TestFramework::Command => "command",
        }
    }

    pub fn default_test_command(self) -> Option<&'static str> {
        match self {
            TestFramework::Mocha => Some("mocha -b {specs}"),
            TestFramework::Nodeunit => Some("nodeunit --reporter minimal {specs}"),
            TestFramework::Karma => Some("karma run --port {port}"),
            TestFramework::Command => None,
        }
    }

    pub fn default_server_command(self) -> Option<&'static str> {
        match self {
            TestFramework::Karma => Some("karma start --port {port}"),
            _ => None,
        }
    }

    pub fn needs_server(self) -> bool {
        matches!(self, TestFramework::Karma)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_framework")]
    pub framework: TestFramework,

    /// Test command template. `{specs}` expands to the spec files, `{port}` to
    /// the runner port for server based frameworks.
    #[serde(default)]
    pub test_command: Option<String>,

    /// Long-lived runner command template, started through the runner pool.
    #[serde(default)]
    pub server_command: Option<String>,

    #[serde(default)]
    pub specs: Vec<PathBuf>,

    /// Source files to mutate, relative to the project root.
    #[serde(default)]
    pub mutate: Vec<PathBuf>,

    /// Operator codes to skip, in addition to the default excludes.
    #[serde(default)]
    pub exclude_mutations: BTreeSet<String>,

    /// Default-excluded operator codes to turn back on.
    #[serde(default)]
    pub include_mutations: BTreeSet<String>,

    #[serde(default = "default_max_active_servers")]
    pub max_active_servers: usize,

    #[serde(default = "default_start_interval_ms")]
    pub start_interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Hold tests back until a started runner accepts connections on its port,
    /// for at most `timeout_ms`.
    #[serde(default = "default_wait_for_server")]
    pub wait_for_server: bool,

    /// Number of sandbox copies tested concurrently.
    #[serde(default = "default_pipelines")]
    pub pipelines: usize,

    /// Entries symlinked into each sandbox instead of copied.
    #[serde(default = "default_symlinks")]
    pub symlinks: Vec<PathBuf>,

    /// Mutate the project in place instead of a sandbox copy.
    #[serde(default)]
    pub mutate_production_code: bool,

    /// Mirror test output to the console while capturing it.
    #[serde(default = "default_echo_output")]
    pub echo_output: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Captured stdout/stderr per mutant is truncated to this size.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_framework() -> TestFramework {
    TestFramework::Mocha
}

fn default_max_active_servers() -> usize {
    5
}

fn default_start_interval_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_wait_for_server() -> bool {
    true
}

fn default_pipelines() -> usize {
    1
}

fn default_symlinks() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules")]
}

fn default_echo_output() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            test_command: None,
            server_command: None,
            specs: Vec::new(),
            mutate: Vec::new(),
            exclude_mutations: BTreeSet::new(),
            include_mutations: BTreeSet::new(),
            max_active_servers: default_max_active_servers(),
            start_interval_ms: default_start_interval_ms(),
            timeout_ms: default_timeout_ms(),
            base_port: default_base_port(),
            wait_for_server: default_wait_for_server(),
            pipelines: default_pipelines(),
            symlinks: default_symlinks(),
            mutate_production_code: false,
            echo_output: default_echo_output(),
            log_level: default_log_level(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Config {
    /// Load `path`, or `jsmutator.toml` in `project_root` when no path is given.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (project_root.join(CONFIG_FILE_NAME), false),
        };
        if !required && !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_active_servers: self.max_active_servers.max(1),
            start_interval: Duration::from_millis(self.start_interval_ms),
            base_port: self.base_port,
            ready_timeout: self.wait_for_server.then(|| self.timeout()),
        }
    }

    pub fn test_command(&self) -> Result<String, ConfigError> {
        self.test_command
            .clone()
            .or_else(|| self.framework.default_test_command().map(String::from))
            .ok_or(ConfigError::MissingTestCommand)
    }

    /// Server command for frameworks that need a long-lived runner.
    pub fn server_command(&self) -> Result<Option<String>, ConfigError> {
        if !self.framework.needs_server() {
            return Ok(None);
        }
        self.server_command
            .clone()
            .or_else(|| self.framework.default_server_command().map(String::from))
            .map(Some)
            .ok_or(ConfigError::MissingServerCommand(self.framework.name()))
    }

    /// Check the settings a run depends on. Unknown operator codes are only warned about.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mutate.is_empty() {
            return Err(ConfigError::NothingToMutate);
        }
        self.test_command()?;
        self.server_command()?;
        for code in self.exclude_mutations.iter().chain(&self.include_mutations) {
            if Operator::from_code(code).is_none() {
                warn!(%code, "unknown mutation operator code");
            }
        }
        Ok(())
    }

    pub fn exclusions(&self) -> Exclusions {
        Exclusions::new(&self.exclude_mutations, &self.include_mutations)
    }

    /// Pipelines actually used. In-place runs have a single workspace.
    pub fn effective_pipelines(&self) -> usize {
        if self.mutate_production_code {
            1
        } else {
            self.pipelines.max(1)
        }
    }
}
