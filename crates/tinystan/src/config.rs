//! Configuration for the TinyStan bindings
//!
//! Sources, highest precedence first:
//! 1. Environment variables (`TINYSTAN`, `TINYSTAN_MAKE`, ...)
//! 2. The first configuration file found (`$TINYSTAN_CONFIG`, `.tinystan.toml`, ...)
//! 3. Built-in defaults

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tinystan_logging::{LoggingGuard, LoggingOptions};

use crate::error::{Result, TinyStanError};
use crate::options::Bound;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TinyStanConfig {
    /// Model compilation
    #[serde(default)]
    pub build: BuildConfig,
    /// Library loading and native calls
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BuildConfig {
    /// Checkout of the TinyStan sources used to compile models
    pub tinystan_home: Option<PathBuf>,
    /// `make` executable; `mingw32-make` on Windows when unset
    pub make_command: Option<String>,
    /// Extra arguments for stanc, appended to `STANCFLAGS`
    #[serde(default)]
    pub stanc_args: Vec<String>,
    /// Extra arguments for make, placed before the target
    #[serde(default)]
    pub make_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Forward native print output to the `log` facade
    #[serde(default = "default_true")]
    pub capture_stan_prints: bool,
    /// Warn when a library path is loaded a second time
    #[serde(default = "default_true")]
    pub warn_on_reload: bool,
    /// Thread count used when an algorithm leaves it at -1
    #[serde(default = "default_num_threads")]
    pub default_num_threads: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            capture_stan_prints: true,
            warn_on_reload: true,
            default_num_threads: default_num_threads(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        Bound::ThreadCount.check("default_num_threads", self.default_num_threads.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Format log records to stderr
    #[serde(default)]
    pub stderr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl LoggingConfig {
    pub fn to_options(&self) -> LoggingOptions {
        LoggingOptions {
            default_level: self.level.as_str().to_string(),
            stderr: self.stderr,
        }
    }
}

impl TinyStanConfig {
    /// Install the logging subscriber described by `self.logging`.
    pub fn init_logging(&self) -> LoggingGuard {
        tinystan_logging::init_logging(self.logging.to_options())
    }
}

fn default_true() -> bool {
    true
}

fn default_num_threads() -> i32 {
    -1
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper precedence
    pub fn load() -> Result<TinyStanConfig> {
        let mut config = Self::load_from_files()?;
        Self::apply_environment_variables(&mut config);
        Ok(config)
    }

    fn load_from_files() -> Result<TinyStanConfig> {
        for path in Self::find_config_files() {
            if path.is_dir() {
                debug!(
                    "Ignoring config directory path (expected file): {}",
                    path.display()
                );
                continue;
            }
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                return Self::load_from_file(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(TinyStanConfig::default())
    }

    fn find_config_files() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(config_path) = env::var("TINYSTAN_CONFIG") {
            paths.push(PathBuf::from(config_path));
        }

        if let Ok(current_dir) = env::current_dir() {
            for name in [
                ".tinystan.toml",
                ".tinystan.yaml",
                ".tinystan.yml",
                ".tinystan.json",
            ] {
                paths.push(current_dir.join(name));
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".config/tinystan/config.toml"));
            paths.push(home_dir.join(".config/tinystan/config.yaml"));
            paths.push(home_dir.join(".config/tinystan/config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<TinyStanConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            TinyStanError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;

        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .or_else(|_| serde_json::from_str(&content))
                .map_err(|_| "tried TOML, YAML and JSON".to_string()),
        };

        let config: TinyStanConfig = parsed.map_err(|e| {
            TinyStanError::Config(format!("could not parse '{}': {e}", path.display()))
        })?;
        config.runtime.validate().map_err(|e| {
            TinyStanError::Config(format!("invalid '{}': {e}", path.display()))
        })?;
        Ok(config)
    }

    fn apply_environment_variables(config: &mut TinyStanConfig) {
        if let Some(home) = non_empty_var("TINYSTAN") {
            config.build.tinystan_home = Some(PathBuf::from(home));
        }

        if let Some(make) = non_empty_var("TINYSTAN_MAKE") {
            config.build.make_command = Some(make);
        }

        if let Some(flag) = env::var("TINYSTAN_CAPTURE_PRINTS")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.runtime.capture_stan_prints = flag;
        }

        if let Some(flag) = env::var("TINYSTAN_WARN_ON_RELOAD")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            config.runtime.warn_on_reload = flag;
        }

        if let Ok(threads) = env::var("TINYSTAN_NUM_THREADS") {
            if let Ok(threads) = threads.trim().parse::<i32>() {
                if Bound::ThreadCount.holds(threads.into()) {
                    config.runtime.default_num_threads = threads;
                }
            }
        }

        if let Some(level) = env::var("TINYSTAN_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            config.logging.level = level;
        }
    }

    /// Save configuration to a file; the format follows the extension
    pub fn save_to_file(config: &TinyStanConfig, path: &Path) -> Result<()> {
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(config).map_err(|e| e.to_string()),
            Some("json") => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
            _ => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        }
        .map_err(|e| TinyStanError::Config(format!("failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean value from string with various formats
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
