//! Configuration for the dealmemo client.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DEALMEMO_API_URL, DEALMEMO_TOKEN, DEALMEMO_HOME)
//! 2. Config file (.dealmemo/config.yaml)
//! 3. Defaults (local backend, ~/.dealmemo)
//!
//! Config file discovery:
//! - Searches current directory and parents for .dealmemo/config.yaml
//! - A relative `home` is resolved against the .dealmemo/ directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub home: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: Option<u64>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Local state directory (submission ledger)
    pub home: PathBuf,
    pub api: ApiSettings,
    pub polling: PollingSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    /// Bearer token; only ever read from the environment
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".dealmemo").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge config file, environment and defaults
fn resolve(
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let file = match &config_file {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Some(env_home) = env("DEALMEMO_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        &config_file,
        file.as_ref().and_then(|f| f.home.as_deref()),
    ) {
        let dealmemo_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(dealmemo_dir, home)
    } else {
        default_home
    };

    let base_url = env("DEALMEMO_API_URL")
        .or_else(|| file.as_ref().and_then(|f| f.api.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let timeout_seconds = file
        .as_ref()
        .and_then(|f| f.api.timeout_seconds)
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

    let interval_ms = file
        .as_ref()
        .and_then(|f| f.polling.interval_ms)
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if interval_ms == 0 {
        anyhow::bail!("polling.interval_ms must be greater than zero");
    }

    Ok(ResolvedConfig {
        home,
        api: ApiSettings {
            base_url,
            token: env("DEALMEMO_TOKEN").filter(|t| !t.trim().is_empty()),
            timeout_seconds,
        },
        polling: PollingSettings { interval_ms },
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".dealmemo");

    let config_file = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_file(&cwd));

    resolve(config_file, |key| std::env::var(key).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the dealmemo home directory (local state).
pub fn dealmemo_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, no_env, PathBuf::from("/home/sam/.dealmemo")).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/sam/.dealmemo"));
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.polling.interval_ms, 2000);
        assert!(config.api.token.is_none());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing_and_discovery() {
        let temp = TempDir::new().unwrap();
        let dealmemo_dir = temp.path().join(".dealmemo");
        std::fs::create_dir_all(&dealmemo_dir).unwrap();

        let config_path = dealmemo_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
home: ./state
api:
  base_url: https://api.dealmemo.app/api
  timeout_seconds: 10
polling:
  interval_ms: 500
"#
        )
        .unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, config_path);

        let config = resolve(Some(found), no_env, PathBuf::from("/unused")).unwrap();
        assert_eq!(config.api.base_url, "https://api.dealmemo.app/api");
        assert_eq!(config.api.timeout_seconds, 10);
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.home, dealmemo_dir.join("./state"));
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("DEALMEMO_API_URL", "https://staging.dealmemo.app/api"),
            ("DEALMEMO_TOKEN", "tok_123"),
            ("DEALMEMO_HOME", "/tmp/dm"),
        ]
        .into_iter()
        .collect();

        let config = resolve(
            None,
            |k| env.get(k).map(|v| v.to_string()),
            PathBuf::from("/unused"),
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://staging.dealmemo.app/api");
        assert_eq!(config.api.token.as_deref(), Some("tok_123"));
        assert_eq!(config.home, PathBuf::from("/tmp/dm"));
    }

    #[test]
    fn test_blank_token_ignored() {
        let config = resolve(
            None,
            |k| (k == "DEALMEMO_TOKEN").then(|| "   ".to_string()),
            PathBuf::from("/unused"),
        )
        .unwrap();
        assert!(config.api.token.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
