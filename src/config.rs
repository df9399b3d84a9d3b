//! Configuration for stealthdl.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI on top of this)
//! 2. Environment variables (STEALTHDL_OUTPUT, STEALTHDL_PROFILE, STEALTHDL_PROXY)
//! 3. Config file (.stealthdl/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .stealthdl/config.yaml
//! - Falls back to ~/.stealthdl/config.yaml
//! - A relative output_dir is resolved against the directory holding .stealthdl/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::YtDlpConfig;
use crate::core::{Preset, ProfileOverrides};

/// Config directory name
pub const CONFIG_DIR: &str = ".stealthdl";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Default attempt budget per item
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub profile: Option<Preset>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub overrides: ProfileOverrides,
    #[serde(default)]
    pub ytdlp: Option<YtDlpConfig>,
}

/// Values taken from the environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub output_dir: Option<String>,
    pub profile: Option<String>,
    pub proxy: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            output_dir: std::env::var("STEALTHDL_OUTPUT").ok().filter(|v| !v.is_empty()),
            profile: std::env::var("STEALTHDL_PROFILE").ok().filter(|v| !v.is_empty()),
            proxy: std::env::var("STEALTHDL_PROXY").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Output root (progress file, sentinel, channel folders)
    pub output_dir: PathBuf,
    pub profile: Preset,
    pub max_retries: u32,
    pub overrides: ProfileOverrides,
    pub ytdlp: YtDlpConfig,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            profile: Preset::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            overrides: ProfileOverrides::default(),
            ytdlp: YtDlpConfig::default(),
            config_file: None,
        }
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|p| p.exists())
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
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
    }
}

/// Merge file and environment layers over the defaults
pub fn resolve(file: Option<(PathBuf, ConfigFile)>, env: &EnvOverrides) -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some((config_path, config)) = file {
        // Project root is the parent of .stealthdl/
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(ref output) = config.output_dir {
            resolved.output_dir = resolve_path(base_dir, output);
        }
        if let Some(profile) = config.profile {
            resolved.profile = profile;
        }
        if let Some(max_retries) = config.max_retries {
            resolved.max_retries = max_retries;
        }
        resolved.overrides = config.overrides;
        if let Some(ytdlp) = config.ytdlp {
            resolved.ytdlp = ytdlp;
        }
        resolved.config_file = Some(config_path);
    }

    if let Some(ref output) = env.output_dir {
        resolved.output_dir = PathBuf::from(output);
    }
    if let Some(ref profile) = env.profile {
        resolved.profile = profile
            .parse()
            .with_context(|| format!("Invalid STEALTHDL_PROFILE: {}", profile))?;
    }
    if let Some(ref proxy) = env.proxy {
        resolved.ytdlp.proxy = Some(proxy.clone());
    }

    Ok(resolved)
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config_path = find_config_file(&cwd).or_else(home_config_file);

    let file = match config_path {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(file, &EnvOverrides::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, &EnvOverrides::default()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("downloads"));
        assert_eq!(config.profile, Preset::High);
        assert_eq!(config.max_retries, 3);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
output_dir: audio
profile: paranoid
max_retries: 5
overrides:
  min_wait: 900
ytdlp:
  binary: /opt/yt-dlp
  cookies: /tmp/cookies.txt
  proxy: socks5://127.0.0.1:9050
"#,
        );

        let file = load_config_file(&path).unwrap();
        let config = resolve(Some((path.clone(), file)), &EnvOverrides::default()).unwrap();

        assert_eq!(config.output_dir, temp.path().join("audio"));
        assert_eq!(config.profile, Preset::Paranoid);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.overrides.min_wait, Some(900));
        assert_eq!(config.overrides.max_wait, None);
        assert_eq!(config.ytdlp.binary, "/opt/yt-dlp");
        assert_eq!(config.ytdlp.quality, "192");
        assert_eq!(config.ytdlp.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_env_beats_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "profile: low\noutput_dir: here");
        let file = load_config_file(&path).unwrap();
        let env = EnvOverrides {
            output_dir: Some("/data/audio".to_string()),
            profile: Some("medium".to_string()),
            proxy: Some("http://proxy:8080".to_string()),
        };

        let config = resolve(Some((path, file)), &env).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/data/audio"));
        assert_eq!(config.profile, Preset::Medium);
        assert_eq!(config.ytdlp.proxy.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn test_invalid_env_profile() {
        let env = EnvOverrides {
            profile: Some("ninja".to_string()),
            ..EnvOverrides::default()
        };
        assert!(resolve(None, &env).is_err());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "profile: low");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }
}
