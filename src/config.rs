// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Environment variable that overrides the ffmpeg binary location when no
/// path is configured.
pub const FFMPEG_ENV: &str = "CLIPFORGE_FFMPEG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Explicit path to the ffmpeg binary. When unset, the `CLIPFORGE_FFMPEG`
    /// environment variable is consulted, then the system search path.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Directory containing subtitle fonts (joined with the requested font
    /// file name).
    #[serde(default = "default_font_dir")]
    pub font_dir: PathBuf,

    /// Directory scanned for background-music tracks when `bgm_type` is
    /// `random`.
    #[serde(default)]
    pub song_dir: Option<PathBuf>,

    /// Extra arguments appended to every encode invocation, shell-style
    /// (quoted strings with spaces are preserved).
    #[serde(default)]
    pub ffmpeg_extra_args: String,
}

fn default_font_dir() -> PathBuf {
    PathBuf::from("resource/fonts")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            font_dir: default_font_dir(),
            song_dir: None,
            ffmpeg_extra_args: String::new(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("clipforge")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("clipforge")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, falling back to built-in defaults when the
    /// file is missing or unreadable.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            let config: Config = toml::from_str(&contents).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?;

            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load config, swallowing errors; a broken config file must not take
    /// the whole pipeline down.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ffmpeg_path, None);
        assert_eq!(config.font_dir, PathBuf::from("resource/fonts"));
        assert_eq!(config.song_dir, None);
        assert_eq!(config.ffmpeg_extra_args, "");
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.ffmpeg_path = Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        config.ffmpeg_extra_args = "-movflags +faststart".to_string();

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(deserialized.ffmpeg_path, config.ffmpeg_path);
        assert_eq!(deserialized.ffmpeg_extra_args, config.ffmpeg_extra_args);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("song_dir = \"/srv/music\"").unwrap();
        assert_eq!(config.song_dir, Some(PathBuf::from("/srv/music")));
        assert_eq!(config.font_dir, PathBuf::from("resource/fonts"));
        assert_eq!(config.ffmpeg_path, None);
    }
}
