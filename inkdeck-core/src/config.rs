//! Session configuration stored at `<dir>/inkdeck.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cursor::TraversalFilterKind;
use crate::error::{DeckError, Result};

/// File name of the configuration inside its directory
pub const CONFIG_FILE_NAME: &str = "inkdeck.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Largest encoded operation accepted or produced, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Payloads at or above this size are zstd compressed.
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: usize,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Whether cursors record visited slides.
    #[serde(default = "default_track_visited")]
    pub track_visited: bool,
    /// Traversal filter for the session cursor.
    #[serde(default)]
    pub filter: TraversalFilterKind,
}

fn default_max_message_size() -> usize {
    64 * 1024 * 1024
}

fn default_compress_threshold() -> usize {
    16 * 1024
}

fn default_compression_level() -> i32 {
    3
}

fn default_track_visited() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            compress_threshold: default_compress_threshold(),
            compression_level: default_compression_level(),
            track_visited: default_track_visited(),
            filter: TraversalFilterKind::default(),
        }
    }
}

impl SessionConfig {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }

    /// Load from `dir`. A missing file yields the defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = Self::path_in(dir);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)?;
        let config: SessionConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to `dir` via a temporary file and rename.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = Self::path_in(dir);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(DeckError::Config(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(DeckError::Config(format!(
                "max_message_size {} exceeds the frame length limit of {} bytes",
                self.max_message_size,
                u32::MAX
            )));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(DeckError::Config(format!(
                "compression_level {} out of range 1..=22",
                self.compression_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::load(dir.path()).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.filter, TraversalFilterKind::SlidesOnly);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig {
            compress_threshold: 512,
            track_visited: false,
            filter: TraversalFilterKind::SkipStudentSubmissions,
            ..SessionConfig::default()
        };
        config.save(dir.path()).unwrap();
        assert!(!dir.path().join("inkdeck.tmp").exists());
        assert_eq!(SessionConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            SessionConfig::path_in(dir.path()),
            r#"{ "filter": "all", "compression_level": 9 }"#,
        )
        .unwrap();
        let config = SessionConfig::load(dir.path()).unwrap();
        assert_eq!(config.filter, TraversalFilterKind::All);
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.compress_threshold, 16 * 1024);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(SessionConfig::path_in(dir.path()), "{ not json").unwrap();
        assert!(matches!(
            SessionConfig::load(dir.path()),
            Err(DeckError::Config(_))
        ));

        fs::write(
            SessionConfig::path_in(dir.path()),
            r#"{ "compression_level": 40 }"#,
        )
        .unwrap();
        assert!(matches!(
            SessionConfig::load(dir.path()),
            Err(DeckError::Config(_))
        ));
    }

    #[test]
    fn test_max_message_size_fits_frame_header() {
        let at_limit = SessionConfig {
            max_message_size: u32::MAX as usize,
            ..SessionConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        let too_large = SessionConfig {
            max_message_size: u32::MAX as usize + 1,
            ..SessionConfig::default()
        };
        assert!(matches!(too_large.validate(), Err(DeckError::Config(_))));

        let dir = TempDir::new().unwrap();
        fs::write(
            SessionConfig::path_in(dir.path()),
            r#"{ "max_message_size": 8589934592 }"#,
        )
        .unwrap();
        assert!(matches!(
            SessionConfig::load(dir.path()),
            Err(DeckError::Config(_))
        ));
    }
}
