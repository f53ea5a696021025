use crate::engine::EngineConfig;
use crate::error::{Result, SyncError};
use crate::sync::policy::Strategy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Optional profile file: `~/.config/dsync/config.toml`
///
/// ```toml
/// [profiles.docs-backup]
/// strategy = "incremental"
/// ignore = ["target"]
///
/// [profiles.docs-backup.source]
/// type = "local"
/// path = "/home/nick/docs"
///
/// [profiles.docs-backup.destination]
/// type = "ftp"
/// path = "/backup/docs"
/// host = "server"
/// user = "nick"
/// password = "secret"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub source: Option<EngineConfig>,
    pub destination: Option<EngineConfig>,
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Cannot determine config directory".to_string()))?;
        Ok(base.join("dsync").join("config.toml"))
    }

    /// Load the profile file; a missing file is an empty config
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(SyncError::Io)?;
        Self::parse(&text).map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn list_profiles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profiles() {
        let config = Config::parse(
            r#"
            [profiles.docs]
            strategy = "twoWay"
            ignore = ["target", ".git"]

            [profiles.docs.source]
            type = "local"
            path = "/home/nick/docs"

            [profiles.docs.destination]
            type = "ftp"
            path = "/backup"
            host = "server"
            port = 2121
            user = "nick"
            password = "secret"
            secure = true
            "#,
        )
        .unwrap();

        assert_eq!(config.list_profiles(), vec!["docs"]);
        let profile = config.get_profile("docs").unwrap();
        assert_eq!(profile.strategy, Some(Strategy::TwoWay));
        assert_eq!(profile.ignore, vec!["target", ".git"]);
        assert!(matches!(
            profile.source,
            Some(EngineConfig::Local { .. })
        ));
        match profile.destination.as_ref().unwrap() {
            EngineConfig::Ftp { path, connection } => {
                assert_eq!(path, "/backup");
                assert_eq!(connection.port, 2121);
                assert!(connection.secure);
            }
            _ => panic!("Expected FTP destination"),
        }
    }

    #[test]
    fn test_empty_config() {
        let config = Config::parse("").unwrap();
        assert!(config.list_profiles().is_empty());
        assert!(config.get_profile("nope").is_none());
    }
}
