//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};
use crate::models::CurrentUser;

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub notifications: NotificationConfig,
    /// Bearer token from the last login
    pub token: Option<StoredToken>,
    /// Account the token belongs to
    pub user: Option<CurrentUser>,
}

/// Where the backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// REST base, e.g. `http://localhost:8000/api`
    pub api_base: String,
    /// Chat socket endpoint, e.g. `ws://localhost:8000/ws/chat/`
    pub ws_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api".to_string(),
            ws_url: "ws://localhost:8000/ws/chat/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Give up on the handshake after this many seconds. Unset waits forever.
    pub connect_timeout_secs: Option<u64>,
    /// Let `listen` reconnect with backoff after the link drops.
    pub reconnect: bool,
}

impl RealtimeConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub poll_interval_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

impl NotificationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("org", "remedi", "remedi-chat")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory for the TUI log file, created on demand.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = Self::project_dirs()?.data_dir().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        Ok(dir)
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// The stored token, refusing a missing or expired one.
    pub fn require_token(&self) -> Result<String> {
        match self.get_token() {
            Some(token) if !token.is_expired() => Ok(token.token),
            Some(_) => anyhow::bail!("Session expired. Run `remedi-chat login`."),
            None => anyhow::bail!("Not logged in. Run `remedi-chat login` first."),
        }
    }

    pub fn require_user(&self) -> Result<CurrentUser> {
        self.get_user()
            .context("No user profile stored. Run `remedi-chat login` first.")
    }
}

impl TokenStore for Config {
    fn get_token(&self) -> Option<StoredToken> {
        self.token.clone()
    }

    fn set_token(&mut self, token: StoredToken) {
        self.token = Some(token);
    }

    fn get_user(&self) -> Option<CurrentUser> {
        self.user.clone()
    }

    fn set_user(&mut self, user: CurrentUser) {
        self.user = Some(user);
    }

    fn clear_tokens(&mut self) {
        self.token = None;
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.api_base, "http://localhost:8000/api");
        assert_eq!(config.server.ws_url, "ws://localhost:8000/ws/chat/");
        assert_eq!(config.realtime.connect_timeout(), None);
        assert!(!config.realtime.reconnect);
        assert_eq!(config.notifications.interval(), Duration::from_secs(30));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            ws_url = "wss://remedi.example/ws/chat/"

            [realtime]
            connect_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.api_base, "http://localhost:8000/api");
        assert_eq!(config.server.ws_url, "wss://remedi.example/ws/chat/");
        assert_eq!(
            config.realtime.connect_timeout(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.notifications.poll_interval_secs, 30);
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let config = Config::parse("[realtime]\nconnect_timeout_secs = 0\n").unwrap();
        assert_eq!(config.realtime.connect_timeout(), None);
    }

    #[test]
    fn test_require_token() {
        let mut config = Config::default();
        assert!(config.require_token().is_err());

        config.set_token(StoredToken {
            token: "abc".into(),
            expires_at: None,
        });
        assert_eq!(config.require_token().unwrap(), "abc");

        config.set_token(StoredToken {
            token: "old".into(),
            expires_at: Some(1),
        });
        let err = config.require_token().unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_round_trip_and_clear() {
        let mut config = Config::default();
        config.set_token(StoredToken {
            token: "abc".into(),
            expires_at: Some(4_000_000_000),
        });
        config.set_user(CurrentUser {
            id: "7".into(),
            name: Some("Dana".into()),
            role: Role::Admin,
        });

        let text = toml::to_string_pretty(&config).unwrap();
        let loaded = Config::parse(&text).unwrap();
        assert_eq!(loaded.require_user().unwrap().id, "7");
        assert!(loaded.require_user().unwrap().is_admin());

        let mut loaded = loaded;
        loaded.clear_tokens();
        assert!(loaded.token.is_none());
        assert!(loaded.user.is_none());
    }
}
