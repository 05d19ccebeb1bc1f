//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`~/.config/peercall/config.toml` by default)
//! - Environment variables (`PEERCALL_*`)
//! - CLI arguments (for the binary)
//!
//! Environment values override the file; CLI flags override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CallError, Result};
use crate::negotiation::TieBreak;

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000";

/// Default STUN server handed to the media stack
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local identity
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Relay connection
    #[serde(default)]
    pub relay: RelayConfig,

    /// Negotiation behaviour
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Local media
    #[serde(default)]
    pub media: MediaConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CallError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| CallError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("PEERCALL_NAME") {
            config.identity.name = Some(name);
        }
        if let Some(url) = lookup("PEERCALL_RELAY_URL") {
            config.relay.url = url;
        }
        if let Some(capacity) = lookup("PEERCALL_CHANNEL_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                config.relay.channel_capacity = capacity;
            }
        }
        if let Some(rule) = lookup("PEERCALL_TIE_BREAK") {
            if let Ok(rule) = rule.parse() {
                config.negotiation.tie_break = rule;
            }
        }

        config
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("peercall").join("config.toml"))
    }

    /// File (explicit path, else default location if present) merged with
    /// the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    debug!(path = %path.display(), "Loading default config file");
                    Self::from_file(path)?
                },
                None => Self::default(),
            },
        };

        Ok(file.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let relay_defaults = RelayConfig::default();
        let negotiation_defaults = NegotiationConfig::default();

        Self {
            identity: IdentityConfig {
                name: other.identity.name.or(self.identity.name),
            },
            relay: RelayConfig {
                url: if other.relay.url != relay_defaults.url {
                    other.relay.url
                } else {
                    self.relay.url
                },
                channel_capacity: if other.relay.channel_capacity
                    != relay_defaults.channel_capacity
                {
                    other.relay.channel_capacity
                } else {
                    self.relay.channel_capacity
                },
            },
            negotiation: NegotiationConfig {
                tie_break: if other.negotiation.tie_break != negotiation_defaults.tie_break {
                    other.negotiation.tie_break
                } else {
                    self.negotiation.tie_break
                },
            },
            media: if other.media != MediaConfig::default() {
                other.media
            } else {
                self.media
            },
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CallError::Config(format!("Failed to serialize config: {e}")))
    }
}

/// Local identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display name registered with the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Relay connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay endpoint
    pub url: String,

    /// Agent input channel capacity
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            channel_capacity: 64,
        }
    }
}

/// Negotiation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Glare rule; must match on both peers
    pub tie_break: TieBreak,
}

/// Local media configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Capture microphone
    pub audio: bool,

    /// Capture camera
    pub video: bool,

    /// STUN servers for the peer transport
    pub stun_servers: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.url, "ws://127.0.0.1:3000");
        assert_eq!(config.relay.channel_capacity, 64);
        assert_eq!(config.negotiation.tie_break, TieBreak::LowerYields);
        assert!(config.media.audio && config.media.video);
        assert_eq!(config.media.stun_servers, vec![DEFAULT_STUN_SERVER]);
        assert!(config.identity.name.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [identity]
            name = "alice"

            [relay]
            url = "ws://relay.example:4000"

            [negotiation]
            tie_break = "higher-yields"

            [media]
            video = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.identity.name.as_deref(), Some("alice"));
        assert_eq!(config.relay.url, "ws://relay.example:4000");
        assert_eq!(config.relay.channel_capacity, 64);
        assert_eq!(config.negotiation.tie_break, TieBreak::HigherYields);
        assert!(config.media.audio);
        assert!(!config.media.video);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nchannel_capacity = 8").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.relay.channel_capacity, 8);

        writeln!(file, "[relay\nbroken").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(CallError::Config(_))
        ));
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PEERCALL_NAME", "bob"),
            ("PEERCALL_TIE_BREAK", "higher"),
            ("PEERCALL_CHANNEL_CAPACITY", "not-a-number"),
        ]);
        let config = Config::from_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.identity.name.as_deref(), Some("bob"));
        assert_eq!(config.negotiation.tie_break, TieBreak::HigherYields);
        assert_eq!(config.relay.channel_capacity, 64);
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let file: Config = toml::from_str(
            r#"
            [identity]
            name = "alice"
            [relay]
            url = "ws://file:1"
            "#,
        )
        .unwrap();
        let env = Config::from_vars(|key| {
            (key == "PEERCALL_TIE_BREAK").then(|| "higher-yields".to_string())
        });

        let merged = file.merge(env);
        assert_eq!(merged.identity.name.as_deref(), Some("alice"));
        assert_eq!(merged.relay.url, "ws://file:1");
        assert_eq!(merged.negotiation.tie_break, TieBreak::HigherYields);
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("tie_break = \"lower-yields\""));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
