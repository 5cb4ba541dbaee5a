//! Configuration for the avatar client
//!
//! Values come from environment variables (the binary loads `.env` into the
//! environment at startup) and may be overridden by a YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment Variables
//!
//! ```bash
//! export AVATAR_URL="wss://avatar.cn-huadong-1.xf-yun.com/v1/interact"  # Optional
//! export AVATAR_API_KEY="your-api-key"
//! export AVATAR_API_SECRET="your-api-secret"
//! export AVATAR_APP_ID="your-app-id"
//! export AVATAR_ID="your-avatar-id"
//! export AVATAR_SCENE_ID="your-scene-id"
//! export AVATAR_VCN="x4_lingxiaoqi_oral"                                # Optional
//! export AVATAR_KEEPALIVE_SECONDS=5                                     # Optional
//! ```
//!
//! # Example
//! ```rust,no_run
//! use waav_avatar::config::AvatarConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AvatarConfig::from_file(Path::new("avatar.yaml"))?;
//! let credentials = config.credentials();
//! let options = config.session_options();
//! # Ok(())
//! # }
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::auth::Credentials;
use crate::core::session::SessionOptions;

mod yaml;

pub use yaml::{AvatarYaml, CredentialsYaml, YamlConfig};

/// Default interaction endpoint.
pub const DEFAULT_AVATAR_URL: &str = "wss://avatar.cn-huadong-1.xf-yun.com/v1/interact";

/// Default TTS voice.
pub const DEFAULT_VCN: &str = "x4_lingxiaoqi_oral";

pub const DEFAULT_KEEPALIVE_SECONDS: u64 = 5;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Avatar client configuration
#[derive(Clone, PartialEq, Eq)]
pub struct AvatarConfig {
    /// Interaction endpoint (`ws`, `wss`, `http` or `https`)
    pub endpoint_url: String,
    /// Key id sent in the authorization value
    pub api_key: String,
    /// HMAC signing secret
    pub api_secret: String,
    pub app_id: String,
    pub avatar_id: String,
    pub scene_id: String,
    /// TTS voice for text_driver / text_interact requests
    pub vcn: String,
    pub keepalive_interval_seconds: u64,
}

impl fmt::Debug for AvatarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("avatar_id", &self.avatar_id)
            .field("scene_id", &self.scene_id)
            .field("vcn", &self.vcn)
            .field("keepalive_interval_seconds", &self.keepalive_interval_seconds)
            .finish()
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_AVATAR_URL.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            app_id: String::new(),
            avatar_id: String::new(),
            scene_id: String::new(),
            vcn: DEFAULT_VCN.to_string(),
            keepalive_interval_seconds: DEFAULT_KEEPALIVE_SECONDS,
        }
    }
}

/// Zeroize the key pair when the configuration is dropped.
impl Drop for AvatarConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.api_key.zeroize();
        self.api_secret.zeroize();
    }
}

impl AvatarConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Environment variables (with defaults) provide the base configuration;
    /// values present in the YAML file override them.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::env_base()?;
        config.apply_yaml(&yaml_config);
        config.validate()?;

        Ok(config)
    }

    fn env_base() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = env_var("AVATAR_URL") {
            config.endpoint_url = url;
        }
        if let Some(key) = env_var("AVATAR_API_KEY") {
            config.api_key = key;
        }
        if let Some(secret) = env_var("AVATAR_API_SECRET") {
            config.api_secret = secret;
        }
        if let Some(app_id) = env_var("AVATAR_APP_ID") {
            config.app_id = app_id;
        }
        if let Some(avatar_id) = env_var("AVATAR_ID") {
            config.avatar_id = avatar_id;
        }
        if let Some(scene_id) = env_var("AVATAR_SCENE_ID") {
            config.scene_id = scene_id;
        }
        if let Some(vcn) = env_var("AVATAR_VCN") {
            config.vcn = vcn;
        }
        if let Some(seconds) = env_var("AVATAR_KEEPALIVE_SECONDS") {
            config.keepalive_interval_seconds =
                seconds.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "AVATAR_KEEPALIVE_SECONDS",
                    value: seconds.clone(),
                })?;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: &YamlConfig) {
        if let Some(avatar) = &yaml.avatar {
            if let Some(url) = &avatar.url {
                self.endpoint_url = url.clone();
            }
            if let Some(app_id) = &avatar.app_id {
                self.app_id = app_id.clone();
            }
            if let Some(avatar_id) = &avatar.avatar_id {
                self.avatar_id = avatar_id.clone();
            }
            if let Some(scene_id) = &avatar.scene_id {
                self.scene_id = scene_id.clone();
            }
            if let Some(vcn) = &avatar.vcn {
                self.vcn = vcn.clone();
            }
            if let Some(seconds) = avatar.keepalive_seconds {
                self.keepalive_interval_seconds = seconds;
            }
        }

        if let Some(credentials) = &yaml.credentials {
            if let Some(key) = &credentials.api_key {
                self.api_key = key.clone();
            }
            if let Some(secret) = &credentials.api_secret {
                self.api_secret = secret.clone();
            }
        }
    }

    /// Check that the configuration can sign and open a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::Missing("AVATAR_API_KEY"));
        }
        if self.api_secret.is_empty() {
            return Err(ConfigError::Missing("AVATAR_API_SECRET"));
        }
        if self.app_id.is_empty() {
            return Err(ConfigError::Missing("AVATAR_APP_ID"));
        }
        if self.keepalive_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AVATAR_KEEPALIVE_SECONDS",
                value: "0".to_string(),
            });
        }

        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.endpoint_url.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(())
    }

    /// Key pair for the request signer.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    /// Options for an [`AvatarSession`](crate::core::session::AvatarSession).
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new(self.app_id.clone())
            .with_keepalive_interval(Duration::from_secs(self.keepalive_interval_seconds))
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}
