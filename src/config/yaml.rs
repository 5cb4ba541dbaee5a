use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may override only part of the
/// environment-provided configuration.
///
/// # Example YAML structure
/// ```yaml
/// avatar:
///   url: "wss://avatar.cn-huadong-1.xf-yun.com/v1/interact"
///   app_id: "your-app-id"
///   avatar_id: "your-avatar-id"
///   scene_id: "your-scene-id"
///   vcn: "x4_lingxiaoqi_oral"
///   keepalive_seconds: 5
///
/// credentials:
///   api_key: "your-api-key"
///   api_secret: "your-api-secret"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub avatar: Option<AvatarYaml>,
    pub credentials: Option<CredentialsYaml>,
}

/// Session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AvatarYaml {
    pub url: Option<String>,
    pub app_id: Option<String>,
    pub avatar_id: Option<String>,
    pub scene_id: Option<String>,
    /// TTS voice used by text_driver / text_interact requests
    pub vcn: Option<String>,
    pub keepalive_seconds: Option<u64>,
}

/// Key pair from YAML
///
/// Field-level defaults only: `Drop` rules out a container default.
#[derive(Clone, Deserialize, Default)]
pub struct CredentialsYaml {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl std::fmt::Debug for CredentialsYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsYaml")
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for CredentialsYaml {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut secret) = self.api_secret {
            secret.zeroize();
        }
    }
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_str(&contents)?)
    }
}
