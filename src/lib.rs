pub mod auth;
pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use auth::{Credentials, SignedHeaders, sign_headers, sign_url};
pub use config::{AvatarConfig, ConfigError};
pub use core::*;
