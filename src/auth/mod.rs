//! HMAC request signing for the avatar interaction service.
//!
//! The service authenticates two kinds of traffic with the same key pair:
//!
//! - **WebSocket upgrades** carry the credential as signed query parameters
//!   (`authorization`, `host`, `date`), because no custom headers can be set
//!   during the upgrade. See [`sign_url`].
//! - **Plain HTTP calls** carry it as signed headers, optionally covering a
//!   SHA-256 digest of the request body. See [`sign_headers`].
//!
//! The two modes use different authorization labels, signed-header lists and
//! signing-string layouts. They live in separate modules and share nothing but
//! the date format and the HMAC primitive.
//!
//! # Example
//!
//! ```rust,no_run
//! use waav_avatar::auth::{Credentials, sign_url};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("api-key", "api-secret");
//! let url = sign_url("wss://avatar.example.com/v1/interact", &credentials, "GET")?;
//! println!("{}", url.split('?').next().unwrap_or(&url));
//! # Ok(())
//! # }
//! ```

mod header_signer;
mod url_signer;


use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use zeroize::Zeroizing;

pub use header_signer::{SignedHeaders, sign_headers, sign_headers_at};
pub use url_signer::{sign_url, sign_url_at, url_signature};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm name advertised in every authorization value.
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

// =============================================================================
// Errors
// =============================================================================

/// Underlying reason a signature could not be produced.
#[derive(Debug, Error)]
pub enum SignatureFault {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("url must have a host")]
    MissingHost,

    #[error("failed to format date: {0}")]
    Date(#[from] time::error::Format),

    #[error("invalid signing key: {0}")]
    InvalidKey(#[from] hmac::digest::InvalidLength),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

/// Failure to assemble a signed URL.
#[derive(Debug, Error)]
#[error("assemble request url error: {0}")]
pub struct SigningError(#[from] pub SignatureFault);

/// Failure to assemble signed request headers.
#[derive(Debug, Error)]
#[error("assemble request header error: {0}")]
pub struct HeaderSigningError(#[from] pub SignatureFault);

// =============================================================================
// Credentials
// =============================================================================

/// API key pair used to sign requests.
///
/// The secret is wiped from memory on drop and never shows up in `Debug`
/// output.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    key_secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: Zeroizing::new(key_secret.into()),
        }
    }

    /// Public key identifier (the console's "API key").
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.key_secret.as_bytes()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Signature material
// =============================================================================

/// Everything computed while signing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMaterial {
    /// `Date` value, e.g. `Mon, 01 Jan 2024 00:00:00 GMT`.
    pub date: String,
    /// Host component that was signed.
    pub host: String,
    /// Newline-joined text the HMAC was computed over.
    pub signing_string: String,
    /// Base64 HMAC-SHA256 of `signing_string`.
    pub signature: String,
    /// Full authorization credential string.
    pub authorization: String,
}

/// Format a timestamp as `%a, %d %b %Y %H:%M:%S GMT` in UTC.
pub fn http_date(at: OffsetDateTime) -> Result<String, time::error::Format> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC).format(&format)
}

/// Base64 HMAC-SHA256 of `message` keyed by `secret`.
pub(crate) fn hmac_sha256_base64(secret: &[u8], message: &str) -> Result<String, SignatureFault> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// A URL split into its parts exactly as the caller wrote them.
///
/// Signatures cover the path and port as written, so nothing here is
/// normalized. Validation is left to `url::Url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawUrl<'a> {
    /// Everything before the query and fragment.
    pub base: &'a str,
    pub authority: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> RawUrl<'a> {
    pub(crate) fn split(input: &'a str) -> Self {
        let input = input.trim();
        let (rest, fragment) = match input.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (input, None),
        };
        let (base, query) = match rest.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (rest, None),
        };
        let hierarchy = base.split_once("://").map_or("", |(_, rest)| rest);
        let (authority, path) = match hierarchy.find('/') {
            Some(index) => hierarchy.split_at(index),
            None => (hierarchy, ""),
        };

        Self {
            base,
            authority,
            path,
            query,
            fragment,
        }
    }

    /// Request path to sign, `/` when the URL has none.
    pub(crate) fn request_path(&self) -> &'a str {
        if self.path.is_empty() { "/" } else { self.path }
    }

    /// Port written in the authority, including a scheme default like `:443`.
    pub(crate) fn explicit_port(&self) -> Option<u16> {
        let host_port = self
            .authority
            .rsplit_once('@')
            .map_or(self.authority, |(_, host_port)| host_port);
        let port = match host_port.rfind(']') {
            // Bracketed IPv6 literal
            Some(end) => host_port[end + 1..].strip_prefix(':')?,
            None => host_port.rsplit_once(':')?.1,
        };
        port.parse().ok()
    }
}
