//! Signed-URL mode, used to authenticate WebSocket upgrades.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use super::{
    Credentials, RawUrl, SIGNATURE_ALGORITHM, SignatureFault, SignatureMaterial, SigningError,
    hmac_sha256_base64, http_date,
};

/// Headers covered by a URL signature, in signing-string order.
const URL_SIGNED_HEADERS: &str = "host date request-line";

/// Query parameters owned by the signer. Re-signing replaces them.
const AUTH_QUERY_KEYS: [&str; 3] = ["authorization", "host", "date"];

/// Characters escaped in query values: everything except RFC 3986 unreserved
/// characters and `/`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Sign `endpoint_url` with the current time.
///
/// Returns the URL exactly as given (scheme, port and path untouched) with
/// `authorization`, `host` and `date` query parameters appended.
pub fn sign_url(
    endpoint_url: &str,
    credentials: &Credentials,
    method: &str,
) -> Result<String, SigningError> {
    sign_url_at(endpoint_url, credentials, method, OffsetDateTime::now_utc())
}

/// Sign `endpoint_url` as of `at`.
pub fn sign_url_at(
    endpoint_url: &str,
    credentials: &Credentials,
    method: &str,
    at: OffsetDateTime,
) -> Result<String, SigningError> {
    let url = Url::parse(endpoint_url).map_err(SignatureFault::from)?;
    let raw = RawUrl::split(endpoint_url);
    let material = signature_for(&url, &raw, credentials, method, at)?;

    let auth_base64 = BASE64.encode(material.authorization.as_bytes());
    let signed_pairs = [
        ("authorization", auth_base64.as_str()),
        ("host", material.host.as_str()),
        ("date", material.date.as_str()),
    ];

    let mut segments: Vec<String> = raw
        .query
        .map(|query| {
            query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .filter(|pair| {
                    let key = pair.split('=').next().unwrap_or_default();
                    !AUTH_QUERY_KEYS.contains(&key)
                })
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    segments.extend(
        signed_pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, QUERY_VALUE))),
    );

    let mut signed = format!("{}?{}", raw.base, segments.join("&"));
    if let Some(fragment) = raw.fragment {
        signed.push('#');
        signed.push_str(fragment);
    }

    debug!(
        "Signed request url for {}{}",
        material.host,
        raw.request_path()
    );

    Ok(signed)
}

/// Compute the URL-mode signature material for `endpoint_url` as of `at`.
pub fn url_signature(
    endpoint_url: &str,
    credentials: &Credentials,
    method: &str,
    at: OffsetDateTime,
) -> Result<SignatureMaterial, SigningError> {
    let url = Url::parse(endpoint_url).map_err(SignatureFault::from)?;
    signature_for(&url, &RawUrl::split(endpoint_url), credentials, method, at)
}

/// The scheme never enters the signing string, so `ws`/`wss` sign exactly
/// like `http`/`https`.
fn signature_for(
    url: &Url,
    raw: &RawUrl<'_>,
    credentials: &Credentials,
    method: &str,
    at: OffsetDateTime,
) -> Result<SignatureMaterial, SigningError> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or(SignatureFault::MissingHost)?
        .to_string();
    let date = http_date(at).map_err(SignatureFault::from)?;
    let path = raw.request_path();

    let signing_string = format!("host: {host}\ndate: {date}\n{method} {path} HTTP/1.1");
    let signature = hmac_sha256_base64(credentials.secret_bytes(), &signing_string)?;

    let authorization = format!(
        "hmac username=\"{}\", algorithm=\"{SIGNATURE_ALGORITHM}\", headers=\"{URL_SIGNED_HEADERS}\", signature=\"{signature}\"",
        credentials.key_id()
    );

    Ok(SignatureMaterial {
        date,
        host,
        signing_string,
        signature,
        authorization,
    })
}
