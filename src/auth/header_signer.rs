//! Signed-header mode, used to authenticate plain HTTP calls.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;

use super::{
    Credentials, HeaderSigningError, RawUrl, SIGNATURE_ALGORITHM, SignatureFault,
    SignatureMaterial, hmac_sha256_base64, http_date,
};

/// Authorization headers for one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub host: String,
    pub date: String,
    /// `SHA-256=<base64>` of the body; only present when a body was signed.
    pub digest: Option<String>,
    /// Intermediate values, kept for inspection.
    pub material: SignatureMaterial,
}

impl SignedHeaders {
    /// Header name/value pairs in a fixed order: `authorization`, `host`,
    /// `date`, then `digest` when present.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![
            ("authorization", self.authorization.as_str()),
            ("host", self.host.as_str()),
            ("date", self.date.as_str()),
        ];
        if let Some(digest) = &self.digest {
            pairs.push(("digest", digest.as_str()));
        }
        pairs
    }

    /// Convert into an `http::HeaderMap` ready to attach to a request.
    pub fn to_header_map(&self) -> Result<HeaderMap, HeaderSigningError> {
        let mut headers = HeaderMap::with_capacity(4);
        for (name, value) in self.pairs() {
            let value = HeaderValue::from_str(value).map_err(SignatureFault::from)?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

/// Sign an HTTP request with the current time.
///
/// When `body` is non-empty its SHA-256 digest is covered by the signature
/// and returned as the `digest` header.
pub fn sign_headers(
    request_url: &str,
    credentials: &Credentials,
    method: &str,
    body: Option<&[u8]>,
) -> Result<SignedHeaders, HeaderSigningError> {
    sign_headers_at(
        request_url,
        credentials,
        method,
        body,
        OffsetDateTime::now_utc(),
    )
}

/// Sign an HTTP request as of `at`.
pub fn sign_headers_at(
    request_url: &str,
    credentials: &Credentials,
    method: &str,
    body: Option<&[u8]>,
    at: OffsetDateTime,
) -> Result<SignedHeaders, HeaderSigningError> {
    let url = Url::parse(request_url).map_err(SignatureFault::from)?;
    let raw = RawUrl::split(request_url);

    let hostname = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or(SignatureFault::MissingHost)?;
    // `Url::port` hides default ports; the signed host keeps whatever was written.
    let host = match raw.explicit_port() {
        Some(port) => format!("{hostname}:{port}"),
        None => hostname.to_string(),
    };

    let date = http_date(at).map_err(SignatureFault::from)?;
    let path = raw.request_path();

    let digest = body
        .filter(|body| !body.is_empty())
        .map(|body| format!("SHA-256={}", BASE64.encode(Sha256::digest(body))));

    let mut signing_string = format!("host: {host}\ndate: {date}\n{method} {path} HTTP/1.1");
    let signed_headers = match &digest {
        Some(digest) => {
            signing_string.push_str("\ndigest: ");
            signing_string.push_str(digest);
            "host date request-line digest"
        }
        None => "host date request-line",
    };

    let signature = hmac_sha256_base64(credentials.secret_bytes(), &signing_string)?;
    let authorization = format!(
        "hmac-auth api_key=\"{}\", algorithm=\"{SIGNATURE_ALGORITHM}\", headers=\"{signed_headers}\", signature=\"{signature}\"",
        credentials.key_id()
    );

    Ok(SignedHeaders {
        authorization: authorization.clone(),
        host: host.clone(),
        date: date.clone(),
        digest,
        material: SignatureMaterial {
            date,
            host,
            signing_string,
            signature,
            authorization,
        },
    })
}
