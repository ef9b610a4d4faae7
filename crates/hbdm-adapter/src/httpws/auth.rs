//! Credentials and request signing for HBDM
//!
//! # Signature Version 2
//! The signed payload is
//! `METHOD \n HOST \n PATH \n QUERY`, where QUERY is the url-encoded
//! parameter set sorted by key. The digest is HMAC-SHA256 keyed with the
//! secret, base64 encoded.
//!
//! REST calls put the signed parameters in the query string; the
//! notification channel sends them in the `op:"auth"` frame.
//!
//! # Source
//! - https://huobiapi.github.io/docs/dm/v1/en/#signature-authentication

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use url::form_urlencoded;

use crate::types::AuthRequest;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_METHOD: &str = "HmacSHA256";
pub const SIGNATURE_VERSION: &str = "2";

/// Timestamp layout expected by the exchange (UTC, no zone suffix)
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// API key pair
///
/// Loadable from config (`Deserialize`) but never serialized back out.
#[derive(Clone, Deserialize)]
pub struct ApiCredentials {
    /// Access key (sent in clear as AccessKeyId)
    pub access_key: String,
    /// Secret key (HMAC key only, never sent)
    pub secret_key: String,
}

impl ApiCredentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { access_key: access_key.into(), secret_key: secret_key.into() }
    }

    /// Create credentials from environment variables
    ///
    /// Expected env vars:
    /// - HBDM_ACCESS_KEY
    /// - HBDM_SECRET_KEY
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("HBDM_ACCESS_KEY").ok()?;
        let secret_key = std::env::var("HBDM_SECRET_KEY").ok()?;

        Some(Self { access_key, secret_key })
    }

    /// Check if credentials are present (non-empty)
    pub fn is_valid(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// The four parameters every signed request carries, before `Signature`
    pub fn signing_params(&self, now: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("AccessKeyId".to_string(), self.access_key.clone());
        params.insert("SignatureMethod".to_string(), SIGNATURE_METHOD.to_string());
        params.insert("SignatureVersion".to_string(), SIGNATURE_VERSION.to_string());
        params.insert("Timestamp".to_string(), format_timestamp(now));
        params
    }

    /// Build the notification channel credential frame
    pub fn auth_request(&self, host: &str, path: &str, now: DateTime<Utc>) -> AuthRequest {
        let params = self.signing_params(now);
        let signature = create_signature(&params, "GET", host, path, &self.secret_key);

        AuthRequest {
            op: "auth".to_string(),
            auth_type: "api".to_string(),
            access_key_id: self.access_key.clone(),
            signature_method: SIGNATURE_METHOD.to_string(),
            signature_version: SIGNATURE_VERSION.to_string(),
            timestamp: params["Timestamp"].clone(),
            signature,
        }
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field(
                "access_key",
                &format!("{}...", &self.access_key.chars().take(8).collect::<String>()),
            )
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// UTC timestamp as the exchange expects it, e.g. `2019-09-01T18:16:16`
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Url-encode one value (form encoding, uppercase hex)
pub fn encode_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `k1=v1&k2=v2` over already sorted params, values url-encoded
pub fn sorted_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Text that gets signed
pub fn canonical_payload(
    params: &BTreeMap<String, String>,
    method: &str,
    host: &str,
    path: &str,
) -> String {
    format!("{}\n{}\n{}\n{}", method, host, path, sorted_query(params))
}

/// Signature over `params` for a request to `host` + `path`
pub fn create_signature(
    params: &BTreeMap<String, String>,
    method: &str,
    host: &str,
    path: &str,
    secret: &str,
) -> String {
    let payload = canonical_payload(params, method, host, path);
    compute_hmac256(&payload, secret)
}

/// Base64 HMAC-SHA256 digest
pub fn compute_hmac256(message: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
