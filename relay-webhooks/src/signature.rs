//! Inbound signature verification
//!
//! Signed endpoints expect a header of the form
//! `scheme;version;timestamp;digest`, for example
//! `hmac;1;1700000000;Qn8s...==`, where
//! `digest = base64(HMAC-SHA256(base64decode(secret), timestamp + "." + json(body)))`.

use crate::{WebhookEndpoint, WebhookError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only supported scheme
pub const SCHEME: &str = "hmac";

/// The only supported scheme version
pub const VERSION: &str = "1";

/// Outcome of checking one inbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Continue the pipeline
    Allow,
    /// Stop with an authentication failure
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Why a call was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The configured signature header is absent
    #[error("missing signature header {0}")]
    MissingHeader(String),

    /// The header does not have exactly four `;`-separated fields
    #[error("malformed header: expected 4 fields, found {fields}")]
    MalformedHeader { fields: usize },

    /// Anything other than `hmac` version `1`
    #[error("unsupported scheme/version: {scheme}/{version}")]
    UnsupportedScheme { scheme: String, version: String },

    /// The digest does not match
    #[error("signature mismatch")]
    Mismatch,

    /// Verification could not run, e.g. the secret is not base64
    #[error("internal verification error: {0}")]
    Internal(String),
}

impl RejectReason {
    /// HTTP status answered to the caller
    pub fn status_code(&self) -> u16 {
        match self {
            RejectReason::MissingHeader(_)
            | RejectReason::MalformedHeader { .. }
            | RejectReason::UnsupportedScheme { .. } => 400,
            RejectReason::Mismatch => 401,
            RejectReason::Internal(_) => 500,
        }
    }
}

/// Parsed `scheme;version;timestamp;digest` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    pub scheme: &'a str,
    pub version: &'a str,
    pub timestamp: &'a str,
    pub digest: &'a str,
}

impl<'a> SignatureHeader<'a> {
    /// Split a header value. Only the field count is checked here.
    pub fn parse(value: &'a str) -> Result<Self, RejectReason> {
        let fields: Vec<&str> = value.split(';').collect();
        match fields.as_slice() {
            [scheme, version, timestamp, digest] => Ok(Self {
                scheme,
                version,
                timestamp,
                digest,
            }),
            _ => Err(RejectReason::MalformedHeader {
                fields: fields.len(),
            }),
        }
    }

    /// Reject anything but the supported scheme and version
    pub fn check_scheme(&self) -> Result<(), RejectReason> {
        if self.scheme != SCHEME || self.version != VERSION {
            return Err(RejectReason::UnsupportedScheme {
                scheme: self.scheme.to_string(),
                version: self.version.to_string(),
            });
        }
        Ok(())
    }
}

/// Authenticates inbound calls for one endpoint
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    header_name: Option<String>,
}

impl SignatureVerifier {
    /// Verifier with a base64 secret and the header carrying the signature
    pub fn new(secret: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            header_name: Some(header_name.into()),
        }
    }

    /// Verifier that allows everything
    pub fn disabled() -> Self {
        Self {
            secret: None,
            header_name: None,
        }
    }

    /// Verifier configured from an endpoint; disabled unless both the
    /// secret and the header name are present
    pub fn for_endpoint(endpoint: &WebhookEndpoint) -> Self {
        match (&endpoint.signature_secret, &endpoint.signature_header_name) {
            (Some(secret), Some(header)) => Self::new(secret.clone(), header.clone()),
            _ => Self::disabled(),
        }
    }

    /// Whether calls are checked at all
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some() && self.header_name.is_some()
    }

    /// Decide ALLOW or REJECT. Never fails; internal problems are rejections.
    pub fn verify(&self, headers: &HeaderMap, body: &serde_json::Value) -> Verdict {
        let (Some(secret), Some(header_name)) = (&self.secret, &self.header_name) else {
            return Verdict::Allow;
        };

        match Self::check(secret, header_name, headers, body) {
            Ok(()) => Verdict::Allow,
            Err(reason) => Verdict::Reject(reason),
        }
    }

    fn check(
        secret: &str,
        header_name: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<(), RejectReason> {
        let raw = headers
            .get(header_name)
            .ok_or_else(|| RejectReason::MissingHeader(header_name.to_string()))?;
        let value = raw
            .to_str()
            .map_err(|_| RejectReason::MalformedHeader { fields: 0 })?;

        let header = SignatureHeader::parse(value)?;
        header.check_scheme()?;

        let expected = compute_digest(secret, header.timestamp, body)
            .map_err(|e| RejectReason::Internal(e.to_string()))?;

        if constant_time_compare(header.digest, &expected) {
            Ok(())
        } else {
            Err(RejectReason::Mismatch)
        }
    }

    /// Produce a full header value for `body` at `timestamp`
    pub fn sign(&self, timestamp: &str, body: &serde_json::Value) -> Result<String, WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| WebhookError::ConfigError("no signing secret configured".to_string()))?;
        let digest = compute_digest(secret, timestamp, body)?;
        Ok(format!("{SCHEME};{VERSION};{timestamp};{digest}"))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enabled", &self.is_enabled())
            .field("header_name", &self.header_name)
            .finish()
    }
}

/// Compact JSON in the layout a JavaScript sender signs; this is the exact
/// text that is signed.
///
/// Object keys that are array indices (`"0"`, `"17"`) come first in numeric
/// order, the rest keep their original order. Integral floats print without
/// a fraction (`1.0` as `1`). Non-integral floats use Rust's shortest
/// round-trip form, which can differ from JavaScript in exponent notation.
pub fn canonical_json(body: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(body, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut indexed = Vec::new();
            let mut named = Vec::new();
            for (key, value) in map {
                match array_index(key) {
                    Some(index) => indexed.push((index, key, value)),
                    None => named.push((key, value)),
                }
            }
            indexed.sort_by_key(|(index, _, _)| *index);

            out.push('{');
            let entries = indexed.into_iter().map(|(_, k, v)| (k, v)).chain(named);
            for (i, (key, value)) in entries.enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn canonical_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        _ => n.to_string(),
    }
}

/// Keys JavaScript treats as array indices: canonical decimals below 2^32 - 1
fn array_index(key: &str) -> Option<u32> {
    let index = key.parse::<u32>().ok().filter(|i| *i != u32::MAX)?;
    (index.to_string() == key).then_some(index)
}

/// base64(HMAC-SHA256(base64decode(secret), timestamp + "." + canonical_json(body)))
pub fn compute_digest(
    secret_b64: &str,
    timestamp: &str,
    body: &serde_json::Value,
) -> Result<String, WebhookError> {
    let key = STANDARD
        .decode(secret_b64)
        .map_err(|e| WebhookError::InvalidSecret(e.to_string()))?;

    let signed_data = format!("{}.{}", timestamp, canonical_json(body));

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| WebhookError::InvalidSecret(e.to_string()))?;
    mac.update(signed_data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    const SECRET: &str = "c2VjcmV0"; // "secret"

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_str(value).unwrap());
        map
    }

    fn body() -> serde_json::Value {
        json!({"object": {"data": {"object": {"body": "hi", "from": "+15550100"}}}})
    }

    #[test]
    fn test_disabled_allows_anything() {
        let verifier = SignatureVerifier::disabled();
        assert!(verifier.verify(&HeaderMap::new(), &body()).is_allowed());
        assert!(
            verifier
                .verify(&headers("x-sig", "garbage"), &json!(null))
                .is_allowed()
        );
    }

    #[test]
    fn test_endpoint_needs_both_fields() {
        let mut endpoint = WebhookEndpoint::new("e", "https://example.com");
        endpoint.signature_secret = Some(SECRET.into());
        assert!(!SignatureVerifier::for_endpoint(&endpoint).is_enabled());

        endpoint.signature_header_name = Some("X-Sig".into());
        assert!(SignatureVerifier::for_endpoint(&endpoint).is_enabled());
    }

    #[test]
    fn test_sign_and_verify() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        let header = verifier.sign("1700000000", &body()).unwrap();
        assert!(header.starts_with("hmac;1;1700000000;"));

        // Lookup is case-insensitive
        let verdict = verifier.verify(&headers("x-sig", &header), &body());
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_known_digest() {
        // HMAC-SHA256("secret", "1700000000.{}") in base64
        let digest = compute_digest(SECRET, "1700000000", &json!({})).unwrap();
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"1700000000.{}");
        assert_eq!(digest, STANDARD.encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_flipping_any_digest_character_rejects() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        let header = verifier.sign("1700000000", &body()).unwrap();
        let (prefix, digest) = header.rsplit_once(';').unwrap();

        for i in 0..digest.len() {
            let mut chars: Vec<char> = digest.chars().collect();
            chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
            let tampered = format!("{prefix};{}", chars.iter().collect::<String>());

            let verdict = verifier.verify(&headers("x-sig", &tampered), &body());
            assert_eq!(verdict, Verdict::Reject(RejectReason::Mismatch), "index {i}");
        }
    }

    #[test]
    fn test_body_change_rejects() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        let header = verifier.sign("1700000000", &body()).unwrap();
        let verdict = verifier.verify(&headers("x-sig", &header), &json!({"other": true}));
        assert_eq!(verdict, Verdict::Reject(RejectReason::Mismatch));
    }

    #[test]
    fn test_wrong_field_count_is_malformed() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        for value in ["", "hmac", "hmac;1;123", "hmac;1;123;abc;extra", ";;;;;"] {
            let verdict = verifier.verify(&headers("x-sig", value), &body());
            assert!(
                matches!(
                    verdict,
                    Verdict::Reject(RejectReason::MalformedHeader { .. })
                ),
                "{value:?} gave {verdict:?}"
            );
        }
    }

    #[test]
    fn test_unsupported_scheme_or_version() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        for value in ["sha;1;123;abc", "hmac;2;123;abc"] {
            let verdict = verifier.verify(&headers("x-sig", value), &body());
            assert!(matches!(
                verdict,
                Verdict::Reject(RejectReason::UnsupportedScheme { .. })
            ));
        }
    }

    #[test]
    fn test_missing_header() {
        let verifier = SignatureVerifier::new(SECRET, "X-Sig");
        let verdict = verifier.verify(&HeaderMap::new(), &body());
        assert_eq!(
            verdict,
            Verdict::Reject(RejectReason::MissingHeader("X-Sig".into()))
        );
    }

    #[test]
    fn test_bad_secret_is_internal_rejection() {
        let verifier = SignatureVerifier::new("%%%", "X-Sig");
        let verdict = verifier.verify(&headers("x-sig", "hmac;1;1;abc"), &body());
        match verdict {
            Verdict::Reject(reason @ RejectReason::Internal(_)) => {
                assert_eq!(reason.status_code(), 500)
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RejectReason::MalformedHeader { fields: 2 }.status_code(), 400);
        assert_eq!(RejectReason::Mismatch.status_code(), 401);
        assert_eq!(RejectReason::MissingHeader("x".into()).status_code(), 400);
    }

    #[test]
    fn test_canonical_json_keeps_key_order() {
        let body: serde_json::Value = serde_json::from_str(r#"{"z":1,"a":{"y":2,"b":3}}"#).unwrap();
        assert_eq!(canonical_json(&body), r#"{"z":1,"a":{"y":2,"b":3}}"#);
    }

    #[test]
    fn test_canonical_json_follows_javascript_layout() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"b":1.0,"10":"x","a":[2.50,-0.0,1e3],"2":null,"01":true,"4294967295":0}"#)
                .unwrap();
        assert_eq!(
            canonical_json(&body),
            r#"{"2":null,"10":"x","b":1,"a":[2.5,0,1000],"01":true,"4294967295":0}"#
        );
        assert_eq!(canonical_json(&json!("line\n\"q\"")), r#""line\n\"q\"""#);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
        assert!(!constant_time_compare("", "a"));
    }
}
