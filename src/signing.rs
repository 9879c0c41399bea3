use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why an inbound request failed verification.
///
/// All variants are caller-facing and non-retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    /// No webhook secret is configured and unsigned requests are not allowed.
    MissingWebhookSecret,

    /// A secret is configured but the signature or timestamp header is absent.
    MissingSignatureHeaders,

    /// The timestamp header is not a number.
    InvalidTimestamp,

    /// The signed timestamp falls outside the allowed clock skew.
    TimestampOutOfRange,

    /// The provided signature does not match the request body.
    SignatureMismatch,
}

impl VerifyFailure {
    /// Stable machine-readable reason code.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyFailure::MissingWebhookSecret => "missing_webhook_secret",
            VerifyFailure::MissingSignatureHeaders => "missing_signature_headers",
            VerifyFailure::InvalidTimestamp => "invalid_timestamp",
            VerifyFailure::TimestampOutOfRange => "timestamp_out_of_range",
            VerifyFailure::SignatureMismatch => "signature_mismatch",
        }
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for VerifyFailure {}

/// Signature and timestamp header values extracted from a request.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

/// Pull the signature and timestamp values out of a header set.
///
/// Header name matching is case-insensitive; the last occurrence wins.
pub fn parse_signature_headers<'a, I>(
    headers: I,
    signature_header: &str,
    timestamp_header: &str,
) -> ParsedSignature
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sig_key = signature_header.to_ascii_lowercase();
    let ts_key = timestamp_header.to_ascii_lowercase();

    let mut signature = None;
    let mut timestamp = None;

    for (name, value) in headers {
        let key = name.to_ascii_lowercase();
        if key == sig_key {
            signature = Some(value.to_string());
        } else if key == ts_key {
            timestamp = Some(value.to_string());
        }
    }

    ParsedSignature { signature, timestamp }
}

/// Compute the hex-encoded HMAC-SHA256 signature for a request body.
///
/// The signed string is `"{timestamp}.{raw_body}"`, matching what
/// [`verify_signature`] expects. Exposed so senders and tests can
/// produce valid requests.
pub fn compute_signature(secret: &str, timestamp: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the authenticity and freshness of an inbound request body.
///
/// Checks run in order: secret presence, header presence, timestamp
/// parse, clock skew, signature match. The provided signature may carry
/// a `sha256=` prefix; comparison is constant-time, and a length
/// mismatch is reported as a signature mismatch like any other.
///
/// Pure validation; no side effects.
pub fn verify_signature(
    raw_body: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    secret: Option<&str>,
    allow_unsigned: bool,
    max_skew_ms: i64,
    now_ms: i64,
) -> Result<(), VerifyFailure> {
    let Some(secret) = secret else {
        return if allow_unsigned {
            Ok(())
        } else {
            Err(VerifyFailure::MissingWebhookSecret)
        };
    };

    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return Err(VerifyFailure::MissingSignatureHeaders);
    };

    let ts_ms = parse_timestamp_ms(timestamp)?;
    if (now_ms - ts_ms).abs() > max_skew_ms {
        return Err(VerifyFailure::TimestampOutOfRange);
    }

    let provided = signature.strip_prefix("sha256=").unwrap_or(signature);
    let provided = hex::decode(provided).map_err(|_| VerifyFailure::SignatureMismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    mac.verify_slice(&provided)
        .map_err(|_| VerifyFailure::SignatureMismatch)
}

/// Parse a timestamp header value into epoch milliseconds.
///
/// Values of ten digits or fewer are taken as seconds and scaled up;
/// longer values are taken as milliseconds directly.
fn parse_timestamp_ms(raw: &str) -> Result<i64, VerifyFailure> {
    let trimmed = raw.trim();
    let value: i64 = trimmed.parse().map_err(|_| VerifyFailure::InvalidTimestamp)?;
    let digits = trimmed.trim_start_matches(['-', '+']).len();
    if digits <= 10 {
        Ok(value.saturating_mul(1000))
    } else {
        Ok(value)
    }
}
