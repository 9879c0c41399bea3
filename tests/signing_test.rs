use webhook_relay::{compute_signature, parse_signature_headers, verify_signature, VerifyFailure};

const SECRET: &str = "whsec_test";
const BODY: &[u8] = br#"{"id":"evt_1","type":"ping"}"#;
const MAX_SKEW_MS: i64 = 5 * 60 * 1000;

/// A fixed "now" well past the epoch: 2023-11-14T22:13:20Z.
const NOW_MS: i64 = 1_700_000_000_000;

fn verify(signature: Option<&str>, timestamp: Option<&str>) -> Result<(), VerifyFailure> {
    verify_signature(
        BODY,
        signature,
        timestamp,
        Some(SECRET),
        false,
        MAX_SKEW_MS,
        NOW_MS,
    )
}

#[test]
fn accepts_valid_signature_with_seconds_timestamp() {
    let ts = (NOW_MS / 1000).to_string();
    let sig = compute_signature(SECRET, &ts, BODY);
    assert_eq!(verify(Some(&sig), Some(&ts)), Ok(()));
}

#[test]
fn accepts_valid_signature_with_millisecond_timestamp() {
    let ts = NOW_MS.to_string();
    let sig = compute_signature(SECRET, &ts, BODY);
    assert_eq!(verify(Some(&sig), Some(&ts)), Ok(()));
}

#[test]
fn accepts_sha256_prefixed_signature() {
    let ts = (NOW_MS / 1000).to_string();
    let sig = format!("sha256={}", compute_signature(SECRET, &ts, BODY));
    assert_eq!(verify(Some(&sig), Some(&ts)), Ok(()));
}

#[test]
fn rejects_signature_from_wrong_secret() {
    let ts = (NOW_MS / 1000).to_string();
    let sig = compute_signature("a-different-secret", &ts, BODY);
    assert_eq!(
        verify(Some(&sig), Some(&ts)),
        Err(VerifyFailure::SignatureMismatch)
    );
}

#[test]
fn rejects_signature_over_different_body() {
    let ts = (NOW_MS / 1000).to_string();
    let sig = compute_signature(SECRET, &ts, br#"{"id":"evt_2"}"#);
    assert_eq!(
        verify(Some(&sig), Some(&ts)),
        Err(VerifyFailure::SignatureMismatch)
    );
}

#[test]
fn length_mismatch_is_a_signature_mismatch() {
    let ts = (NOW_MS / 1000).to_string();
    assert_eq!(
        verify(Some("abcd"), Some(&ts)),
        Err(VerifyFailure::SignatureMismatch)
    );
    assert_eq!(
        verify(Some("not-even-hex!"), Some(&ts)),
        Err(VerifyFailure::SignatureMismatch)
    );
}

#[test]
fn rejects_stale_timestamp_even_with_correct_signature() {
    let stale_secs = NOW_MS / 1000 - 600;
    let ts = stale_secs.to_string();
    let sig = compute_signature(SECRET, &ts, BODY);
    assert_eq!(
        verify(Some(&sig), Some(&ts)),
        Err(VerifyFailure::TimestampOutOfRange)
    );
}

#[test]
fn rejects_future_timestamp_beyond_skew() {
    let future_secs = NOW_MS / 1000 + 600;
    let ts = future_secs.to_string();
    let sig = compute_signature(SECRET, &ts, BODY);
    assert_eq!(
        verify(Some(&sig), Some(&ts)),
        Err(VerifyFailure::TimestampOutOfRange)
    );
}

#[test]
fn rejects_non_numeric_timestamp() {
    let sig = compute_signature(SECRET, "yesterday", BODY);
    assert_eq!(
        verify(Some(&sig), Some("yesterday")),
        Err(VerifyFailure::InvalidTimestamp)
    );
    assert_eq!(
        verify(Some(&sig), Some("12.5")),
        Err(VerifyFailure::InvalidTimestamp)
    );
}

#[test]
fn rejects_missing_headers_when_secret_is_set() {
    let ts = (NOW_MS / 1000).to_string();
    let sig = compute_signature(SECRET, &ts, BODY);
    assert_eq!(
        verify(None, Some(&ts)),
        Err(VerifyFailure::MissingSignatureHeaders)
    );
    assert_eq!(
        verify(Some(&sig), None),
        Err(VerifyFailure::MissingSignatureHeaders)
    );
    assert_eq!(
        verify(None, None),
        Err(VerifyFailure::MissingSignatureHeaders)
    );
}

#[test]
fn unsigned_mode_requires_explicit_opt_in() {
    assert_eq!(
        verify_signature(BODY, None, None, None, true, MAX_SKEW_MS, NOW_MS),
        Ok(())
    );
    assert_eq!(
        verify_signature(BODY, None, None, None, false, MAX_SKEW_MS, NOW_MS),
        Err(VerifyFailure::MissingWebhookSecret)
    );
}

#[test]
fn header_parsing_is_case_insensitive_and_last_wins() {
    let headers = vec![
        ("content-type", "application/json"),
        ("x-webhook-signature", "first"),
        ("X-WEBHOOK-SIGNATURE", "second"),
        ("X-Webhook-Timestamp", "1700000000"),
    ];
    let parsed =
        parse_signature_headers(headers, "X-Webhook-Signature", "X-Webhook-Timestamp");
    assert_eq!(parsed.signature.as_deref(), Some("second"));
    assert_eq!(parsed.timestamp.as_deref(), Some("1700000000"));
}

#[test]
fn failure_reasons_have_stable_codes() {
    assert_eq!(
        VerifyFailure::MissingWebhookSecret.as_str(),
        "missing_webhook_secret"
    );
    assert_eq!(
        VerifyFailure::MissingSignatureHeaders.as_str(),
        "missing_signature_headers"
    );
    assert_eq!(VerifyFailure::InvalidTimestamp.as_str(), "invalid_timestamp");
    assert_eq!(
        VerifyFailure::TimestampOutOfRange.as_str(),
        "timestamp_out_of_range"
    );
    assert_eq!(
        VerifyFailure::SignatureMismatch.as_str(),
        "signature_mismatch"
    );
}
