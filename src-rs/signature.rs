//! Provider webhook authentication.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`
//! where each `v1` is an HMAC-SHA256 of `"{t}.{raw body}"` keyed by the
//! shared webhook secret. The raw request bytes are signed, so the body must
//! never be re-serialized before verification.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{error::WebhookError, stripe_api::StripeEvent};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Authenticates `payload` and decodes it into an event.
    pub fn verify_event(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StripeEvent, WebhookError> {
        let signature_header = signature_header
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| WebhookError::Authentication("missing signature header".into()))?;

        self.verify(payload, signature_header, now)?;

        serde_json::from_slice(payload)
            .map_err(|error| WebhookError::MalformedEvent(error.to_string()))
    }

    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let mut pieces = part.trim().splitn(2, '=');
            let key = pieces.next().unwrap_or_default();
            let value = pieces.next().unwrap_or_default();
            if key == "t" {
                timestamp = value.parse::<i64>().ok();
            } else if key == "v1" {
                v1_signatures.push(value);
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::Authentication("missing timestamp in signature".into()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::Authentication("missing v1 signature".into()));
        }

        let within_tolerance = now
            .timestamp()
            .checked_sub(timestamp)
            .map(i64::unsigned_abs)
            .is_some_and(|skew| skew <= self.tolerance_secs.unsigned_abs());
        if !within_tolerance {
            return Err(WebhookError::Authentication(
                "signature timestamp outside tolerance".into(),
            ));
        }

        let expected = hex::encode(self.sign(timestamp, payload)?);

        let is_match = v1_signatures
            .into_iter()
            .any(|candidate| expected.as_bytes().ct_eq(candidate.as_bytes()).into());

        if !is_match {
            return Err(WebhookError::Authentication("signature mismatch".into()));
        }

        Ok(())
    }

    fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::Authentication("invalid webhook secret".into()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Builds the header the provider would send for `payload` at `timestamp`.
    pub fn signature_header(&self, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
        let signature = hex::encode(self.sign(timestamp, payload)?);
        Ok(format!("t={},v1={}", timestamp, signature))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const PAYLOAD: &[u8] =
        br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("whsec_test_secret", 300)
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn accepts_valid_signature_and_parses_event() {
        let header = verifier().signature_header(now().timestamp(), PAYLOAD).unwrap();
        let event = verifier().verify_event(PAYLOAD, Some(&header), now()).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "checkout.session.completed");
    }

    #[test]
    fn matches_independent_hmac() {
        let mut mac = HmacSha256::new_from_slice(b"whsec_test_secret").unwrap();
        mac.update(format!("1700000000.{}", std::str::from_utf8(PAYLOAD).unwrap()).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("t=1700000000,v1={}", sig);
        assert!(verifier().verify(PAYLOAD, &header, now()).is_ok());
    }

    #[test]
    fn any_v1_candidate_may_match() {
        let good = verifier().signature_header(now().timestamp(), PAYLOAD).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", now().timestamp(), good_sig);
        assert!(verifier().verify(PAYLOAD, &header, now()).is_ok());
    }

    #[test]
    fn rejects_reserialized_body() {
        let header = verifier().signature_header(now().timestamp(), PAYLOAD).unwrap();
        let value: serde_json::Value = serde_json::from_slice(PAYLOAD).unwrap();
        let reserialized = serde_json::to_vec_pretty(&value).unwrap();
        let error = verifier()
            .verify_event(&reserialized, Some(&header), now())
            .unwrap_err();
        assert!(matches!(error, WebhookError::Authentication(_)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = SignatureVerifier::new("whsec_other", 300)
            .signature_header(now().timestamp(), PAYLOAD)
            .unwrap();
        assert!(verifier().verify(PAYLOAD, &header, now()).is_err());
    }

    #[test]
    fn rejects_missing_header() {
        let error = verifier().verify_event(PAYLOAD, None, now()).unwrap_err();
        assert!(matches!(error, WebhookError::Authentication(_)));
        let error = verifier().verify_event(PAYLOAD, Some("  "), now()).unwrap_err();
        assert!(matches!(error, WebhookError::Authentication(_)));
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(verifier().verify(PAYLOAD, "v1=abc", now()).is_err());
        assert!(verifier().verify(PAYLOAD, "t=1700000000", now()).is_err());
        assert!(verifier().verify(PAYLOAD, "", now()).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let stale = now().timestamp() - 301;
        let header = verifier().signature_header(stale, PAYLOAD).unwrap();
        let error = verifier().verify(PAYLOAD, &header, now()).unwrap_err();
        assert!(matches!(error, WebhookError::Authentication(msg) if msg.contains("tolerance")));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            let error = verifier().verify(b"{}", header, now()).unwrap_err();
            assert!(matches!(error, WebhookError::Authentication(msg) if msg.contains("tolerance")));
        }
    }

    #[test]
    fn signed_garbage_is_malformed_not_authentication() {
        let body = b"not json";
        let header = verifier().signature_header(now().timestamp(), body).unwrap();
        let error = verifier().verify_event(body, Some(&header), now()).unwrap_err();
        assert!(matches!(error, WebhookError::MalformedEvent(_)));
    }
}
