//! Status-callback payloads and request signature validation.

use base64::prelude::{Engine, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Form parameters Twilio posts to the voice status callback.
///
/// Only the keys the dialer reads are modeled; the rest of the form is
/// carried in the raw body for signature validation.
#[derive(Clone, Debug, Deserialize)]
pub struct StatusCallbackParams {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "CallDuration")]
    pub call_duration: Option<String>,
    #[serde(rename = "AnsweredBy")]
    pub answered_by: Option<String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: Option<String>,
}

impl StatusCallbackParams {
    pub fn duration_secs(&self) -> Option<u64> {
        self.call_duration.as_deref().and_then(|d| d.parse().ok())
    }
}

/// Parses a form-encoded callback body into the sorted key/value map the
/// signature scheme is defined over.
pub fn params_from_form_body(body: &str) -> BTreeMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(body)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

/// Computes the `X-Twilio-Signature` value for a request: base64 of
/// HMAC-SHA1 over the full URL concatenated with each form parameter's
/// name and value in lexical key order.
pub fn compute_signature(auth_token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut data = String::from(url);
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Verifies a callback signature in constant time.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    let expected = compute_signature(auth_token, url, params);
    expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("CallSid".to_string(), "CA123".to_string());
        params.insert("CallStatus".to_string(), "completed".to_string());
        params.insert("From".to_string(), "+15557654321".to_string());
        params
    }

    #[test]
    fn computed_signature_validates() {
        let url = "https://example.com/webhooks/twilio/status";
        let params = sample_params();
        let sig = compute_signature("token", url, &params);
        assert!(validate_signature("token", url, &params, &sig));
    }

    #[test]
    fn tampered_params_fail_validation() {
        let url = "https://example.com/webhooks/twilio/status";
        let params = sample_params();
        let sig = compute_signature("token", url, &params);

        let mut tampered = params.clone();
        tampered.insert("CallStatus".to_string(), "failed".to_string());
        assert!(!validate_signature("token", url, &tampered, &sig));
        assert!(!validate_signature("other-token", url, &params, &sig));
    }

    #[test]
    fn form_body_parses_into_sorted_map() {
        let params = params_from_form_body("CallStatus=ringing&CallSid=CA9&To=%2B15551234567");
        let keys: Vec<&str> = params.keys().map(String::as_str).collect();
        assert_eq!(keys, ["CallSid", "CallStatus", "To"]);
        assert_eq!(params["To"], "+15551234567");
    }

    #[test]
    fn status_params_duration_parses() {
        let params: StatusCallbackParams =
            serde_urlencoded::from_str("CallSid=CA1&CallStatus=completed&CallDuration=42").unwrap();
        assert_eq!(params.duration_secs(), Some(42));
        assert_eq!(params.call_status, "completed");
    }
}
