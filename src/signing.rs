//! AWS Signature Version 4 request signing.

use crate::credentials::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The parts of an outbound HTTP request that take part in the signature.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
}

/// Signs `request` and returns the complete header set to send, keyed by
/// lower-cased header name: the caller's headers plus `x-amz-date`,
/// `x-amz-security-token` (when the credentials carry one) and `authorization`.
pub fn sign(
    request: &SignableRequest<'_>,
    credentials: &Credentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.insert("x-amz-date".into(), amz_date.clone());
    if let Some(token) = &credentials.session_token {
        headers.insert("x-amz-security-token".into(), token.clone());
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        sha256_hex(request.body)
    );

    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&credentials.secret_access_key, &date, region, service);
    let signature = hex(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    headers.insert(
        "authorization".into(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    );
    headers
}

pub(crate) fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn empty_body_hash_matches_known_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn signing_key_matches_published_example() {
        let key = derive_signing_key(EXAMPLE_SECRET, "20120215", "us-east-1", "iam");
        assert_eq!(
            hex(&key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn signs_vanilla_get_like_the_reference_suite() {
        let creds = Credentials::new("AKIDEXAMPLE", EXAMPLE_SECRET, None, None);
        let request = SignableRequest {
            method: "GET",
            path: "/",
            query: "",
            headers: &[("Host", "example.amazonaws.com")],
            body: b"",
        };

        let headers = sign(&request, &creds, "us-east-1", "service", at(2015, 8, 30, 12, 36, 0));

        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            headers["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert!(!headers.contains_key("x-amz-security-token"));
    }

    #[test]
    fn session_token_is_sent_and_signed() {
        let creds = Credentials::new("AKID", "secret", Some("session-token".into()), None);
        let request = SignableRequest {
            method: "POST",
            path: "/",
            query: "",
            headers: &[
                ("Content-Type", "application/x-amz-json-1.1"),
                ("Host", "ce.us-east-1.amazonaws.com"),
                ("X-Amz-Target", "AWSInsightsIndexService.GetCostAndUsage"),
            ],
            body: b"{}",
        };

        let with_token = sign(&request, &creds, "us-east-1", "ce", at(2024, 3, 10, 8, 0, 0));
        assert_eq!(with_token["x-amz-security-token"], "session-token");
        assert!(with_token["authorization"].contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target,"
        ));

        let without = Credentials::new("AKID", "secret", None, None);
        let plain = sign(&request, &without, "us-east-1", "ce", at(2024, 3, 10, 8, 0, 0));
        assert_ne!(with_token["authorization"], plain["authorization"]);
    }

    #[test]
    fn signature_depends_on_body() {
        let creds = Credentials::new("AKID", "secret", None, None);
        let headers = [("Host", "ce.us-east-1.amazonaws.com")];
        let make = |body: &'static [u8]| SignableRequest {
            method: "POST",
            path: "/",
            query: "",
            headers: &headers,
            body,
        };
        let now = at(2024, 3, 10, 8, 0, 0);
        let a = sign(&make(b"{\"a\":1}"), &creds, "us-east-1", "ce", now);
        let b = sign(&make(b"{\"a\":2}"), &creds, "us-east-1", "ce", now);
        assert_ne!(a["authorization"], b["authorization"]);
        assert!(a["authorization"].starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20240310/us-east-1/ce/aws4_request, SignedHeaders=host;x-amz-date, Signature="
        ));
    }
}
