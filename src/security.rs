use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Webhook Signatures
// =============================================================================

/// Verify a hex-encoded HMAC-SHA256 signature over `data`
pub fn verify_hmac(data: &str, signature: &str, secret: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return false;
        }
    };

    mac.update(data.as_bytes());

    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid hex signature format");
            return false;
        }
    };

    // Constant-time comparison
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Validate timestamp is within `max_age_secs` of now, in either direction
pub fn validate_timestamp(timestamp: i64, max_age_secs: i64) -> bool {
    let now = chrono::Utc::now().timestamp();
    let age_seconds = (now - timestamp).abs();

    if age_seconds > max_age_secs {
        tracing::warn!(
            "Timestamp too old: {} seconds (max: {})",
            age_seconds,
            max_age_secs
        );
        return false;
    }

    true
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl StripeSignatureHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value.to_string()),
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp?;
        if signatures.is_empty() {
            return None;
        }

        Some(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verify a Stripe webhook delivery.
///
/// The signed payload is `"{t}.{body}"`; any `v1` entry may match so that
/// deliveries during secret rotation still verify.
pub fn verify_stripe_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> bool {
    let Some(parsed) = StripeSignatureHeader::parse(header) else {
        tracing::warn!("Malformed Stripe-Signature header");
        return false;
    };

    let signed_payload = format!("{}.{}", parsed.timestamp, payload);
    let matched = parsed
        .signatures
        .iter()
        .any(|sig| verify_hmac(&signed_payload, sig, secret));

    if !matched {
        tracing::warn!("Stripe signature mismatch");
        return false;
    }

    validate_timestamp(parsed.timestamp, tolerance_secs)
}

/// Build a `Stripe-Signature` header value for `payload`
pub fn sign_stripe_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(hmac_sha256(secret.as_bytes(), signed_payload.as_bytes()))
    )
}

// =============================================================================
// AWS Signature Version 4
// =============================================================================

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return Vec::new();
        }
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for `date` (YYYYMMDD), region and service
pub fn sigv4_signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_access_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
