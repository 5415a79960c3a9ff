use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid token format")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// Verifies `v1.<payload>.<signature>` HMAC-SHA256 bearer tokens.
pub struct TokenVerifier {
    secret: String,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        TokenVerifier {
            secret: secret.to_string(),
        }
    }

    /// Validate a token and return the authenticated user id.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 || parts[0] != "v1" {
            return Err(AuthError::Malformed);
        }

        let payload_b64 = parts[1];
        let provided_sig = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| AuthError::Malformed)?;
        let expected_sig = sign(payload_b64.as_bytes(), self.secret.as_bytes());

        if !constant_time_eq(&expected_sig, &provided_sig) {
            return Err(AuthError::BadSignature);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;

        if claims.exp <= unix_now() {
            return Err(AuthError::Expired);
        }

        Ok(claims.sub)
    }

    /// Mint a token for `user_id`, valid for `ttl`. Login lives outside
    /// this service; this is here for tooling and tests.
    #[allow(dead_code)]
    pub fn issue(&self, user_id: &str, ttl: Duration) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: unix_now() + ttl.as_secs(),
        };
        let payload = serde_json::to_vec(&claims).expect("serialize claims");
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let sig = sign(payload_b64.as_bytes(), self.secret.as_bytes());
        format!("v1.{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(sig))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
    mac.update(payload_b64);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}
