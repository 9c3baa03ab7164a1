use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use reviewbot_core::{ReviewError, config::BrokerConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SIGNATURE_HEADER: &str = "Upstash-Signature";
const ISSUER: &str = "Upstash";
/// Lifetime of self-issued delivery signatures.
const TOKEN_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeliveryClaims {
    iss: String,
    sub: String,
    exp: u64,
    nbf: u64,
    iat: u64,
    jti: String,
    /// base64url SHA-256 of the delivered body.
    body: String,
}

fn body_hash(body: &[u8]) -> String { URL_SAFE_NO_PAD.encode(Sha256::digest(body)) }

/// Checks broker deliveries against the current and next signing keys.
#[derive(Clone)]
pub struct JobVerifier {
    keys: [String; 2],
    destination: String,
}

impl JobVerifier {
    pub fn new(config: &BrokerConfig, destination: impl Into<String>) -> Self {
        Self {
            keys: [config.current_signing_key.clone(), config.next_signing_key.clone()],
            destination: destination.into(),
        }
    }

    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<(), ReviewError> {
        let token = signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReviewError::Authentication(format!("{SIGNATURE_HEADER} missing")))?;
        let mut last_error = None;
        for key in self.keys.iter().filter(|k| !k.is_empty()) {
            match self.verify_with_key(token, key, body) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ReviewError::Authentication("no signing keys configured".into())))
    }

    fn verify_with_key(&self, token: &str, key: &str, body: &[u8]) -> Result<(), ReviewError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["iss", "sub", "exp", "nbf"]);
        validation.validate_nbf = true;
        validation.sub = Some(self.destination.clone());
        let claims = decode::<DeliveryClaims>(
            token,
            &DecodingKey::from_secret(key.as_bytes()),
            &validation,
        )
        .map_err(|e| ReviewError::Authentication(format!("invalid delivery signature: {e}")))?
        .claims;
        if claims.body.trim_end_matches('=') != body_hash(body) {
            return Err(ReviewError::Authentication("delivery body hash mismatch".into()));
        }
        Ok(())
    }
}

/// Issue an `Upstash-Signature` token for delivering `body` to `destination`.
pub fn sign_delivery(key: &str, destination: &str, body: &[u8]) -> Result<String> {
    let now = jsonwebtoken::get_current_timestamp();
    let claims = DeliveryClaims {
        iss: ISSUER.to_string(),
        sub: destination.to_string(),
        exp: now + TOKEN_TTL_SECS,
        nbf: now,
        iat: now,
        jti: format!("jwt_{:016x}", rand::random::<u64>()),
        body: body_hash(body),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(key.as_bytes()))
        .context("Failed to sign delivery")
}
