use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
};
use hmac::{Hmac, Mac};
use reviewbot_core::{AppError, ReviewError, config::Config};
use sha2::Sha256;

use crate::events::WebhookEvent;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Verify and extract GitHub Event Payload.
///
/// The body is buffered untouched, verified against the app's webhook secret, and
/// only then decoded.
#[derive(Debug, Clone)]
#[must_use]
pub struct GitHubEvent {
    pub delivery: Option<String>,
    pub event: WebhookEvent,
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (signature, kind, delivery) = {
            let headers = req.headers();
            let header = |name: &str| {
                headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            };
            (header(SIGNATURE_HEADER), header(EVENT_HEADER), header(DELIVERY_HEADER))
        };
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ReviewError::Validation(format!("error reading body: {e}")))?;
        verify_signature(config.github.app.webhook_secret.as_bytes(), &body, signature.as_deref())?;
        let event = match kind {
            Some(kind) => WebhookEvent::parse(&kind, &body)?,
            None => {
                tracing::debug!("Delivery {:?} has no {} header", delivery, EVENT_HEADER);
                WebhookEvent::Ignored { kind: String::new(), action: None }
            }
        };
        Ok(GitHubEvent { delivery, event })
    }
}

/// Check `X-Hub-Signature-256` against an HMAC-SHA256 of the exact body bytes.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), ReviewError> {
    fn err(m: &str) -> ReviewError { ReviewError::Authentication(m.to_string()) }
    let signature_sha256 = signature
        .ok_or_else(|| err("X-Hub-Signature-256 missing"))?
        .strip_prefix("sha256=")
        .ok_or_else(|| err("X-Hub-Signature-256 sha256= prefix missing"))?;
    let signature =
        hex::decode(signature_sha256).map_err(|_| err("X-Hub-Signature-256 malformed"))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    // Constant-time comparison
    mac.verify_slice(&signature).map_err(|_| err("signature mismatch"))
}

/// Produce the `X-Hub-Signature-256` header value GitHub would send for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{FromRequest, Request};
    use reviewbot_core::{ReviewError, config::Config};

    use super::{GitHubEvent, sign, verify_signature};

    const SECRET: &[u8] = b"It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_signature() {
        // Example from GitHub's webhook validation documentation
        assert_eq!(
            sign(SECRET, BODY),
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
        verify_signature(SECRET, BODY, Some(&sign(SECRET, BODY))).unwrap();
    }

    #[test]
    fn test_rejects_bit_flips() {
        let signature = sign(SECRET, BODY);
        for byte in 0..BODY.len() {
            for bit in 0..8 {
                let mut body = BODY.to_vec();
                body[byte] ^= 1 << bit;
                let result = verify_signature(SECRET, &body, Some(&signature));
                assert!(matches!(result, Err(ReviewError::Authentication(_))));
            }
        }
        let digest = hex::decode(signature.strip_prefix("sha256=").unwrap()).unwrap();
        for byte in 0..digest.len() {
            for bit in 0..8 {
                let mut digest = digest.clone();
                digest[byte] ^= 1 << bit;
                let signature = format!("sha256={}", hex::encode(&digest));
                let result = verify_signature(SECRET, BODY, Some(&signature));
                assert!(matches!(result, Err(ReviewError::Authentication(_))));
            }
        }
    }

    #[test]
    fn test_rejects_malformed_headers() {
        let signature = sign(SECRET, BODY);
        let hex = signature.strip_prefix("sha256=").unwrap();
        let cases = [None, Some(""), Some(hex), Some("sha1=abcd"), Some("sha256=not-hex")];
        for case in cases {
            let result = verify_signature(SECRET, BODY, case);
            assert!(matches!(result, Err(ReviewError::Authentication(_))), "{case:?}");
        }
        let wrong_secret = sign(b"other", BODY);
        assert!(verify_signature(SECRET, BODY, Some(&wrong_secret)).is_err());
    }

    #[test]
    fn test_extractor_is_send() {
        // Handlers only accept extractors whose futures can move between threads
        fn assert_send<T: Send>(_: &T) {}
        fn check(req: Request, state: &Arc<Config>) {
            assert_send(&GitHubEvent::from_request(req, state));
        }
        let _ = check;
    }
}
