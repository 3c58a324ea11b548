//! Request gate in front of the webhook endpoint.
//!
//! Checks run in a fixed order and the first failure wins:
//! POST method, self-test probe, payload well-formedness, then the shared
//! secret signature when one is configured. The gate never parses the JSON
//! body; subscribers do that if and when they need it.

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::{EventEnvelope, EventKind};
use crate::identity::InstanceIdentity;

type HmacSha256 = Hmac<Sha256>;

/// Names the event type of a delivery
pub const EVENT_HEADER: &str = "x-github-event";
/// Present on connectivity checks made from the configuration UI
pub const VALIDATION_HEADER: &str = "x-hook-validation";
/// Carries the base64 DER public key in self-test responses
pub const INSTANCE_IDENTITY_HEADER: &str = "x-instance-identity";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub const METHOD_POST_REQUIRED: &str = "Method POST required";
pub const ARITY_MESSAGE: &str = "Hook should take <event> and <payload> only";
pub const MISSING_EVENT_MESSAGE: &str = "Hook should contain event type";
pub const MISSING_PAYLOAD_MESSAGE: &str = "Hook should contain payload";

/// A request the gate answered itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    MethodNotAllowed,
    /// Self-test: answer with the instance public key and do nothing else.
    IdentityProbe { encoded_public_key: String },
    BadRequest(&'static str),
    InvalidSignature,
}

impl IntoResponse for Interception {
    fn into_response(self) -> Response {
        match self {
            Interception::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "POST")],
                METHOD_POST_REQUIRED,
            )
                .into_response(),
            Interception::IdentityProbe { encoded_public_key } => {
                let mut response = StatusCode::OK.into_response();
                match HeaderValue::from_str(&encoded_public_key) {
                    Ok(value) => {
                        response
                            .headers_mut()
                            .insert(INSTANCE_IDENTITY_HEADER, value);
                    }
                    Err(e) => warn!("Instance identity is not a valid header value: {}", e),
                }
                response
            }
            Interception::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Interception::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
            }
        }
    }
}

pub struct RequestGate {
    identity: Arc<InstanceIdentity>,
    webhook_secret: Option<String>,
}

impl RequestGate {
    pub fn new(identity: Arc<InstanceIdentity>, webhook_secret: Option<String>) -> Self {
        Self {
            identity,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn check(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<EventEnvelope, Interception> {
        should_be_post(method)?;
        self.returns_identity_if_probe(headers)?;
        let envelope = should_contain_payload(headers, body)?;
        self.should_be_signed(headers, body)?;
        Ok(envelope)
    }

    fn returns_identity_if_probe(&self, headers: &HeaderMap) -> Result<(), Interception> {
        if headers.contains_key(VALIDATION_HEADER) {
            debug!("Answering webhook self-test with instance identity");
            return Err(Interception::IdentityProbe {
                encoded_public_key: self.identity.encoded_public_key().to_string(),
            });
        }
        Ok(())
    }

    fn should_be_signed(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), Interception> {
        let Some(secret) = &self.webhook_secret else {
            return Ok(());
        };
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                warn!("Webhook secret is configured but no signature header was supplied");
                Interception::InvalidSignature
            })?;
        if !verify_signature(secret, body, signature) {
            warn!("Webhook signature verification failed");
            return Err(Interception::InvalidSignature);
        }
        Ok(())
    }
}

fn should_be_post(method: &Method) -> Result<(), Interception> {
    if *method != Method::POST {
        debug!(%method, "Rejected non-POST webhook request");
        return Err(Interception::MethodNotAllowed);
    }
    Ok(())
}

fn should_contain_payload(headers: &HeaderMap, body: &[u8]) -> Result<EventEnvelope, Interception> {
    let mut event_headers = headers.get_all(EVENT_HEADER).iter();
    let event_header = event_headers.next();
    is_true(event_headers.next().is_none(), ARITY_MESSAGE)?;

    let kind = event_header
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<EventKind>().ok());
    let Some(kind) = kind else {
        return Err(bad_request(MISSING_EVENT_MESSAGE));
    };

    let payload = std::str::from_utf8(body)
        .ok()
        .filter(|p| !p.trim().is_empty());
    let Some(payload) = payload else {
        return Err(bad_request(MISSING_PAYLOAD_MESSAGE));
    };

    Ok(EventEnvelope::new(kind, payload))
}

fn is_true(condition: bool, message: &'static str) -> Result<(), Interception> {
    if condition {
        Ok(())
    } else {
        Err(bad_request(message))
    }
}

fn bad_request(message: &'static str) -> Interception {
    debug!("Rejected webhook request: {}", message);
    Interception::BadRequest(message)
}

/// Verifies a `sha256=<hex>` HMAC signature of `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    // constant-time comparison
    mac.verify_slice(&expected).is_ok()
}
