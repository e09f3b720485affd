//! # Relay Core
//!
//! Core traits and types for the SMS-to-CRM relay.
//!
//! This crate provides the building blocks shared by every other relay crate:
//! - [`CrmUpstream`] trait for logging in to and forwarding to the CRM
//! - [`InboundMessage`] extraction from webhook parameters
//! - [`UpstreamRequest`] construction (phone normalization + URL encoding)
//! - Common response and error types
//!
//! ## Example
//!
//! ```rust
//! use relay_core::{InboundMessage, Session, UpstreamRequest};
//!
//! let params = relay_core::parse_params(Some("From=%2B1+555+1234&Body=hello"), b"");
//! let message = InboundMessage::from_params(&params).unwrap();
//! let session = Session::new("https://na1.example.com", "token");
//! let request = UpstreamRequest::build(&session, &message);
//! assert!(request.url.contains("From=+1+5551234"));
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Path of the Apex REST resource that receives relayed messages.
pub const APEX_SMS_PATH: &str = "/services/apexrest/sms/v1";

/// Errors produced while talking to the CRM.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport level failure (connect, TLS, body read)
    #[error("http error: {0}")]
    Http(String),
    /// The login handshake was rejected
    #[error("authentication error: {0}")]
    Auth(String),
    /// The CRM answered with a non-success status
    #[error("upstream returned HTTP {status}")]
    Status { status: u16, body: String },
    /// The CRM answered with something we could not interpret
    #[error("unexpected upstream payload: {0}")]
    Parse(String),
}

/// Relay-level error taxonomy.
///
/// Every variant is reported to the caller as the same opaque failure; the
/// distinction only matters for server-side logs.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("login failed: {0}")]
    Auth(UpstreamError),
    #[error("forwarding failed: {0}")]
    Upstream(UpstreamError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    /// Short stable label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::BadRequest(_) => "bad_request",
            RelayError::Auth(_) => "auth",
            RelayError::Upstream(_) => "upstream",
            RelayError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// HTTP status code for relay responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Credential bundle obtained from a login.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub instance_url: String,
    pub access_token: String,
    pub obtained_at: OffsetDateTime,
}

impl Session {
    pub fn new<S: Into<String>>(instance_url: S, access_token: S) -> Self {
        Self {
            instance_url: instance_url.into(),
            access_token: access_token.into(),
            obtained_at: OffsetDateTime::now_utc(),
        }
    }
}

// The access token is a bearer credential; keep it out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Ordered webhook parameters: query string pairs first, then form body pairs.
pub type Params = Vec<(String, String)>;

/// Decode the query string and an `application/x-www-form-urlencoded` body into [`Params`].
///
/// Undecodable input contributes no pairs rather than failing the request; a
/// missing field is reported later by [`InboundMessage::from_params`].
pub fn parse_params(query: Option<&str>, form_body: &[u8]) -> Params {
    let mut params: Params = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    if !form_body.is_empty() {
        let form: Params = serde_urlencoded::from_bytes(form_body).unwrap_or_default();
        params.extend(form);
    }
    params
}

fn lookup<'a>(params: &'a Params, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    })
}

/// Sender and text of an inbound SMS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
}

impl InboundMessage {
    /// Pull `From`/`from` and `Body`/`body` out of the webhook parameters.
    pub fn from_params(params: &Params) -> Result<Self, RelayError> {
        let from = lookup(params, &["From", "from"])
            .ok_or_else(|| RelayError::BadRequest("missing From parameter".into()))?;
        let body = lookup(params, &["Body", "body"])
            .ok_or_else(|| RelayError::BadRequest("missing Body parameter".into()))?;
        Ok(Self {
            from: normalize_phone(from),
            body: body.to_string(),
        })
    }
}

/// Restore the `+` that form decoding turned into a space and drop the rest of
/// the whitespace, e.g. `"+1 555 1234"` becomes `"+1+5551234"`.
pub fn normalize_phone(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut restored = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !restored {
                out.push('+');
                restored = true;
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Authenticated GET the relay issues against the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub url: String,
}

impl UpstreamRequest {
    pub fn build(session: &Session, message: &InboundMessage) -> Self {
        // `+` separators in the sender stay literal, everything else is encoded.
        let from = message
            .from
            .split('+')
            .map(form_encode)
            .collect::<Vec<_>>()
            .join("+");
        let url = format!(
            "{}{}?From={}&Body={}",
            session.instance_url.trim_end_matches('/'),
            APEX_SMS_PATH,
            from,
            form_encode(&message.body)
        );
        Self { url }
    }
}

/// Raw answer from the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Generic relay response that can be converted to any framework's response type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: HttpStatus,
    pub body: String,
    pub content_type: String,
}

impl RelayResponse {
    pub fn success(body: String, content_type: &str) -> Self {
        Self {
            status: HttpStatus::Ok,
            body,
            content_type: content_type.to_string(),
        }
    }

    /// Opaque failure: no detail is echoed back into the SMS reply channel.
    pub fn failure() -> Self {
        Self {
            status: HttpStatus::InternalServerError,
            body: String::new(),
            content_type: "text/plain".to_string(),
        }
    }
}

/// The CRM the relay logs in to and forwards messages to.
#[async_trait]
pub trait CrmUpstream: Send + Sync {
    /// Perform the login handshake and return a fresh session.
    async fn login(&self) -> Result<Session, UpstreamError>;

    /// Issue the authenticated GET and return the raw response.
    ///
    /// Implementations return [`UpstreamError::Status`] for non-2xx answers.
    async fn forward(
        &self,
        session: &Session,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}
