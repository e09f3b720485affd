use relay_core::{
    CrmUpstream, InboundMessage, Params, RelayError, RelayResponse, Session, UpstreamRequest,
    UpstreamResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// When the relay performs the login handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Log in before every forward.
    #[default]
    PerRequest,
    /// Log in once and keep using the stored session.
    ///
    /// The stored session is never invalidated: once Salesforce expires it
    /// (401 `INVALID_SESSION_ID`), every forward fails until the process restarts.
    Reuse,
}

/// The single process-wide session slot.
///
/// Logins replace the stored session wholesale; concurrent logins may
/// overwrite each other, last writer wins.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, session: Session) {
        *self.inner.write().await = Some(session);
    }
}

/// Framework-agnostic processor that turns webhook parameters into an
/// authenticated CRM call.
#[derive(Clone)]
pub struct RelayProcessor {
    upstream: Arc<dyn CrmUpstream>,
    sessions: SessionStore,
    policy: SessionPolicy,
    content_type: String,
}

impl RelayProcessor {
    pub fn new(upstream: Arc<dyn CrmUpstream>) -> Self {
        Self {
            upstream,
            sessions: SessionStore::new(),
            policy: SessionPolicy::default(),
            content_type: "application/xml".to_string(),
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one webhook call and return a framework-agnostic response
    pub async fn process(&self, params: &Params) -> RelayResponse {
        match self.process_internal(params).await {
            Ok(response) => {
                info!(status = response.status, "relayed inbound message");
                RelayResponse::success(response.body, &self.content_type)
            }
            Err(e) => self.error_to_response(e),
        }
    }

    /// Response for anything that is not a webhook route.
    pub fn invalid_request(&self, method: &str, path: &str) -> RelayResponse {
        self.error_to_response(RelayError::InvalidRequest(format!("{} {}", method, path)))
    }

    /// Response for a request whose body could not be read.
    pub fn rejected_body(&self, detail: &str) -> RelayResponse {
        self.error_to_response(RelayError::BadRequest(format!("unreadable body: {}", detail)))
    }

    async fn process_internal(&self, params: &Params) -> Result<UpstreamResponse, RelayError> {
        let message = InboundMessage::from_params(params)?;
        let session = self.session().await?;
        let request = UpstreamRequest::build(&session, &message);
        debug!(url = %request.url, "forwarding to apex endpoint");

        self.upstream
            .forward(&session, &request)
            .await
            .map_err(RelayError::Upstream)
    }

    async fn session(&self) -> Result<Session, RelayError> {
        if self.policy == SessionPolicy::Reuse {
            if let Some(session) = self.sessions.current().await {
                return Ok(session);
            }
        }
        let session = self.upstream.login().await.map_err(RelayError::Auth)?;
        debug!(instance_url = %session.instance_url, "login succeeded");
        self.sessions.replace(session.clone()).await;
        Ok(session)
    }

    fn error_to_response(&self, error: RelayError) -> RelayResponse {
        // Details stay in the server log; the SMS reply channel only sees a bare 500.
        warn!(kind = error.kind(), error = %error, "relay request failed");
        RelayResponse::failure()
    }
}

/// Helper trait for framework adapters to convert responses
pub trait ResponseConverter {
    type ResponseType;

    fn from_relay_response(response: RelayResponse) -> Self::ResponseType;
}
