//! # SMS Relay
//!
//! Relays inbound SMS webhooks from a telephony provider to a Salesforce Apex
//! REST endpoint and hands the CRM's answer back to the provider.
//!
//! ## Features
//!
//! - **Webhook relay**: `GET`/`POST /webhook` with `From`/`Body` query or form parameters
//! - **Salesforce login**: SOAP partner login or OAuth2 username-password flow
//! - **Opaque failures**: every error reaches the caller as a bare 500
//! - **Layered configuration**: files, `SMS_RELAY__*` variables and the legacy `ORG_*` variables
//! - **Observability**: structured JSON or pretty logs through `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sms_relay::{build_app, AppConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//!     axum::serve(listener, build_app(&config)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod telemetry;

pub use crate::config::*;

use axum::Router;
use relay_salesforce::{OAuthApp, SalesforceClient};
use relay_web_axum::AppState;
use relay_web_generic::RelayProcessor;
use std::sync::Arc;

/// Build the Salesforce client described by the upstream configuration.
pub fn salesforce_client(config: &UpstreamConfig) -> SalesforceClient {
    let client = SalesforceClient::with_login_url(
        config.username.clone(),
        config.password_token.clone(),
        config.login_url.clone(),
    )
    .api_version(config.api_version.clone());

    match (&config.client_id, &config.client_secret) {
        (Some(client_id), Some(client_secret)) => client.oauth_app(OAuthApp {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }),
        _ => client,
    }
}

/// Assemble the relay router from configuration.
pub fn build_app(config: &AppConfig) -> Router {
    let processor = RelayProcessor::new(Arc::new(salesforce_client(&config.upstream)))
        .with_policy(config.relay.session_policy)
        .with_content_type(config.relay.response_content_type.clone());

    relay_web_axum::router(AppState { processor }, config.security.max_body_size)
}

/// Common imports for SMS Relay usage
pub mod prelude {
    pub use crate::config::{
        AppConfig, LoggingConfig, RelayConfig, SecurityConfig, ServerConfig, UpstreamConfig,
    };
    pub use crate::{build_app, salesforce_client};
    pub use relay_core::*;
    pub use relay_web_generic::{RelayProcessor, SessionPolicy, SessionStore};
}
