use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use relay_web_generic::SessionPolicy;
use serde::{Deserialize, Serialize};
use std::env;

/// Prefix for layered environment overrides, e.g. `SMS_RELAY__UPSTREAM__USERNAME`.
pub const ENV_PREFIX: &str = "SMS_RELAY";

/// Variables the original gateway deployment is configured with.
const LEGACY_VARS: [(&str, &str); 4] = [
    ("ORG_URL", "upstream.login_url"),
    ("ORG_USER", "upstream.username"),
    ("ORG_PASSWORD_TOKEN", "upstream.password_token"),
    ("PORT", "server.port"),
];

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Salesforce login configuration
    pub upstream: UpstreamConfig,
    /// Relay behaviour
    pub relay: RelayConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
}

/// Salesforce credentials
#[derive(Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    /// Login host (default: https://login.salesforce.com)
    pub login_url: String,
    pub username: String,
    /// Password with the security token appended
    pub password_token: String,
    /// SOAP API version (default: 42.0)
    pub api_version: String,
    /// Connected app id; switches login to the OAuth2 password flow
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Relay behaviour
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    /// per_request or reuse (default: per_request)
    pub session_policy: SessionPolicy,
    /// Content type of relayed responses (default: application/xml)
    pub response_content_type: String,
}

/// Security configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes (default: 2MB)
    pub max_body_size: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: json or pretty (default: json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            login_url: relay_salesforce::DEFAULT_LOGIN_URL.to_string(),
            username: String::new(),
            password_token: String::new(),
            api_version: relay_salesforce::DEFAULT_API_VERSION.to_string(),
            client_id: None,
            client_secret: None,
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_policy: SessionPolicy::PerRequest,
            response_content_type: "application/xml".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: relay_web_axum::DEFAULT_BODY_LIMIT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false));

        Self::finish(
            builder,
            Environment::with_prefix(ENV_PREFIX).separator("__"),
            |key| env::var(key).ok(),
        )
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(Config::builder().add_source(Config::try_from(&AppConfig::default())?))
    }

    /// Apply prefixed environment variables, then the legacy variables on top.
    fn finish(
        mut builder: ConfigBuilder<DefaultState>,
        environment: Environment,
        legacy: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        builder = builder.add_source(environment);
        for (var, key) in LEGACY_VARS {
            builder = builder.set_override_option(key, legacy(var))?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot log in with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("upstream.login_url", &self.upstream.login_url),
            ("upstream.username", &self.upstream.username),
            ("upstream.password_token", &self.upstream.password_token),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{} must be set", key)));
            }
        }
        if self.upstream.client_id.is_some() && self.upstream.client_secret.is_none() {
            return Err(ConfigError::Message(
                "upstream.client_secret is required with upstream.client_id".into(),
            ));
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ConfigError::Message(format!(
                "logging.format must be json or pretty, got {}",
                other
            ))),
        }
    }
}
