use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use relay_core::{CrmUpstream, Session, UpstreamError, UpstreamRequest, UpstreamResponse};
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
pub const DEFAULT_API_VERSION: &str = "42.0";

/// Connected-app credentials for the OAuth2 username-password flow.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
}

/// Salesforce client: logs in and calls the SMS Apex REST resource.
#[derive(Clone)]
pub struct SalesforceClient {
    /// Login host, e.g. `https://login.salesforce.com` or `https://test.salesforce.com`.
    pub login_url: String,
    pub username: String,
    /// Password with the security token appended.
    pub password_token: String,
    /// SOAP API version used for the login call.
    pub api_version: String,
    /// When set, log in through the OAuth2 token endpoint instead of SOAP.
    pub oauth: Option<OAuthApp>,
    http: reqwest::Client,
}

impl SalesforceClient {
    pub fn new<S: Into<String>>(username: S, password_token: S) -> Self {
        Self::with_login_url(username, password_token, DEFAULT_LOGIN_URL.to_string())
    }

    pub fn with_login_url<S: Into<String>>(
        username: S,
        password_token: S,
        login_url: String,
    ) -> Self {
        Self {
            login_url,
            username: username.into(),
            password_token: password_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            oauth: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn api_version<S: Into<String>>(mut self, version: S) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn oauth_app(mut self, app: OAuthApp) -> Self {
        self.oauth = Some(app);
        self
    }

    async fn soap_login(&self) -> Result<Session, UpstreamError> {
        let url = format!(
            "{}/services/Soap/u/{}",
            self.login_url.trim_end_matches('/'),
            self.api_version
        );
        let envelope = login_envelope(&self.username, &self.password_token);
        let res = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "login")
            .body(envelope)
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        // Salesforce reports bad credentials as a 500 carrying a SOAP fault.
        let parsed = parse_login_response(&text)?;
        if let Some(fault) = parsed.fault {
            return Err(UpstreamError::Auth(fault));
        }
        if !status.is_success() {
            return Err(UpstreamError::Auth(format!("login returned HTTP {}", status)));
        }
        let server_url = parsed
            .server_url
            .ok_or_else(|| UpstreamError::Parse("login response without serverUrl".into()))?;
        let session_id = parsed
            .session_id
            .ok_or_else(|| UpstreamError::Parse("login response without sessionId".into()))?;

        Ok(Session::new(instance_url_of(&server_url)?, session_id))
    }

    async fn oauth_login(&self, app: &OAuthApp) -> Result<Session, UpstreamError> {
        let url = format!(
            "{}/services/oauth2/token",
            self.login_url.trim_end_matches('/')
        );
        let form = [
            ("grant_type", "password"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password_token.as_str()),
        ];
        let res = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Auth(format!("HTTP {}: {}", status, body)));
        }

        let raw = res
            .text()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;
        let token: TokenResponse =
            serde_json::from_str(&raw).map_err(|e| UpstreamError::Parse(e.to_string()))?;
        Ok(Session::new(token.instance_url, token.access_token))
    }
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("api_version", &self.api_version)
            .field("oauth", &self.oauth.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LoginResult {
    server_url: Option<String>,
    session_id: Option<String>,
    fault: Option<String>,
}

fn login_envelope(username: &str, password: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<se:Envelope xmlns:se="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<se:Header/><se:Body>"#,
            r#"<login xmlns="urn:partner.soap.sforce.com">"#,
            r#"<username>{}</username><password>{}</password>"#,
            r#"</login></se:Body></se:Envelope>"#
        ),
        quick_xml::escape::escape(username),
        quick_xml::escape::escape(password)
    )
}

fn parse_login_response(xml: &str) -> Result<LoginResult, UpstreamError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut result = LoginResult::default();
    let mut current: Option<Vec<u8>> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => current = Some(e.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(t)) => {
                let Some(name) = current.as_deref() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| UpstreamError::Parse(e.to_string()))?
                    .into_owned();
                match name {
                    b"serverUrl" => result.server_url = Some(text),
                    b"sessionId" => result.session_id = Some(text),
                    b"faultstring" => result.fault = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(UpstreamError::Parse(e.to_string())),
        }
    }
    Ok(result)
}

/// `https://na1.salesforce.com/services/Soap/u/42.0/00D...` -> `https://na1.salesforce.com`
fn instance_url_of(server_url: &str) -> Result<String, UpstreamError> {
    let url = url::Url::parse(server_url)
        .map_err(|e| UpstreamError::Parse(format!("serverUrl: {}", e)))?;
    Ok(url.origin().ascii_serialization())
}

#[async_trait]
impl CrmUpstream for SalesforceClient {
    async fn login(&self) -> Result<Session, UpstreamError> {
        debug!(login_url = %self.login_url, oauth = self.oauth.is_some(), "logging in");
        match &self.oauth {
            Some(app) => self.oauth_login(app).await,
            None => self.soap_login().await,
        }
    }

    async fn forward(
        &self,
        session: &Session,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let res = self
            .http
            .get(&request.url)
            .bearer_auth(&session.access_token)
            .header("Accept", "*")
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        if !(200..300).contains(&status) {
            warn!(status, "apex endpoint rejected relayed message");
            return Err(UpstreamError::Status { status, body });
        }
        Ok(UpstreamResponse { status, body })
    }
}
