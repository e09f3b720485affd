use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use mockito::{Matcher, Mock, ServerGuard};
use relay_web_generic::SessionPolicy;
use sms_relay::{AppConfig, build_app};
use tower::ServiceExt;

fn login_ok(server_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <serverUrl>{}/services/Soap/u/42.0/00D000000000001</serverUrl>
        <sessionId>SESSION-TOKEN</sessionId>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#,
        server_url
    )
}

fn config_for(server: &ServerGuard) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.login_url = server.url();
    config.upstream.username = "relay@example.com".into();
    config.upstream.password_token = "pwTOKEN".into();
    config
}

async fn mock_login(server: &mut ServerGuard, hits: usize) -> Mock {
    let body = login_ok(&server.url());
    server
        .mock("POST", "/services/Soap/u/42.0")
        .match_header("soapaction", "login")
        .with_status(200)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

/// Send a request to the app and return (status, body text).
async fn send(config: &AppConfig, request: Request<Body>) -> (StatusCode, String) {
    let resp = build_app(config).oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn relays_webhook_and_echoes_apex_response() {
    let mut server = mockito::Server::new_async().await;
    let login = mock_login(&mut server, 1).await;
    let apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Regex(r"^From=\+1\+5551234&Body=hello$".into()))
        .match_header("authorization", "Bearer SESSION-TOKEN")
        .with_status(200)
        .with_body("<Response><Message>Thanks!</Message></Response>")
        .create_async()
        .await;

    let config = config_for(&server);
    let (status, body) = send(&config, get("/webhook?From=%2B1+555+1234&Body=hello")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<Response><Message>Thanks!</Message></Response>");
    login.assert_async().await;
    apex.assert_async().await;
}

#[tokio::test]
async fn post_form_webhook_is_relayed() {
    let mut server = mockito::Server::new_async().await;
    let _login = mock_login(&mut server, 1).await;
    let apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Regex(r"Body=stop$".into()))
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let config = config_for(&server);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("From=%2B15550001111&To=%2B15550002222&Body=stop"))
        .unwrap();
    let (status, body) = send(&config, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
    apex.assert_async().await;
}

#[tokio::test]
async fn apex_error_is_not_echoed() {
    let mut server = mockito::Server::new_async().await;
    let _login = mock_login(&mut server, 1).await;
    let _apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("System.NullPointerException: Attempt to de-reference a null object")
        .create_async()
        .await;

    let config = config_for(&server);
    let (status, body) = send(&config, get("/webhook?From=%2B1&Body=hi")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn login_failure_returns_opaque_500() {
    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("POST", "/services/Soap/u/42.0")
        .with_status(500)
        .with_body(
            "<Envelope><Body><Fault><faultstring>INVALID_LOGIN: bad password</faultstring></Fault></Body></Envelope>",
        )
        .create_async()
        .await;
    let apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = config_for(&server);
    let (status, body) = send(&config, get("/webhook?From=%2B1&Body=hi")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("INVALID_LOGIN"));
    apex.assert_async().await;
}

#[tokio::test]
async fn missing_body_never_reaches_salesforce() {
    let mut server = mockito::Server::new_async().await;
    let login = mock_login(&mut server, 0).await;

    let config = config_for(&server);
    let (status, body) = send(&config, get("/webhook?From=%2B15551234")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    login.assert_async().await;
}

#[tokio::test]
async fn unknown_route_is_error() {
    let server = mockito::Server::new_async().await;
    let config = config_for(&server);

    let (status, body) = send(&config, get("/sms?From=%2B1&Body=hi")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unreachable_salesforce_returns_500() {
    let mut config = AppConfig::default();
    config.upstream.login_url = "http://127.0.0.1:1".into();
    config.upstream.username = "relay@example.com".into();
    config.upstream.password_token = "pw".into();

    let (status, body) = send(&config, get("/webhook?From=%2B1&Body=hi")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn logs_in_before_every_forward_by_default() {
    let mut server = mockito::Server::new_async().await;
    let login = mock_login(&mut server, 3).await;
    let _apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("ok")
        .expect(3)
        .create_async()
        .await;

    let config = config_for(&server);
    let app = build_app(&config);
    for i in 0..3 {
        let uri = format!("/webhook?From=%2B1555000{}&Body=msg{}", i, i);
        let resp = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    login.assert_async().await;
}

#[tokio::test]
async fn reuse_policy_logs_in_once_across_concurrent_requests() {
    use futures::future;

    let mut server = mockito::Server::new_async().await;
    let login = mock_login(&mut server, 1).await;
    let _apex = server
        .mock("GET", "/services/apexrest/sms/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.relay.session_policy = SessionPolicy::Reuse;
    let app = build_app(&config);

    // Prime the session so the concurrent batch below never races a login.
    let resp = app.clone().oneshot(get("/webhook?From=%2B1&Body=first")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let requests = (0..10).map(|i| {
        let app = app.clone();
        let uri = format!("/webhook?from=%2B1555000{}&body=hello{}", i, i);
        async move { app.oneshot(get(&uri)).await.unwrap().status() }
    });
    let statuses = future::join_all(requests).await;

    assert!(statuses.iter().all(|s| *s == StatusCode::OK));
    login.assert_async().await;
}
