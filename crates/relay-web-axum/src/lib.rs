use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use relay_core::RelayResponse;
use relay_web_generic::{RelayProcessor, ResponseConverter};
use tower_http::trace::TraceLayer;

/// Matches the 2 MiB body cap of the original gateway.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub processor: RelayProcessor,
}

/// Axum-specific response converter
pub struct AxumResponseConverter;

impl ResponseConverter for AxumResponseConverter {
    type ResponseType = Response;

    fn from_relay_response(response: RelayResponse) -> Self::ResponseType {
        let status = StatusCode::from_u16(response.status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (
            status,
            [(header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response()
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_none_or(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Webhook handler: GET/POST /webhook
pub async fn webhook(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // Rejections (e.g. over the body limit) get the same opaque 500 as any other failure.
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let response = state.processor.rejected_body(&rejection.body_text());
            return AxumResponseConverter::from_relay_response(response);
        }
    };
    let form: &[u8] = if is_form(&headers) { &body } else { &[] };
    let params = relay_core::parse_params(query.as_deref(), form);
    let response = state.processor.process(&params).await;
    AxumResponseConverter::from_relay_response(response)
}

/// Fallback for every other path or method.
pub async fn invalid_request(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let response = state.processor.invalid_request(method.as_str(), uri.path());
    AxumResponseConverter::from_relay_response(response)
}

/// Build the relay router. Trailing slashes on `/webhook` are accepted.
pub fn router(state: AppState, body_limit: usize) -> Router {
    let webhook_route = get(webhook).post(webhook).fallback(invalid_request);

    Router::new()
        .route("/webhook", webhook_route.clone())
        .route("/webhook/", webhook_route)
        .fallback(invalid_request)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
