//! Middleware making up the request pipeline

use crate::server::output::OutputSink;
use crate::server::record::{RemoteAddress, RequestHistory, UNKNOWN_REMOTE};
use crate::server::recording_body::{Completion, RecordingBody};
use crate::server::types::Credentials;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Challenge sent with every 401
pub const AUTH_CHALLENGE: &str = r#"Basic realm="restricted", charset="UTF-8""#;

const BASIC_PREFIX: &str = "basic ";

/// Expected credentials, kept only as SHA-256 digests
#[derive(Clone)]
pub struct AuthConfig {
    username_digest: [u8; 32],
    password_digest: [u8; 32],
}

impl AuthConfig {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            username_digest: digest(credentials.username()),
            password_digest: digest(credentials.password()),
        }
    }

    /// Both fields are always compared so timing never reveals which one failed
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let username_match = digest(username)[..].ct_eq(&self.username_digest[..]);
        let password_match = digest(password)[..].ct_eq(&self.password_digest[..]);
        (username_match & password_match).into()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Extract `(username, password)` from an `Authorization: Basic` header
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let prefix = value.get(..BASIC_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BASIC_PREFIX) {
        return None;
    }
    let decoded = STANDARD.decode(value[BASIC_PREFIX.len()..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, AUTH_CHALLENGE)],
        "Unauthorized",
    )
        .into_response()
}

/// Basic auth gate in front of the whole pipeline
pub async fn basic_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some((username, password)) = basic_credentials(request.headers()) {
        if auth_config.verify(&username, &password) {
            return next.run(request).await;
        }
    }

    warn!(
        method = %request.method(),
        uri = %request.uri(),
        remote = %remote_address(&request),
        "Basic auth not passed"
    );
    unauthorized()
}

/// Allow any origin and any method
pub async fn cors_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers
        .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(HeaderValue::from_static("*"));
    headers
        .entry(header::ACCESS_CONTROL_ALLOW_METHODS)
        .or_insert(HeaderValue::from_static("*"));
    response
}

/// Where completed requests go
#[derive(Clone)]
pub struct Instrumentation {
    pub history: Arc<RequestHistory>,
    pub sink: Arc<dyn OutputSink>,
}

fn remote_address(request: &Request) -> String {
    request
        .extensions()
        .get::<RemoteAddress>()
        .map(|remote| remote.0.clone())
        .unwrap_or_else(|| UNKNOWN_REMOTE.to_string())
}

fn header_u64(headers: &HeaderMap, name: header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Times the request and records it once the response body has been sent
pub async fn instrumentation_middleware(
    State(instrumentation): State<Arc<Instrumentation>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let remote_address = remote_address(&request);
    let body_size = header_u64(request.headers(), header::CONTENT_LENGTH)
        .or_else(|| request.body().size_hint().exact());

    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let content_length = header_u64(&parts.headers, header::CONTENT_LENGTH)
        .or_else(|| body.size_hint().exact())
        .unwrap_or(0);

    let completion = Completion {
        start,
        remote_address,
        url,
        method,
        status: parts.status,
        content_type,
        content_length,
        body_size,
        history: Arc::clone(&instrumentation.history),
        sink: Arc::clone(&instrumentation.sink),
    };
    Response::from_parts(parts, Body::new(RecordingBody::new(body, completion)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[rstest]
    #[case("Basic dXNlcjpwYXNz", Some(("user", "pass")))]
    #[case("basic dXNlcjpwYXNz", Some(("user", "pass")))]
    #[case("BASIC dXNlcjpwYTpzcw==", Some(("user", "pa:ss")))]
    #[case("Bearer dXNlcjpwYXNz", None)]
    #[case("Basic not-base64!", None)]
    #[case("Basic dXNlcnBhc3M=", None)]
    #[case("Basic", None)]
    fn test_basic_credentials(#[case] value: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = basic_credentials(&headers_with(value));
        assert_eq!(
            parsed,
            expected.map(|(u, p)| (u.to_string(), p.to_string()))
        );
    }

    #[test]
    fn test_missing_header() {
        assert!(basic_credentials(&HeaderMap::new()).is_none());
    }

    #[rstest]
    #[case("admin", "secret", true)]
    #[case("admin", "secreT", false)]
    #[case("Admin", "secret", false)]
    #[case("admin", "", false)]
    #[case("", "", false)]
    fn test_verify(#[case] username: &str, #[case] password: &str, #[case] expected: bool) {
        let config = AuthConfig::new(&Credentials::new("admin", "secret"));
        assert_eq!(config.verify(username, password), expected);
    }

    #[test]
    fn test_unauthorized_response() {
        let response = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            AUTH_CHALLENGE
        );
    }
}
