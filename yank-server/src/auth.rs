//! Request authorization.
//!
//! An instance without a configured key is open: every request passes.
//! With a key, a request must carry one of:
//!
//! - `Authorization: Basic ...` — the password half is run through the
//!   instance's key derivation and compared to the configured key; the
//!   username is ignored.
//! - `Authorization: HMAC v1 ...` — a per-request signature, see
//!   [`crate::crypto`].
//! - query parameter `a=<base64 of the full Authorization value>` — for
//!   browser `<a>` downloads that cannot set headers.
//!
//! The web UI, static assets and `/info` stay reachable so clients can
//! discover the salt and probe the instance before authenticating.

use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use constant_time_eq::constant_time_eq;

use crate::crypto::{self, Key};
use crate::error::ServerError;
use crate::state::AppState;

/// Paths reachable without credentials (GET/HEAD only).
fn is_public(method: &Method, path: &str) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }
    path == "/" || path == "/info" || path == "/robots.txt" || path == "/favicon.ico"
        || path.starts_with("/static/")
}

pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(key) = &state.config.key else {
        return next.run(request).await;
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    if is_public(&method, &path) {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let credential = match header_value {
        Some(value) => Some(value),
        None => extract_query_auth(request.uri().query()),
    };

    match credential {
        Some(value) if authorize(key, &value, method.as_str(), &path) => next.run(request).await,
        _ => ServerError::Unauthorized.into_response(),
    }
}

/// Validate one `Authorization` value against the instance key.
pub fn authorize(key: &Key, value: &str, method: &str, path: &str) -> bool {
    if let Some(encoded) = value.strip_prefix("Basic ") {
        return check_basic(key, encoded);
    }
    crypto::verify_request(&key.bytes, value, method, path)
}

fn check_basic(key: &Key, encoded: &str) -> bool {
    let decoded = match BASE64.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let decoded = match String::from_utf8(decoded) {
        Ok(s) => s,
        Err(_) => return false,
    };
    // The username before the colon is ignored.
    let password = match decoded.split_once(':') {
        Some((_, password)) => password,
        None => return false,
    };
    let derived = crypto::derive_key(password.as_bytes(), &key.salt);
    constant_time_eq(&derived.bytes, &key.bytes)
}

/// The `a` query parameter carries a base64-encoded `Authorization` value.
fn extract_query_auth(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let (name, value) = match pair.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        if name != "a" {
            continue;
        }
        let decoded = BASE64.decode(value.as_bytes()).ok()?;
        return String::from_utf8(decoded).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> Key {
        crypto::derive_key(b"some password", b"some salt")
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
    }

    #[test]
    fn basic_accepts_correct_password() {
        assert!(authorize(&key(), &basic("x", "some password"), "GET", "/"));
    }

    #[test]
    fn basic_rejects_wrong_password() {
        assert!(!authorize(&key(), &basic("x", "incorrect password"), "GET", "/"));
    }

    #[test]
    fn basic_ignores_username() {
        assert!(authorize(&key(), &basic("somebody-else", "some password"), "GET", "/"));
    }

    #[test]
    fn hmac_accepts_matching_request() {
        let key = key();
        let value = crypto::sign_request(&key.bytes, "GET", "/", Duration::from_secs(60));
        assert!(authorize(&key, &value, "GET", "/"));
    }

    #[test]
    fn hmac_rejects_wrong_path() {
        let key = key();
        let value = crypto::sign_request(&key.bytes, "GET", "/wrong-path", Duration::from_secs(60));
        assert!(!authorize(&key, &value, "GET", "/"));
    }

    #[test]
    fn hmac_rejects_wrong_method() {
        let key = key();
        let value = crypto::sign_request(&key.bytes, "PUT", "/", Duration::from_secs(60));
        assert!(!authorize(&key, &value, "GET", "/"));
    }

    #[test]
    fn hmac_rejects_wrong_key() {
        let key = key();
        let other = crypto::derive_key(b"other password", b"some salt");
        let value = crypto::sign_request(&other.bytes, "GET", "/", Duration::from_secs(60));
        assert!(!authorize(&key, &value, "GET", "/"));
    }

    #[test]
    fn query_param_decodes_to_header_value() {
        let key = key();
        let value = crypto::sign_request(&key.bytes, "GET", "/thing", Duration::from_secs(60));
        let encoded = BASE64.encode(&value);
        let query = format!("x=1&a={encoded}");
        let extracted = extract_query_auth(Some(&query)).unwrap();
        assert_eq!(extracted, value);
        assert!(authorize(&key, &extracted, "GET", "/thing"));
    }

    #[test]
    fn query_param_with_garbage_is_none() {
        assert!(extract_query_auth(Some("a=!!!not-base64!!!")).is_none());
        assert!(extract_query_auth(Some("b=abcd")).is_none());
        assert!(extract_query_auth(None).is_none());
    }

    #[test]
    fn public_paths_are_get_only() {
        assert!(is_public(&Method::GET, "/"));
        assert!(is_public(&Method::GET, "/info"));
        assert!(is_public(&Method::HEAD, "/static/app.js"));
        assert!(!is_public(&Method::PUT, "/"));
        assert!(!is_public(&Method::GET, "/verify"));
        assert!(!is_public(&Method::GET, "/some-id"));
    }
}
