pub mod api;
pub mod auth;
pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod error;
pub mod limits;
pub mod manager;
pub mod state;
pub mod tls;

pub use config::{Cli, Config, FileMode};
pub use error::{Result, ServerError};
pub use state::AppState;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

/// Assemble the HTTPS application: routes, host guard, auth, tracing and
/// the optional overall request timeout.
pub fn app(state: AppState) -> Router {
    let mut router = api::routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), host_port_guard))
        .layer(TraceLayer::new_for_http());

    if !state.config.request_timeout.is_zero() {
        router = router.layer(tower_http::timeout::TimeoutLayer::new(
            state.config.request_timeout,
        ));
    }

    router.with_state(state)
}

/// HTTPS front guard: a request addressed to a different port than the
/// public `server_addr` would receive links and curl commands that do not
/// match how the client reached the instance, so it is rejected. A `Host`
/// without a port means the client used the HTTPS default, 443.
async fn host_port_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        let request_port = config::split_host_port(host).1.unwrap_or(443);
        let server_port = config::split_host_port(&state.config.server_addr)
            .1
            .unwrap_or(443);
        if request_port != server_port {
            return ServerError::BadRequest(format!(
                "request port {request_port} does not match the server address {}",
                state.config.server_addr
            ))
            .into_response();
        }
    }
    next.run(request).await
}

/// Router for the plain-HTTP listener: every request is answered with a
/// `302 Found` to the HTTPS endpoint, keeping the hostname the client
/// asked for and rewriting scheme and port to the canonical ones.
pub fn redirect_app(server_addr: String) -> Router {
    Router::new().fallback(move |request: Request| {
        let server_addr = server_addr.clone();
        async move {
            let (canonical_host, canonical_port) = config::split_host_port(&server_addr);
            let host = request
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(|value| config::split_host_port(value).0)
                .filter(|host| !host.is_empty())
                .unwrap_or(canonical_host);
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let target = match canonical_port {
                Some(port) => format!("https://{host}:{port}{path}"),
                None => format!("https://{host}{path}"),
            };

            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, target)
                .body(Body::empty())
                .unwrap()
        }
    })
}
