//! HTTP surface: routing, identifier rules, upload options and the two
//! response formats.
//!
//! One quirk is intentional and kept for client compatibility: the request
//! TTL (`X-TTL` header or `t` parameter) is a human duration like `30s` or
//! `4d`, while the response `X-TTL` header is plain seconds.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::clipboard::{Clipboard, Entry, StoreError};
use crate::config::{Config, FileMode, RANDOM_ID_LEN};
use crate::crypto::now_secs;
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Ids that can never name a clipboard entry.
pub const RESERVED_IDS: &[&str] = &["info", "verify", "static", "robots.txt", "favicon.ico"];

const MAX_ID_LEN: usize = 64;
const RANDOM_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(rust_embed::RustEmbed)]
#[folder = "src/assets/static/"]
struct StaticAssets;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handle_root).put(put_random).post(put_random),
        )
        .route(
            "/info",
            get(handle_info)
                .put(reserved_id)
                .post(reserved_id)
                .delete(reserved_id),
        )
        .route(
            "/verify",
            get(handle_verify)
                .put(reserved_id)
                .post(reserved_id)
                .delete(reserved_id),
        )
        .route("/static/{*path}", get(static_asset))
        .route(
            "/{id}",
            get(get_entry)
                .head(head_entry)
                .put(put_entry)
                .post(put_entry)
                .delete(delete_entry),
        )
        .fallback(fallback)
}

async fn fallback() -> ServerError {
    ServerError::NotFound
}

async fn reserved_id() -> ServerError {
    ServerError::BadRequest("reserved name".to_string())
}

// ---------------------------------------------------------------------------
// Front page, info, verify, static assets

async fn handle_root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if user_agent.starts_with("curl/") {
        let page = include_str!("assets/landing.txt")
            .replace("{{SERVER_URL}}", &state.config.base_url())
            .replace("{{PINNED_PUBKEY}}", &state.pinned_pubkey);
        return page.into_response();
    }

    Html(include_str!("assets/index.html")).into_response()
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    #[serde(rename = "serverAddr")]
    server_addr: String,
    /// Base64 key-derivation salt; empty on unauthenticated instances.
    salt: String,
}

async fn handle_info(State(state): State<AppState>) -> Json<InfoResponse> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    let salt = state
        .config
        .key
        .as_ref()
        .map(|key| BASE64.encode(&key.salt))
        .unwrap_or_default();

    Json(InfoResponse {
        server_addr: state.config.server_addr.clone(),
        salt,
    })
}

/// Credential probe; the auth middleware has already said yes by the time
/// this runs.
async fn handle_verify() -> StatusCode {
    StatusCode::OK
}

async fn static_asset(Path(path): Path<String>) -> Result<Response> {
    let asset = StaticAssets::get(&path).ok_or(ServerError::NotFound)?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .body(Body::from(asset.data.into_owned()))
        .unwrap())
}

async fn robots() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /\n",
    )
        .into_response()
}

async fn favicon() -> Result<Response> {
    let asset = StaticAssets::get("favicon.svg").ok_or(ServerError::NotFound)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/svg+xml")
        .body(Body::from(asset.data.into_owned()))
        .unwrap())
}

// ---------------------------------------------------------------------------
// Identifier rules

/// An id must be 1-64 characters of `[A-Za-z0-9._-]`, must not start with a
/// dot and must not be a reserved name. The character class rules out path
/// separators, so a valid id can never resolve outside the clipboard dir.
pub fn validate_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(format!("id must be 1-{MAX_ID_LEN} characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("id contains invalid characters".to_string());
    }
    if id.starts_with('.') {
        return Err("id must not start with a dot".to_string());
    }
    if RESERVED_IDS.contains(&id) {
        return Err(format!("{id} is a reserved name"));
    }
    Ok(())
}

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RANDOM_ID_LEN)
        .map(|_| RANDOM_ID_CHARSET[rng.gen_range(0..RANDOM_ID_CHARSET.len())] as char)
        .collect()
}

// ---------------------------------------------------------------------------
// Upload options

#[derive(Debug, Default, Deserialize)]
struct PutQuery {
    /// TTL as a human duration.
    t: Option<String>,
    /// File mode, `ro` or `rw`.
    m: Option<String>,
    /// Response format, `text` or `json`.
    f: Option<String>,
    /// `1` = stream through a one-shot pipe.
    s: Option<String>,
    /// `1` = reserve the id with an empty placeholder.
    r: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseFormat {
    Text,
    Json,
}

struct PutOptions {
    ttl: u64,
    expires: u64,
    mode: FileMode,
    format: ResponseFormat,
    stream: bool,
    reserve: bool,
}

impl PutOptions {
    /// Merge header and query options; headers win on conflict.
    fn resolve(config: &Config, headers: &HeaderMap, query: PutQuery, now: u64) -> Result<Self> {
        let ttl_raw = header_value(headers, "X-TTL").or(query.t);
        let mode_raw = header_value(headers, "X-Mode").or(query.m);
        let format_raw = header_value(headers, "X-Format").or(query.f);

        let ttl = resolve_ttl(ttl_raw.as_deref(), config.file_expire_after)?;
        let expires = if ttl == 0 { 0 } else { now + ttl };

        let mode = match mode_raw.as_deref() {
            Some(raw) => raw
                .parse::<FileMode>()
                .map_err(ServerError::BadRequest)?,
            None => config.default_file_mode(),
        };
        if !config.mode_allowed(mode) {
            return Err(ServerError::BadRequest(format!(
                "mode {} is not allowed on this server",
                mode.as_str()
            )));
        }

        let format = match format_raw.as_deref() {
            None | Some("text") => ResponseFormat::Text,
            Some("json") => ResponseFormat::Json,
            Some(other) => {
                return Err(ServerError::BadRequest(format!("unknown format: {other}")))
            }
        };

        Ok(PutOptions {
            ttl,
            expires,
            mode,
            format,
            stream: query.s.as_deref() == Some("1"),
            reserve: query.r.as_deref() == Some("1"),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Parse the requested TTL and clamp it to the server maximum. `0` means
/// "never", which is only honored when the server itself has no expiry.
fn resolve_ttl(requested: Option<&str>, max: Duration) -> Result<u64> {
    let max = max.as_secs();
    let requested = match requested {
        None | Some("") => max,
        Some("0") => 0,
        Some(raw) => humantime::parse_duration(raw)
            .map_err(|err| ServerError::BadRequest(format!("invalid ttl: {err}")))?
            .as_secs(),
    };
    if max > 0 && (requested == 0 || requested > max) {
        return Ok(max);
    }
    Ok(requested)
}

// ---------------------------------------------------------------------------
// Visitor identity

/// The identity used for rate limiting: the trusted forwarded header when
/// one is configured, the transport address otherwise. Defaulting to the
/// transport address keeps the header unspoofable in direct deployments.
fn visitor_key(config: &Config, headers: &HeaderMap, peer: Option<&SocketAddr>) -> String {
    if let Some(name) = &config.trusted_proxy_header {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

// ---------------------------------------------------------------------------
// Upload (PUT/POST)

async fn put_random(
    State(state): State<AppState>,
    Query(query): Query<PutQuery>,
    request: Request,
) -> Result<Response> {
    let mut id = random_id();
    // Collisions are vanishingly rare; still, never silently overwrite.
    for _ in 0..10 {
        if state.clipboard.stat(&id).await?.is_none() {
            break;
        }
        id = random_id();
    }
    put_impl(state, id, query, request).await
}

async fn put_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PutQuery>,
    request: Request,
) -> Result<Response> {
    put_impl(state, id, query, request).await
}

async fn put_impl(
    state: AppState,
    id: String,
    query: PutQuery,
    request: Request,
) -> Result<Response> {
    validate_id(&id).map_err(ServerError::BadRequest)?;

    let now = now_secs();
    let headers = request.headers().clone();
    let options = PutOptions::resolve(&state.config, &headers, query, now)?;
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let visitor = visitor_key(&state.config, &headers, peer.as_ref());

    let existing = state
        .clipboard
        .stat(&id)
        .await?
        .filter(|entry| !entry.expired(now));
    if let Some(entry) = &existing {
        if entry.mode == FileMode::ReadOnly {
            return Err(ServerError::ReadOnlyEntry);
        }
    }
    let is_new = existing.is_none();

    if is_new {
        let allowed = state
            .visitors
            .lock()
            .expect("visitor mutex poisoned")
            .allows(&visitor);
        if !allowed {
            return Err(ServerError::TooManyRequests(
                "visitor upload limit reached".to_string(),
            ));
        }

        let limit = state.config.clipboard_count_limit;
        if limit > 0 && state.stats_snapshot().count >= limit {
            return Err(ServerError::TooManyRequests(
                "clipboard entry limit reached".to_string(),
            ));
        }
    }

    if options.stream {
        return put_stream(state, id, options, headers, visitor, is_new, request.into_body()).await;
    }

    if options.reserve {
        // Placeholder only; the body, if any, is dropped unread.
        let receipt = state
            .clipboard
            .reserve(&id, options.mode, options.expires, now)
            .await
            .map_err(store_error)?;
        record_write(&state, &visitor, is_new, receipt.replaced, receipt.size);
        return Ok(entry_response(&state, &id, options.ttl, options.expires, options.format));
    }

    let cap = effective_cap(&state, existing.as_ref().map(|entry| entry.size))?;
    let mut reader = body_reader(request.into_body());
    let receipt = state
        .clipboard
        .write(&id, &mut reader, cap, options.mode, options.expires, now)
        .await
        .map_err(store_error)?;

    record_write(&state, &visitor, is_new, receipt.replaced, receipt.size);
    Ok(entry_response(&state, &id, options.ttl, options.expires, options.format))
}

/// One-shot streaming upload: create the pipe, wait for the consumer and
/// pump the body through without persisting it.
async fn put_stream(
    state: AppState,
    id: String,
    options: PutOptions,
    headers: HeaderMap,
    visitor: String,
    is_new: bool,
    body: Body,
) -> Result<Response> {
    if header_value(&headers, "content-length").as_deref() == Some("0") {
        return Err(ServerError::BadRequest(
            "streaming requires a body".to_string(),
        ));
    }

    let now = now_secs();
    state
        .clipboard
        .create_pipe(&id, options.mode, options.expires, now)
        .await
        .map_err(store_error)?;

    // The transfer is one-shot: whatever happens from here on, the pipe and
    // sidecar must not outlive this request.
    let _cleanup = RemoveOnDrop::new(&state.clipboard, &id);

    let mut pipe = state
        .clipboard
        .open_pipe_writer(&id, state.config.rendezvous_timeout)
        .await
        .map_err(store_error)?;

    if is_new {
        state
            .visitors
            .lock()
            .expect("visitor mutex poisoned")
            .record(&visitor);
    }

    let cap = (state.config.file_size_limit > 0).then_some(state.config.file_size_limit);
    let mut reader = body_reader(body);
    pump(&mut reader, &mut pipe, cap).await?;

    // Closing the write half delivers EOF to the consumer.
    pipe.shutdown().await?;
    drop(pipe);

    Ok(entry_response(&state, &id, options.ttl, options.expires, options.format))
}

fn record_write(state: &AppState, visitor: &str, is_new: bool, replaced: Option<u64>, size: u64) {
    {
        let mut stats = state.stats.lock().expect("stats mutex poisoned");
        match replaced {
            Some(old) => stats.replace_entry(old, size),
            None => stats.add_entry(size),
        }
    }
    if is_new {
        state
            .visitors
            .lock()
            .expect("visitor mutex poisoned")
            .record(visitor);
    }
}

/// The byte cap for one upload: the per-file limit intersected with the
/// aggregate headroom. The aggregate can only be enforced up front (the
/// true size is unknown until the stream ends), so no headroom at all is an
/// immediate rejection and the rest is caught mid-stream.
fn effective_cap(state: &AppState, replacing: Option<u64>) -> Result<Option<u64>> {
    let config = &state.config;
    let mut cap = (config.file_size_limit > 0).then_some(config.file_size_limit);

    if config.clipboard_size_limit > 0 {
        let used = state
            .stats_snapshot()
            .size
            .saturating_sub(replacing.unwrap_or(0));
        let headroom = config.clipboard_size_limit.saturating_sub(used);
        if headroom == 0 {
            return Err(ServerError::PayloadTooLarge);
        }
        cap = Some(cap.map_or(headroom, |c| c.min(headroom)));
    }

    Ok(cap)
}

fn body_reader(body: Body) -> impl AsyncRead + Unpin {
    StreamReader::new(
        body.into_data_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err)),
    )
}

async fn pump(
    reader: &mut (impl AsyncRead + Unpin),
    writer: &mut (impl AsyncWrite + Unpin),
    cap: Option<u64>,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if let Some(cap) = cap {
            if total > cap {
                return Err(ServerError::PayloadTooLarge);
            }
        }
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;
    Ok(total)
}

fn store_error(err: StoreError) -> ServerError {
    match err {
        StoreError::TooLarge => ServerError::PayloadTooLarge,
        StoreError::ReadOnly => ServerError::ReadOnlyEntry,
        StoreError::RendezvousTimeout => ServerError::RendezvousTimeout,
        StoreError::StreamingUnsupported => {
            ServerError::BadRequest("streaming is not supported on this platform".to_string())
        }
        StoreError::Io(err) => ServerError::Io(err),
    }
}

/// Removes an entry's payload and sidecar when dropped. Used by both halves
/// of a streaming transfer so the one-shot entry disappears no matter how
/// the request ends, including mid-transfer disconnects.
struct RemoveOnDrop {
    payload: PathBuf,
    meta: PathBuf,
}

impl RemoveOnDrop {
    fn new(clipboard: &Clipboard, id: &str) -> Self {
        RemoveOnDrop {
            payload: clipboard.payload_path(id),
            meta: clipboard.meta_path(id),
        }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.payload);
        let _ = std::fs::remove_file(&self.meta);
    }
}

// ---------------------------------------------------------------------------
// Download (GET/HEAD) and delete

async fn get_entry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    if id == "robots.txt" {
        return Ok(robots().await);
    }
    if id == "favicon.ico" {
        return favicon().await;
    }
    if validate_id(&id).is_err() {
        return Err(ServerError::NotFound);
    }

    let now = now_secs();
    let entry = state
        .clipboard
        .stat(&id)
        .await?
        .filter(|entry| !entry.expired(now))
        .ok_or(ServerError::NotFound)?;

    if entry.streaming {
        return get_stream(state, id, entry).await;
    }

    let file = match state.clipboard.open_payload(&id).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(ServerError::NotFound),
        Err(err) => return Err(err.into()),
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, entry.size)
        .body(Body::from_stream(ReaderStream::new(file)))
        .unwrap();
    apply_entry_headers(&state, response.headers_mut(), &id, remaining_ttl(&entry, now), entry.expires);
    Ok(response)
}

/// Consumer half of a streaming transfer: rendezvous with the producer and
/// relay the pipe. The entry is removed once the response body is done
/// (or abandoned).
async fn get_stream(state: AppState, id: String, entry: Entry) -> Result<Response> {
    let now = now_secs();
    let cleanup = RemoveOnDrop::new(&state.clipboard, &id);

    let (first, pipe) = match state
        .clipboard
        .open_pipe_reader(&id, state.config.rendezvous_timeout)
        .await
    {
        Ok(parts) => parts,
        Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ServerError::NotFound)
        }
        Err(err) => return Err(store_error(err)),
    };

    let body = stream::iter(first.into_iter().map(Ok::<Bytes, io::Error>))
        .chain(ReaderStream::new(pipe))
        .map(move |chunk| {
            // Keeps the cleanup guard alive for the lifetime of the body.
            let _cleanup = &cleanup;
            chunk
        });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(body))
        .unwrap();
    apply_entry_headers(&state, response.headers_mut(), &id, remaining_ttl(&entry, now), entry.expires);
    Ok(response)
}

async fn head_entry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    if validate_id(&id).is_err() {
        return Err(ServerError::NotFound);
    }

    let now = now_secs();
    let entry = state
        .clipboard
        .stat(&id)
        .await?
        .filter(|entry| !entry.expired(now))
        .ok_or(ServerError::NotFound)?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, entry.size)
        .body(Body::empty())
        .unwrap();
    apply_entry_headers(&state, response.headers_mut(), &id, remaining_ttl(&entry, now), entry.expires);
    Ok(response)
}

async fn delete_entry(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    validate_id(&id).map_err(ServerError::BadRequest)?;

    let entry = state
        .clipboard
        .stat(&id)
        .await?
        .ok_or(ServerError::NotFound)?;

    state.clipboard.delete(&id).await?;
    state
        .stats
        .lock()
        .expect("stats mutex poisoned")
        .remove_entry(entry.size);
    Ok(StatusCode::OK)
}

fn remaining_ttl(entry: &Entry, now: u64) -> u64 {
    if entry.expires == 0 {
        0
    } else {
        entry.expires.saturating_sub(now)
    }
}

// ---------------------------------------------------------------------------
// Entry responses

#[derive(Debug, Serialize)]
struct EntryInfo {
    file: String,
    url: String,
    curl: String,
    ttl: u64,
    expires: u64,
}

fn apply_entry_headers(
    state: &AppState,
    headers: &mut HeaderMap,
    id: &str,
    ttl: u64,
    expires: u64,
) {
    let url = state.entry_url(id);
    let curl = state.curl_command(id);
    for (name, value) in [
        ("X-File", id.to_string()),
        ("X-URL", url),
        ("X-Curl", curl),
        ("X-TTL", ttl.to_string()),
        ("X-Expires", expires.to_string()),
    ] {
        if let Ok(value) = value.parse() {
            headers.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).expect("static header name"),
                value,
            );
        }
    }
}

fn entry_response(
    state: &AppState,
    id: &str,
    ttl: u64,
    expires: u64,
    format: ResponseFormat,
) -> Response {
    let url = state.entry_url(id);
    let curl = state.curl_command(id);

    let mut response = match format {
        ResponseFormat::Json => Json(EntryInfo {
            file: id.to_string(),
            url,
            curl,
            ttl,
            expires,
        })
        .into_response(),
        ResponseFormat::Text => {
            let heading = if expires == 0 {
                "# Direct link (never expires)".to_string()
            } else {
                format!(
                    "# Direct link (valid for {}, expires {})",
                    format_duration_short(ttl),
                    humantime::format_rfc3339_seconds(
                        SystemTime::UNIX_EPOCH + Duration::from_secs(expires)
                    )
                )
            };
            format!("{heading}\n{url}\n\n# Fetch with curl\n{curl}\n").into_response()
        }
    };

    apply_entry_headers(state, response.headers_mut(), id, ttl, expires);
    response
}

/// Compact duration rendering for the human response: `4d`, `2h30m`, `45s`.
fn format_duration_short(secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let (days, rest) = (secs / 86_400, secs % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_rules() {
        assert!(validate_id("hello").is_ok());
        assert!(validate_id("with-dash_and.dot").is_ok());
        assert!(validate_id(&"a".repeat(64)).is_ok());

        assert!(validate_id("").is_err());
        assert!(validate_id(&"a".repeat(65)).is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("path/traversal").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id(".hidden").is_err());
        for reserved in RESERVED_IDS {
            assert!(validate_id(reserved).is_err(), "{reserved}");
        }
    }

    #[test]
    fn random_ids_are_well_formed() {
        for _ in 0..100 {
            let id = random_id();
            assert_eq!(id.len(), RANDOM_ID_LEN);
            assert!(validate_id(&id).is_ok());
        }
    }

    #[test]
    fn ttl_clamps_to_server_maximum() {
        let hour = Duration::from_secs(3600);
        // 10d clamps down to 1h.
        assert_eq!(resolve_ttl(Some("10d"), hour).unwrap(), 3600);
        // Smaller values pass through.
        assert_eq!(resolve_ttl(Some("2m"), hour).unwrap(), 120);
        // Absent means the server default.
        assert_eq!(resolve_ttl(None, hour).unwrap(), 3600);
        // "never" is only honored when the server has no expiry.
        assert_eq!(resolve_ttl(Some("0"), hour).unwrap(), 3600);
        assert_eq!(resolve_ttl(Some("0"), Duration::ZERO).unwrap(), 0);
        assert_eq!(resolve_ttl(Some("4d"), Duration::ZERO).unwrap(), 345_600);

        assert!(resolve_ttl(Some("not a duration"), hour).is_err());
    }

    #[test]
    fn short_durations() {
        assert_eq!(format_duration_short(0), "0s");
        assert_eq!(format_duration_short(45), "45s");
        assert_eq!(format_duration_short(120), "2m");
        assert_eq!(format_duration_short(9000), "2h30m");
        assert_eq!(format_duration_short(345_600), "4d");
    }

    #[test]
    fn visitor_key_prefers_configured_header() {
        let mut config = Config::default();
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "192.0.2.1:9999".parse().unwrap();

        // Header ignored unless configured.
        assert_eq!(visitor_key(&config, &headers, Some(&peer)), "192.0.2.1");

        config.trusted_proxy_header = Some("X-Forwarded-For".to_string());
        assert_eq!(visitor_key(&config, &headers, Some(&peer)), "203.0.113.9");

        // Falls back to the transport address when the header is absent.
        assert_eq!(visitor_key(&config, &HeaderMap::new(), Some(&peer)), "192.0.2.1");
        assert_eq!(visitor_key(&config, &HeaderMap::new(), None), "local");
    }
}
