//! HTTP frontend: status JSON, watch pages, and byte streaming.
//!
//! # Routes
//!
//! ```text
//! GET  /                      → status JSON
//! GET  /watch/<hash>/<id>     → HTML watch page
//! GET  /watch/<id>?hash=...   → HTML watch page
//! GET  /<hash>/<id>           → file bytes (Range honored)
//! GET  /<id>?hash=...         → file bytes (Range honored)
//! ```
//!
//! `HEAD` on the streaming paths returns the same headers with an empty
//! body and costs no upstream chunk fetch. The 6-character hash must match
//! the file's unique identifier before a single chunk is requested.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;

use crate::config::Config;
use crate::constants::{MAX_CHUNK, THUMB_CHUNK};
use crate::error::StreamError;
use crate::fleet::ClientFleet;
use crate::links;
use crate::props::{PropsCache, PropsError};
use crate::range::{self, RangePlan};
use crate::stream::{stream_body, StreamContext};

/// Fallback watch page when no external template is configured.
const DEFAULT_WATCH_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{file_name}}</title></head>
<body>
<h3>{{file_name}}</h3>
<video controls preload="metadata" width="100%" src="{{stream_url}}"></video>
<p><a href="{{download_url}}">Download</a></p>
</body>
</html>
"#;

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connected client identities.
    pub fleet: Arc<ClientFleet>,
    /// Process-wide file properties cache.
    pub cache: Arc<PropsCache>,
    /// Gateway configuration.
    pub config: Arc<Config>,
    /// Process start, for uptime reporting.
    pub started: Instant,
}

/// Build the router over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/watch/*path", get(watch_handler))
        .route("/*path", get(media_handler))
        .with_state(state)
}

// ----------------------------------------------------------------------------
// Path parsing
// ----------------------------------------------------------------------------

/// Parse a streaming path into `(msg_id, hash)`.
///
/// Accepted shapes, in order: `<hash6>/<id>`, `<hash6><id>` (legacy
/// concatenated links), and `<id>` with the hash in the query string.
fn parse_path(path: &str, query_hash: Option<&str>) -> Option<(i64, Option<String>)> {
    let trimmed = path.trim_matches('/');

    if let Some((hash, id)) = trimmed.split_once('/') {
        if hash.len() == 6 && hash.chars().all(is_hash_char) {
            return id.parse().ok().map(|id| (id, Some(hash.to_string())));
        }
        return None;
    }

    if trimmed.len() > 6 {
        let (hash, id) = trimmed.split_at(6);
        if hash.chars().all(is_hash_char) && id.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(id) = id.parse() {
                return Some((id, Some(hash.to_string())));
            }
        }
    }

    // Bare message id; the hash, if any, arrives via `?hash=`. Non-digit
    // decoration around the id is tolerated, like the legacy route was.
    let digits: String = trimmed
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits
        .parse()
        .ok()
        .map(|id| (id, query_hash.map(str::to_string)))
}

fn is_hash_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

// ----------------------------------------------------------------------------
// Status route
// ----------------------------------------------------------------------------

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = state.started.elapsed().as_secs();

    let mut loads: Vec<(String, usize)> = state.fleet.loads();
    loads.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let loads: serde_json::Map<String, serde_json::Value> = loads
        .into_iter()
        .map(|(name, load)| (name, serde_json::Value::from(load)))
        .collect();

    Json(serde_json::json!({
        "server_status": "running",
        "uptime_s": uptime,
        "uptime": readable_time(uptime),
        "bot_handle": format!("@{}", state.config.bot_handle),
        "connected_clients": state.fleet.len(),
        "loads": loads,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Render seconds as the compact `1d 2h 3m 4s` the status page shows.
fn readable_time(mut seconds: u64) -> String {
    let mut parts = Vec::new();
    for (unit, span) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if seconds >= span {
            parts.push(format!("{}{unit}", seconds / span));
            seconds %= span;
        }
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

// ----------------------------------------------------------------------------
// Watch route
// ----------------------------------------------------------------------------

async fn watch_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some((msg_id, hash)) = parse_path(&path, query.get("hash").map(String::as_str)) else {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    };

    let (_, client) = state.fleet.pick();
    let props = match state.cache.get(&client.pool().home(), msg_id).await {
        Ok(props) => props,
        Err(e) => return props_error_response(&e),
    };
    if hash.as_deref() != Some(props.hash_prefix()) {
        return (StatusCode::FORBIDDEN, "Invalid hash").into_response();
    }

    let hash = props.hash_prefix();
    let file_name = props.file_name.clone().unwrap_or_else(random_file_name);
    let template = state
        .config
        .template_path
        .as_ref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_WATCH_TEMPLATE.to_string());
    let html = template
        .replace("{{file_name}}", &file_name)
        .replace(
            "{{stream_url}}",
            &links::download_url(&state.config.public_url, msg_id, hash),
        )
        .replace(
            "{{download_url}}",
            &links::download_url(&state.config.public_url, msg_id, hash),
        );

    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

// ----------------------------------------------------------------------------
// Media route
// ----------------------------------------------------------------------------

async fn media_handler(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some((msg_id, hash)) = parse_path(&path, query.get("hash").map(String::as_str)) else {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match serve_media(&state, method, msg_id, hash.as_deref(), range_header.as_deref()).await {
        Ok(response) => response,
        Err(e) => {
            if !matches!(e, StreamError::InvalidHash | StreamError::FileNotFound) {
                log::error!("serving message {msg_id} failed: {e}");
            }
            stream_error_response(&e)
        }
    }
}

async fn serve_media(
    state: &AppState,
    method: Method,
    msg_id: i64,
    hash: Option<&str>,
    range_header: Option<&str>,
) -> Result<Response, StreamError> {
    let (index, client) = state.fleet.pick();
    if state.fleet.len() > 1 {
        log::info!("routing message {msg_id} through {}", client.name());
    }

    let props = match state.cache.get(&client.pool().home(), msg_id).await {
        Ok(props) => props,
        Err(PropsError::Unavailable) => return Err(StreamError::FileNotFound),
        Err(e) => return Err(StreamError::Upstream(e.to_string())),
    };

    if hash != Some(props.hash_prefix()) {
        return Err(StreamError::InvalidHash);
    }

    let (start, end) = match range::resolve(range_header, props.file_size) {
        Ok(bounds) => bounds,
        Err(_) => {
            return Ok(unsatisfiable_response(props.file_size));
        }
    };
    // Thumbnails plan on the smaller chunk so fetch limit and alignment
    // agree.
    let chunk_size = if props.file_id.is_thumbnail() {
        THUMB_CHUNK
    } else {
        MAX_CHUNK
    };
    let plan = RangePlan::new(start, end, u64::from(chunk_size));

    let status = if range_header.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type(&props.mime_type, &props.file_name))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, plan.length())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                props
                    .file_name
                    .clone()
                    .unwrap_or_else(random_file_name)
                    .replace('"', "")
            ),
        );
    if range_header.is_some() {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", props.file_size),
        );
    }

    if method == Method::HEAD {
        return builder
            .body(Body::empty())
            .map_err(|e| StreamError::Upstream(e.to_string()));
    }

    // Prime the first chunk before committing to a status line, so an
    // expired file reference can be re-resolved once and a hard failure
    // still surfaces as a clean 500.
    let mut attempts = 0;
    let body = loop {
        attempts += 1;
        let permit = state.fleet.admit().await;
        let props = match state.cache.get(&client.pool().home(), msg_id).await {
            Ok(props) => props,
            Err(PropsError::Unavailable) => return Err(StreamError::FileNotFound),
            Err(e) => return Err(StreamError::Upstream(e.to_string())),
        };
        let stream = stream_body(
            StreamContext {
                fleet: Arc::clone(&state.fleet),
                index,
                client: Arc::clone(&client),
                props,
                cache: Arc::clone(&state.cache),
                msg_id,
            },
            plan,
            permit,
        );
        let mut stream = Box::pin(stream);

        match stream.next().await {
            Some(Ok(first)) => {
                break Body::from_stream(
                    futures_util::stream::once(async move { Ok::<_, StreamError>(first) })
                        .chain(stream),
                );
            }
            None => break Body::empty(),
            Some(Err(StreamError::Stale)) if attempts == 1 => {
                // The driver already invalidated the entry; one re-resolve.
                log::warn!("message {msg_id}: stale file reference, re-resolving");
                continue;
            }
            Some(Err(e)) => return Err(e),
        }
    };

    builder
        .body(body)
        .map_err(|e| StreamError::Upstream(e.to_string()))
}

// ----------------------------------------------------------------------------
// Response helpers
// ----------------------------------------------------------------------------

fn unsatisfiable_response(file_size: u64) -> Response {
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response())
}

fn props_error_response(err: &PropsError) -> Response {
    match err {
        PropsError::Unavailable => (StatusCode::NOT_FOUND, "File not found").into_response(),
        other => {
            log::error!("file lookup failed: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

fn stream_error_response(err: &StreamError) -> Response {
    match err {
        StreamError::InvalidHash => (StatusCode::FORBIDDEN, "Invalid hash").into_response(),
        StreamError::FileNotFound | StreamError::MessageUnavailable => {
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
        StreamError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
    }
}

/// Stored type first, then a guess from the name, then the catch-all.
fn content_type(mime_type: &Option<String>, file_name: &Option<String>) -> String {
    mime_type
        .clone()
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(guess_mime)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Minimal extension table for the media types browsers actually play.
fn guess_mime(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "mpeg" | "mpg" => "video/mpeg",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "wav" => "audio/wav",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "txt" => "text/plain",
        _ => return None,
    })
}

/// `xxxxxxxx.bin` for descriptors without a file name.
fn random_file_name() -> String {
    format!("{:08x}.bin", rand::random::<u32>())
}
