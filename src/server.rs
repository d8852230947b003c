//! HTTP endpoints for health checks, relay info, queries, and note submission.

use anyhow::Result;
use axum::{
    extract::{Form, Query as AxumQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use html_escape::encode_text;
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tracing::{debug, info, warn};

use crate::{config::Settings, error::PipelineError, filter::Filter, pipeline::Pipeline};

/// NIPs this relay speaks: basic protocol, relay info and `COUNT`.
const SUPPORTED_NIPS: [u32; 3] = [1, 11, 45];

struct HttpState {
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Start an HTTP server exposing `/healthz`, `/query`, `/submit-note` and relay info.
pub async fn serve_http(
    addr: SocketAddr,
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    let app = router(Arc::new(HttpState { settings, pipeline }));
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(relay_info))
        .route("/home", get(home))
        .route("/healthz", get(healthz))
        .route("/query", get(query))
        .route("/submit-note", post(submit_note))
        .with_state(state)
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    debug!("GET /healthz");
    Json(Health {
        status: "ok".to_string(),
    })
}

/// NIP-11 relay information document.
#[derive(Serialize, Deserialize)]
struct RelayInfo {
    name: String,
    description: String,
    /// Key every stored event is signed with.
    pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    software: String,
    version: String,
    supported_nips: Vec<u32>,
    allowed_kinds: Vec<u32>,
}

async fn relay_info(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    debug!("GET /");
    let s = &state.settings;
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(RelayInfo {
            name: s.relay_name.clone(),
            description: s.relay_description.clone(),
            pubkey: state.pipeline.public_key_hex().to_string(),
            icon: s.relay_icon.clone(),
            software: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            supported_nips: SUPPORTED_NIPS.to_vec(),
            allowed_kinds: s.allowed_kinds.iter().copied().collect(),
        }),
    )
}

/// Human-facing landing page with a submission form when the relay is open.
async fn home(State(state): State<Arc<HttpState>>) -> Html<String> {
    debug!("GET /home");
    let s = &state.settings;
    let kinds = s
        .allowed_kinds
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let mode = if s.open_submissions() {
        "open to everyone".to_string()
    } else {
        format!("limited to {} whitelisted pubkeys", s.whitelisted_pubkeys.len())
    };
    let form = if s.open_submissions() {
        concat!(
            r#"<form method="post" action="/submit-note">"#,
            r#"<textarea name="content" rows="4" cols="60"></textarea>"#,
            r#"<button type="submit">Submit note</button></form>"#
        )
    } else {
        ""
    };
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{name}</title></head><body>\
         <h1>{name}</h1><p>{description}</p>\
         <ul><li>Relay pubkey: <code>{pubkey}</code></li>\
         <li>Allowed kinds: {kinds}</li>\
         <li>Publishing: {mode}</li>\
         <li>WebSocket: <code>{ws}</code></li></ul>{form}</body></html>",
        name = encode_text(&s.relay_name),
        description = encode_text(&s.relay_description),
        pubkey = state.pipeline.public_key_hex(),
        ws = encode_text(&s.bind_ws),
    ))
}

/// URL query parameters accepted by the `/query` endpoint.
#[derive(Deserialize)]
struct QueryParams {
    /// Comma-separated hex public keys.
    authors: Option<String>,
    /// Comma-separated kind numbers (e.g. `1,30023`).
    kinds: Option<String>,
    /// Comma-separated event ids.
    ids: Option<String>,
    /// Single `#d` tag value.
    d: Option<String>,
    /// Single `#t` topic value.
    t: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<String>,
}

/// Convert query string parameters into a [`Filter`].
///
/// Example: `/query?authors=<hex>&kinds=1,30023&since=1700000000`
fn params_to_filter(params: QueryParams) -> Filter {
    use serde_json::Value;
    let list = |s: String| -> Value {
        s.split(',')
            .filter(|v| !v.is_empty())
            .map(|v| Value::String(v.to_string()))
            .collect()
    };
    let mut obj = serde_json::Map::new();
    if let Some(a) = params.authors {
        obj.insert("authors".into(), list(a));
    }
    if let Some(i) = params.ids {
        obj.insert("ids".into(), list(i));
    }
    if let Some(k) = params.kinds {
        let arr = k
            .split(',')
            .filter_map(|v| v.trim().parse::<u32>().ok())
            .map(|v| Value::Number(v.into()))
            .collect();
        obj.insert("kinds".into(), Value::Array(arr));
    }
    if let Some(d) = params.d {
        obj.insert("#d".into(), Value::Array(vec![Value::String(d)]));
    }
    if let Some(t) = params.t {
        obj.insert("#t".into(), Value::Array(vec![Value::String(t)]));
    }
    let number = |v: Option<String>| v.and_then(|v| v.parse::<u64>().ok());
    if let Some(s) = number(params.since) {
        obj.insert("since".into(), Value::Number(s.into()));
    }
    if let Some(u) = number(params.until) {
        obj.insert("until".into(), Value::Number(u.into()));
    }
    if let Some(l) = number(params.limit) {
        obj.insert("limit".into(), Value::Number(l.into()));
    }
    Filter::from_value(&Value::Object(obj))
}

/// Return matching stored events as NDJSON.
async fn query(
    State(state): State<Arc<HttpState>>,
    AxumQuery(params): AxumQuery<QueryParams>,
) -> Response {
    let filter = params_to_filter(params);
    let events = match state.pipeline.store().query(&filter) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "query failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "query failed").into_response();
        }
    };
    debug!(count = events.len(), "GET /query");
    let body = events
        .iter()
        .filter_map(|e| serde_json::to_string(e).ok())
        .collect::<Vec<_>>()
        .join("\n");
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

#[derive(Deserialize)]
struct SubmitNote {
    #[serde(default)]
    content: String,
}

/// Accept a plain note from a form, mix it and report on peer rebroadcast.
async fn submit_note(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<SubmitNote>,
) -> (StatusCode, Html<String>) {
    match state.pipeline.submit(form.content).await {
        Ok(submission) => {
            info!(event = %submission.event.id, "note submitted over http");
            let mut body = String::from("<p class=\"success\">Note submitted successfully!</p>");
            if !submission.rebroadcast_failures.is_empty() {
                body.push_str("<p>Rebroadcast issues:</p><ul>");
                for failure in &submission.rebroadcast_failures {
                    body.push_str(&format!("<li>{}</li>", encode_text(failure)));
                }
                body.push_str("</ul>");
            }
            (StatusCode::OK, Html(body))
        }
        Err(e) => {
            let status = match e {
                PipelineError::SubmissionsClosed => StatusCode::FORBIDDEN,
                PipelineError::EmptyContent | PipelineError::Rejected(_) => StatusCode::BAD_REQUEST,
                PipelineError::Signing(_) | PipelineError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            debug!(status = status.as_u16(), error = %e, "note submission refused");
            let body = format!("<p class=\"error\">{}</p>", encode_text(&e.to_string()));
            (status, Html(body))
        }
    }
}
