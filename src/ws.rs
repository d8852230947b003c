//! NIP-01 WebSocket server: `EVENT`, `REQ`, `CLOSE` and `COUNT`.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{event::Event, filter::Filter, pipeline::Pipeline};

/// Live subscriptions of one connection, keyed by subscription id.
type Subscriptions = HashMap<String, Vec<Filter>>;

/// Start the WebSocket server on `addr`.
pub async fn serve_ws(
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "websocket server listening");
    axum::serve(listener, router(pipeline).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().route("/", get(handler)).with_state(pipeline)
}

/// Handle the HTTP upgrade and spawn the connection processor.
async fn handler(ws: WebSocketUpgrade, State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move { process(socket, pipeline).await })
}

/// Serve one connection until the client goes away.
async fn process(socket: WebSocket, pipeline: Arc<Pipeline>) {
    debug!("websocket connection opened");
    let (mut sink, mut stream) = socket.split();
    let mut live = pipeline.subscribe();
    let mut subs = Subscriptions::new();
    loop {
        let replies = tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(txt))) => handle_message(&txt, &pipeline, &mut subs),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            ev = live.recv() => match ev {
                Ok(ev) => matching_subscriptions(&subs, &ev),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live subscription lagging behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        for reply in replies {
            if sink.send(Message::Text(reply.to_string())).await.is_err() {
                debug!("websocket connection closed while sending");
                return;
            }
        }
    }
    debug!("websocket connection closed");
}

/// `EVENT` frames for every live subscription `ev` matches.
fn matching_subscriptions(subs: &Subscriptions, ev: &Event) -> Vec<Value> {
    subs.iter()
        .filter(|(_, filters)| filters.iter().any(|f| f.matches(ev)))
        .map(|(sub, _)| json!(["EVENT", sub, ev]))
        .collect()
}

/// Dispatch one client frame and return the frames to send back.
fn handle_message(txt: &str, pipeline: &Pipeline, subs: &mut Subscriptions) -> Vec<Value> {
    let Ok(val) = serde_json::from_str::<Value>(txt) else {
        return vec![notice("could not parse message as JSON")];
    };
    let Some(arr) = val.as_array() else {
        return vec![notice("message must be a JSON array")];
    };
    match arr.first().and_then(Value::as_str) {
        Some("EVENT") => vec![on_event(arr.get(1), pipeline)],
        Some("REQ") => on_req(arr, pipeline, subs),
        Some("CLOSE") => match arr.get(1).and_then(Value::as_str) {
            Some(sub) => {
                subs.remove(sub);
                vec![]
            }
            None => vec![notice("CLOSE requires a subscription id")],
        },
        Some("COUNT") => on_count(arr, pipeline),
        Some(other) => vec![notice(&format!("unsupported message type: {other}"))],
        None => vec![notice("message type missing")],
    }
}

fn on_event(raw: Option<&Value>, pipeline: &Pipeline) -> Value {
    let Some(raw) = raw else {
        return notice("EVENT requires an event");
    };
    let id = raw.get("id").and_then(Value::as_str).unwrap_or_default();
    let ev = match serde_json::from_value::<Event>(raw.clone()) {
        Ok(ev) => ev,
        Err(e) => return ok(id, false, &format!("invalid: malformed event: {e}")),
    };
    if let Err(e) = ev.verify() {
        return ok(&ev.id, false, &format!("invalid: {e}"));
    }
    match pipeline.publish(&ev) {
        Ok(_) => ok(&ev.id, true, ""),
        Err(e) => ok(&ev.id, false, &e.client_message()),
    }
}

fn on_req(arr: &[Value], pipeline: &Pipeline, subs: &mut Subscriptions) -> Vec<Value> {
    let Some((sub, filters)) = subscription(arr) else {
        return vec![notice("REQ requires a subscription id and at least one filter")];
    };
    let mut seen = HashSet::new();
    let mut out = vec![];
    for filter in &filters {
        let events = pipeline.store().query(filter).unwrap_or_else(|e| {
            warn!(sub = %sub, error = %e, "stored query failed");
            vec![]
        });
        for ev in events {
            if seen.insert(ev.id.clone()) {
                out.push(json!(["EVENT", sub, ev]));
            }
        }
    }
    out.push(json!(["EOSE", sub]));
    subs.insert(sub, filters);
    out
}

fn on_count(arr: &[Value], pipeline: &Pipeline) -> Vec<Value> {
    let Some((sub, filters)) = subscription(arr) else {
        return vec![notice("COUNT requires a subscription id and at least one filter")];
    };
    let mut count = 0;
    for filter in &filters {
        match pipeline.store().count(filter) {
            Ok(n) => count += n,
            Err(e) => warn!(sub = %sub, error = %e, "stored count failed"),
        }
    }
    vec![json!(["COUNT", sub, { "count": count }])]
}

/// Split `[TYPE, sub_id, filter...]` into the id and its filters.
fn subscription(arr: &[Value]) -> Option<(String, Vec<Filter>)> {
    let sub = arr.get(1)?.as_str()?.to_string();
    let filters: Vec<Filter> = arr[2..]
        .iter()
        .filter(|v| v.is_object())
        .map(Filter::from_value)
        .collect();
    if filters.is_empty() {
        return None;
    }
    Some((sub, filters))
}

fn ok(id: &str, accepted: bool, message: &str) -> Value {
    json!(["OK", id, accepted, message])
}

fn notice(message: &str) -> Value {
    json!(["NOTICE", message])
}
