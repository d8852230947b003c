//! Best-effort republishing of mixed events to peer relays.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    task::JoinHandle,
};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{
    client_async_tls, tungstenite::client::IntoClientRequest, tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{info, warn};
use url::Url;

use crate::{config::Settings, error::PeerError, event::Event};

type PeerSocket = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Publishes events to a fixed, ordered list of peer relays.
#[derive(Debug, Clone, Default)]
pub struct Rebroadcaster {
    peers: Vec<String>,
    tor_socks: Option<String>,
    timeout: Option<Duration>,
}

impl Rebroadcaster {
    pub fn new(peers: Vec<String>, tor_socks: Option<String>, timeout: Option<Duration>) -> Self {
        Self {
            peers,
            tor_socks,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.rebroadcast_relays.clone(),
            settings.tor_socks.clone(),
            settings.rebroadcast_timeout,
        )
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Try every peer once, in order, and return one description per failed
    /// peer. An empty result means every peer accepted the event.
    pub async fn rebroadcast(&self, ev: &Event) -> Vec<String> {
        let mut failures = Vec::new();
        for url in &self.peers {
            match self.attempt(url, ev).await {
                Ok(()) => info!(relay = %url, event = %ev.id, "event rebroadcast"),
                Err(e) => {
                    warn!(relay = %url, event = %ev.id, error = %e, "rebroadcast failed");
                    failures.push(e.to_string());
                }
            }
        }
        failures
    }

    /// Rebroadcast on a detached task. Failures only reach the log.
    pub fn spawn(self: Arc<Self>, ev: Event) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.rebroadcast(&ev).await;
        })
    }

    async fn attempt(&self, url: &str, ev: &Event) -> Result<(), PeerError> {
        let work = publish_to(url, ev, self.tor_socks.as_deref());
        match self.timeout {
            Some(after) => tokio::time::timeout(after, work)
                .await
                .map_err(|_| PeerError::Timeout {
                    url: url.to_string(),
                    after,
                })?,
            None => work.await,
        }
    }
}

/// Connect, publish, close.
async fn publish_to(url: &str, ev: &Event, tor_socks: Option<&str>) -> Result<(), PeerError> {
    let mut ws = connect_ws(url, tor_socks)
        .await
        .map_err(|source| PeerError::Connect {
            url: url.to_string(),
            source,
        })?;
    let outcome = publish(&mut ws, ev).await;
    let _ = ws.close(None).await;
    outcome.map_err(|source| PeerError::Publish {
        url: url.to_string(),
        source,
    })
}

/// Send `["EVENT", ev]` and wait for the peer's `OK` for that id.
async fn publish(ws: &mut PeerSocket, ev: &Event) -> Result<()> {
    ws.send(Message::Text(json!(["EVENT", ev]).to_string()))
        .await?;
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                let Ok(val) = serde_json::from_str::<Value>(&txt) else {
                    continue;
                };
                let Some(arr) = val.as_array() else {
                    continue;
                };
                if arr.first().and_then(|v| v.as_str()) != Some("OK")
                    || arr.get(1).and_then(|v| v.as_str()) != Some(ev.id.as_str())
                {
                    continue;
                }
                if arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false) {
                    return Ok(());
                }
                let reason = arr.get(3).and_then(|v| v.as_str()).unwrap_or_default();
                bail!("rejected: {reason}");
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    bail!("connection closed before OK")
}

/// Establish a WebSocket connection (TLS for `wss://`), optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<PeerSocket> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
