use assert_cmd::prelude::*;
use futures_util::{SinkExt, StreamExt};
use secp256k1::{Keypair, Message as SchnorrMessage, Secp256k1};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::{fs, net::TcpListener, process::Command, time::Duration};
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;

const SECRET: &str = "0101010101010101010101010101010101010101010101010101010101010101";

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn pubkey_of(sk: &[u8]) -> (Keypair, String) {
    let secp = Secp256k1::new();
    let kp = Keypair::from_seckey_slice(&secp, sk).unwrap();
    let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    (kp, pubkey)
}

fn author_event(content: &str) -> Value {
    let secp = Secp256k1::new();
    let (kp, pubkey) = pubkey_of(&[7u8; 32]);
    let tags = json!([["t", "mix"]]);
    let data = serde_json::to_vec(&json!([0, pubkey, 1_600_000_000u64, 1, tags, content])).unwrap();
    let hash = Sha256::digest(&data);
    let msg = SchnorrMessage::from_digest_slice(&hash).unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    json!({
        "id": hex::encode(hash),
        "pubkey": pubkey,
        "kind": 1,
        "created_at": 1_600_000_000u64,
        "tags": tags,
        "content": content,
        "sig": hex::encode(sig.as_ref()),
    })
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        if let Message::Text(t) = ws.next().await.unwrap().unwrap() {
            return serde_json::from_str(&t).unwrap();
        }
    }
}

#[tokio::test]
async fn serve_cli_mixes_events_over_ws() {
    let dir = TempDir::new().unwrap();
    let http_port = free_port();
    let ws_port = free_port();
    let env_path = dir.path().join("env");
    fs::write(
        &env_path,
        format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:{}\nBIND_WS=127.0.0.1:{}\nRELAY_PRIVATE_KEY={SECRET}\n",
            dir.path().display(),
            http_port,
            ws_port
        ),
    )
    .unwrap();

    let mut child = Command::cargo_bin("notemix")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "serve"])
        .env_remove("WHITELISTED_PUBKEYS")
        .env_remove("ALLOWED_KINDS")
        .env_remove("REBROADCAST_RELAYS")
        .spawn()
        .unwrap();

    // allow servers to start
    sleep(Duration::from_millis(500)).await;

    // HTTP health check
    let url = format!("http://127.0.0.1:{}/healthz", http_port);
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let (_, relay_pubkey) = pubkey_of(&hex::decode(SECRET).unwrap());
    let ws_url = format!("ws://127.0.0.1:{}/", ws_port);
    let (mut ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();

    let ev = author_event("hello through the mix");
    ws_stream
        .send(Message::Text(json!(["EVENT", ev]).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws_stream).await, json!(["OK", ev["id"], true, ""]));

    let req = json!(["REQ", "s", { "kinds": [1] }]);
    ws_stream
        .send(Message::Text(req.to_string()))
        .await
        .unwrap();
    let got = next_json(&mut ws_stream).await;
    assert_eq!(got[0], "EVENT");
    assert_eq!(got[2]["pubkey"], relay_pubkey.as_str());
    assert_eq!(got[2]["content"], "hello through the mix");
    assert_eq!(got[2]["tags"], json!([["t", "mix"]]));
    assert_ne!(got[2]["id"], ev["id"]);
    assert_eq!(next_json(&mut ws_stream).await, json!(["EOSE", "s"]));

    // The same mixed event is served over HTTP.
    let url = format!("http://127.0.0.1:{}/query?kinds=1", http_port);
    let ndjson = reqwest::get(&url).await.unwrap().text().await.unwrap();
    let lines: Vec<Value> = ndjson
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines, vec![got[2].clone()]);

    child.kill().unwrap();
    let _ = child.wait();
}
