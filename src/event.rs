//! Nostr event model.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Common examples include:
///
/// - `p` – references another author's public key
/// - `e` – links to another event ID
/// - `d` – unique identifier for replaceable events
/// - `t` – free-form topic or hashtag
///
/// Each tag is kept verbatim, so mixing carries uncommon or custom tags over
/// untouched. A `["t", "news"]` tag is represented as
/// `Tag(vec!["t".into(), "news".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Tag name (first element), if present.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First value after the name, if present.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as received from publishers and as stored after mixing.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "79be...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["t", "news"]],
///   "content": "hello",
///   "sig": "deadbeef..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `d` (identifier) or `t` (topic).
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Event content body.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

/// Event fields before the relay signs them. Carries no identity at all.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedEvent {
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl Event {
    /// Verify the id against the event fields and the signature against `pubkey`.
    pub fn verify(&self) -> Result<()> {
        if hex::encode(self.hash()?) != self.id {
            return Err(anyhow!("id mismatch"));
        }
        self.verify_signature(&self.pubkey)
    }

    /// Check the signature over this event's hash against an arbitrary key.
    pub fn verify_signature(&self, pubkey: &str) -> Result<()> {
        let hash = self.hash()?;
        check_signature(&hash, &self.sig, pubkey)
    }

    fn hash(&self) -> Result<[u8; 32]> {
        event_hash(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }
}

/// Compute the NIP-01 event hash over `[0, pubkey, created_at, kind, tags, content]`.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

fn check_signature(hash: &[u8; 32], sig: &str, pubkey: &str) -> Result<()> {
    let sig = Signature::from_slice(&hex::decode(sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}
