//! Relay identity: the key pair every mixed event is signed with.

use std::fmt;

use rand::Rng;
use secp256k1::{All, Keypair, Message, Secp256k1, SecretKey};

use crate::{
    error::SignError,
    event::{event_hash, Event, UnsignedEvent},
};

/// Secret key plus the derived x-only public key of this relay.
#[derive(Clone)]
pub struct RelayIdentity {
    secp: Secp256k1<All>,
    keypair: Keypair,
    pubkey_hex: String,
}

impl RelayIdentity {
    /// Parse a hex-encoded 32-byte secret key.
    pub fn from_hex(secret: &str) -> Result<Self, SignError> {
        let bytes = hex::decode(secret.trim())?;
        let secret = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_secret(secret))
    }

    /// Create a fresh random identity.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let bytes: [u8; 32] = rng.gen();
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                return Self::from_secret(secret);
            }
        }
    }

    fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let pubkey_hex = hex::encode(keypair.x_only_public_key().0.serialize());
        Self {
            secp,
            keypair,
            pubkey_hex,
        }
    }

    /// Hex x-only public key, as it appears in the `pubkey` field.
    pub fn public_key_hex(&self) -> &str {
        &self.pubkey_hex
    }

    /// Hex secret key. Only used when writing a freshly generated `.env`.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Turn an unsigned event into a signed, content-addressed event owned by the relay.
    pub fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, SignError> {
        let hash = event_hash(
            &self.pubkey_hex,
            unsigned.created_at,
            unsigned.kind,
            &unsigned.tags,
            &unsigned.content,
        )
        .map_err(SignError::Hash)?;
        let msg = Message::from_digest(hash);
        let aux: [u8; 32] = rand::thread_rng().gen();
        let sig = self
            .secp
            .sign_schnorr_with_aux_rand(&msg, &self.keypair, &aux);
        Ok(Event {
            id: hex::encode(hash),
            pubkey: self.pubkey_hex.clone(),
            kind: unsigned.kind,
            created_at: unsigned.created_at,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

impl fmt::Debug for RelayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayIdentity")
            .field("pubkey", &self.pubkey_hex)
            .finish_non_exhaustive()
    }
}
