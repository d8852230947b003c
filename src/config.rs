//! Configuration loading from `.env` files.

use std::{collections::BTreeSet, env, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};

use crate::keys::RelayIdentity;

/// Kinds admitted when `ALLOWED_KINDS` is not set.
pub const DEFAULT_ALLOWED_KINDS: &str = "1,30023";
/// Per-peer rebroadcast timeout when `REBROADCAST_TIMEOUT_SECS` is not set.
pub const DEFAULT_REBROADCAST_TIMEOUT_SECS: u64 = 10;

/// Runtime settings derived from environment variables. Built once at startup
/// and only ever read afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all storage.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// WebSocket bind address, e.g. `127.0.0.1:7778`.
    pub bind_ws: String,
    /// Key pair every mixed event is signed with.
    pub identity: RelayIdentity,
    /// NIP-11 relay name.
    pub relay_name: String,
    /// NIP-11 relay description.
    pub relay_description: String,
    /// Optional NIP-11 icon URL.
    pub relay_icon: Option<String>,
    /// Kinds accepted for mixing.
    pub allowed_kinds: BTreeSet<u32>,
    /// Authors allowed to publish. Empty means the relay is open to everyone.
    pub whitelisted_pubkeys: BTreeSet<String>,
    /// Peer relays every mixed event is republished to, in order.
    pub rebroadcast_relays: Vec<String>,
    /// Upper bound for connect + publish against one peer. `None` waits forever.
    pub rebroadcast_timeout: Option<Duration>,
    /// Optional SOCKS5 proxy (host:port) for peer connections.
    pub tor_socks: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file. Variables already present
    /// in the process environment take precedence over the file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT not set")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP not set")?;
        let bind_ws = env::var("BIND_WS").context("BIND_WS not set")?;

        let secret = env::var("RELAY_PRIVATE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .context("RELAY_PRIVATE_KEY not set in environment")?;
        let identity = RelayIdentity::from_hex(&secret).context("parsing RELAY_PRIVATE_KEY")?;
        if let Some(expected) = non_empty_var("RELAY_PUBKEY") {
            if expected != identity.public_key_hex() {
                bail!(
                    "RELAY_PUBKEY {expected} does not match the key derived from RELAY_PRIVATE_KEY ({})",
                    identity.public_key_hex()
                );
            }
        }

        let relay_name = non_empty_var("RELAY_NAME").unwrap_or_else(|| "notemix".into());
        let relay_description = non_empty_var("RELAY_DESCRIPTION")
            .unwrap_or_else(|| "A Nostr relay that mixes and anonymizes events".into());
        let relay_icon = non_empty_var("RELAY_ICON");
        let allowed_kinds = csv_u32(
            env::var("ALLOWED_KINDS").unwrap_or_else(|_| DEFAULT_ALLOWED_KINDS.into()),
        )
        .into_iter()
        .collect();
        let whitelisted_pubkeys = csv_strings(env::var("WHITELISTED_PUBKEYS").unwrap_or_default())
            .into_iter()
            .collect();
        let rebroadcast_relays = csv_strings(env::var("REBROADCAST_RELAYS").unwrap_or_default());
        let timeout_secs = match non_empty_var("REBROADCAST_TIMEOUT_SECS") {
            Some(v) => v
                .parse::<u64>()
                .context("REBROADCAST_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_REBROADCAST_TIMEOUT_SECS,
        };
        let rebroadcast_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        let tor_socks = non_empty_var("TOR_SOCKS");
        Ok(Self {
            store_root,
            bind_http,
            bind_ws,
            identity,
            relay_name,
            relay_description,
            relay_icon,
            allowed_kinds,
            whitelisted_pubkeys,
            rebroadcast_relays,
            rebroadcast_timeout,
            tor_socks,
        })
    }

    /// Open HTTP submission is only offered while no allowlist is configured.
    pub fn open_submissions(&self) -> bool {
        self.whitelisted_pubkeys.is_empty()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

/// Split a comma-separated string into `u32` values, skipping invalid entries.
pub fn csv_u32(input: impl AsRef<str>) -> Vec<u32> {
    let s = input.as_ref();
    s.split(',').filter_map(|s| s.trim().parse().ok()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{
        fs,
        path::Path,
        sync::{Mutex, MutexGuard},
    };
    use tempfile::tempdir;

    /// Serializes every test that touches process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    pub(crate) const SECRET: &str =
        "0101010101010101010101010101010101010101010101010101010101010101";

    pub(crate) const VARS: [&str; 13] = [
        "STORE_ROOT",
        "BIND_HTTP",
        "BIND_WS",
        "RELAY_PRIVATE_KEY",
        "RELAY_PUBKEY",
        "RELAY_NAME",
        "RELAY_DESCRIPTION",
        "RELAY_ICON",
        "ALLOWED_KINDS",
        "WHITELISTED_PUBKEYS",
        "REBROADCAST_RELAYS",
        "REBROADCAST_TIMEOUT_SECS",
        "TOR_SOCKS",
    ];

    /// Lock the environment and clear every variable the relay reads.
    pub(crate) fn clean_env() -> MutexGuard<'static, ()> {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for v in VARS {
            env::remove_var(v);
        }
        guard
    }

    /// Settings for an open relay storing under `root`, with no peers.
    pub(crate) fn settings_for(root: &Path) -> Settings {
        Settings {
            store_root: root.to_path_buf(),
            bind_http: "127.0.0.1:0".into(),
            bind_ws: "127.0.0.1:0".into(),
            identity: RelayIdentity::from_hex(SECRET).unwrap(),
            relay_name: "notemix".into(),
            relay_description: "test relay".into(),
            relay_icon: None,
            allowed_kinds: [1, 30023].into_iter().collect(),
            whitelisted_pubkeys: BTreeSet::new(),
            rebroadcast_relays: vec![],
            rebroadcast_timeout: Some(Duration::from_secs(5)),
            tor_socks: None,
        }
    }

    #[test]
    fn loads_env() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                concat!(
                    "STORE_ROOT=/tmp\n",
                    "BIND_HTTP=127.0.0.1:8080\n",
                    "BIND_WS=127.0.0.1:8081\n",
                    "RELAY_PRIVATE_KEY={}\n",
                    "RELAY_NAME=Mixer\n",
                    "RELAY_ICON=https://example.com/icon.png\n",
                    "ALLOWED_KINDS=\"1, 7,x\"\n",
                    "WHITELISTED_PUBKEYS=\"abc, def\"\n",
                    "REBROADCAST_RELAYS=\"ws://r1, ,ws://r2\"\n",
                    "REBROADCAST_TIMEOUT_SECS=3\n",
                    "TOR_SOCKS=127.0.0.1:9050\n",
                ),
                SECRET
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.bind_http, "127.0.0.1:8080");
        assert_eq!(cfg.bind_ws, "127.0.0.1:8081");
        assert_eq!(cfg.store_root, PathBuf::from("/tmp"));
        assert_eq!(cfg.relay_name, "Mixer");
        assert_eq!(cfg.relay_icon.as_deref(), Some("https://example.com/icon.png"));
        assert_eq!(cfg.allowed_kinds.iter().copied().collect::<Vec<_>>(), vec![1, 7]);
        assert!(cfg.whitelisted_pubkeys.contains("abc"));
        assert!(cfg.whitelisted_pubkeys.contains("def"));
        assert!(!cfg.open_submissions());
        assert_eq!(cfg.rebroadcast_relays, vec!["ws://r1", "ws://r2"]);
        assert_eq!(cfg.rebroadcast_timeout, Some(Duration::from_secs(3)));
        assert_eq!(cfg.tor_socks, Some("127.0.0.1:9050".into()));
        assert_eq!(
            cfg.identity.public_key_hex(),
            RelayIdentity::from_hex(SECRET).unwrap().public_key_hex()
        );
    }

    #[test]
    fn defaults_when_optional_absent() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                "STORE_ROOT=/tmp\nBIND_HTTP=127.0.0.1:8080\nBIND_WS=127.0.0.1:8081\nRELAY_PRIVATE_KEY={SECRET}\n"
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(
            cfg.allowed_kinds.iter().copied().collect::<Vec<_>>(),
            vec![1, 30023]
        );
        assert!(cfg.whitelisted_pubkeys.is_empty());
        assert!(cfg.open_submissions());
        assert!(cfg.rebroadcast_relays.is_empty());
        assert_eq!(
            cfg.rebroadcast_timeout,
            Some(Duration::from_secs(DEFAULT_REBROADCAST_TIMEOUT_SECS))
        );
        assert!(cfg.tor_socks.is_none());
        assert!(cfg.relay_icon.is_none());
        assert_eq!(cfg.relay_name, "notemix");
    }

    #[test]
    fn zero_timeout_disables_it() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                "STORE_ROOT=/tmp\nBIND_HTTP=a\nBIND_WS=b\nRELAY_PRIVATE_KEY={SECRET}\nREBROADCAST_TIMEOUT_SECS=0\n"
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert!(cfg.rebroadcast_timeout.is_none());
    }

    #[test]
    fn missing_private_key_is_fatal() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            "STORE_ROOT=/tmp\nBIND_HTTP=127.0.0.1:8080\nBIND_WS=127.0.0.1:8081\nRELAY_PRIVATE_KEY=\n",
        )
        .unwrap();
        let err = Settings::from_env(env_path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("RELAY_PRIVATE_KEY"));
    }

    #[test]
    fn malformed_private_key_is_fatal() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            "STORE_ROOT=/tmp\nBIND_HTTP=a\nBIND_WS=b\nRELAY_PRIVATE_KEY=zz\n",
        )
        .unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn mismatched_pubkey_is_fatal() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                "STORE_ROOT=/tmp\nBIND_HTTP=a\nBIND_WS=b\nRELAY_PRIVATE_KEY={SECRET}\nRELAY_PUBKEY={}\n",
                "ab".repeat(32)
            ),
        )
        .unwrap();
        let err = Settings::from_env(env_path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("RELAY_PUBKEY"));
    }

    #[test]
    fn missing_required_fields_error() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            concat!("BIND_HTTP=127.0.0.1:8080\n", "BIND_WS=127.0.0.1:8081\n"),
        )
        .unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn invalid_timeout_errors() {
        let _g = clean_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                "STORE_ROOT=/tmp\nBIND_HTTP=a\nBIND_WS=b\nRELAY_PRIVATE_KEY={SECRET}\nREBROADCAST_TIMEOUT_SECS=soon\n"
            ),
        )
        .unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn csv_helpers() {
        assert_eq!(csv_strings("a, b , ,c"), vec!["a", "b", "c"]);
        assert!(csv_strings("").is_empty());
        assert_eq!(csv_u32("1, 2, x,3"), vec![1, 2, 3]);
        assert!(csv_u32("").is_empty());
    }
}
