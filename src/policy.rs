//! Admission policies applied to inbound events before mixing.
//!
//! A [`PolicyChain`] is an ordered list of named predicates. The first policy
//! that rejects decides the outcome and later policies are never consulted.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{config::Settings, event::Event};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

impl Verdict {
    /// Rejection reason; always `None` for an accepted event.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Accept => None,
            Verdict::Reject(reason) => Some(reason),
        }
    }
}

/// A single named admission predicate.
pub trait EventPolicy: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn check(&self, ev: &Event) -> Verdict;
}

/// Rejects authors outside a non-empty allowlist. An empty list admits everyone.
#[derive(Debug, Clone, Default)]
pub struct PubkeyAllowlist {
    allowed: BTreeSet<String>,
}

impl PubkeyAllowlist {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl EventPolicy for PubkeyAllowlist {
    fn name(&self) -> &'static str {
        "pubkey-allowlist"
    }

    fn check(&self, ev: &Event) -> Verdict {
        if self.allowed.is_empty() || self.allowed.contains(&ev.pubkey) {
            Verdict::Accept
        } else {
            Verdict::Reject("pubkey not whitelisted".into())
        }
    }
}

/// Rejects kinds outside the configured set.
#[derive(Debug, Clone, Default)]
pub struct KindAllowlist {
    allowed: BTreeSet<u32>,
}

impl KindAllowlist {
    pub fn new(allowed: impl IntoIterator<Item = u32>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl EventPolicy for KindAllowlist {
    fn name(&self) -> &'static str {
        "kind-allowlist"
    }

    fn check(&self, ev: &Event) -> Verdict {
        if self.allowed.contains(&ev.kind) {
            Verdict::Accept
        } else {
            Verdict::Reject(format!("event kind {} is not supported", ev.kind))
        }
    }
}

/// Ordered admission policies; first rejection wins.
#[derive(Default)]
pub struct PolicyChain {
    policies: Vec<Box<dyn EventPolicy>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pubkey allowlist first, then kind allowlist.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with(PubkeyAllowlist::new(settings.whitelisted_pubkeys.iter().cloned()))
            .with(KindAllowlist::new(settings.allowed_kinds.iter().copied()))
    }

    /// Append a policy evaluated after all existing ones.
    pub fn push(&mut self, policy: impl EventPolicy + 'static) {
        self.policies.push(Box::new(policy));
    }

    pub fn with(mut self, policy: impl EventPolicy + 'static) -> Self {
        self.push(policy);
        self
    }

    /// Names of the policies in evaluation order.
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn admit(&self, ev: &Event) -> Verdict {
        let outcome = self.policies.iter().try_fold((), |(), policy| {
            match policy.check(ev) {
                Verdict::Accept => Ok(()),
                Verdict::Reject(reason) => Err((policy.name(), reason)),
            }
        });
        match outcome {
            Ok(()) => Verdict::Accept,
            Err((name, reason)) => {
                debug!(policy = name, event = %ev.id, %reason, "event rejected");
                Verdict::Reject(reason)
            }
        }
    }
}
