//! The mixing transform: strip authorship and re-stamp an inbound event.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::event::{Event, UnsignedEvent};

/// Source of Unix timestamps for re-stamping mixed events.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Build the replacement event for `inbound`.
///
/// `content`, `kind` and `tags` are copied verbatim. The author's `pubkey`,
/// `id` and `sig` are dropped, and `created_at` is read from `clock` exactly
/// once, so the output depends on when it is called.
pub fn mix(inbound: &Event, clock: &dyn Clock) -> UnsignedEvent {
    UnsignedEvent {
        created_at: clock.now(),
        kind: inbound.kind,
        tags: inbound.tags.clone(),
        content: inbound.content.clone(),
    }
}
