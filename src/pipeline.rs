//! Admission-and-mixing pipeline shared by the WebSocket and HTTP entry points.
//!
//! Every inbound event goes through admit → mix → sign → save → local fan-out.
//! Any failure before fan-out aborts the sequence, so nothing is stored for a
//! rejected or unsignable event. Peer rebroadcast comes last and is either
//! detached ([`Pipeline::publish`]) or awaited ([`Pipeline::submit`]).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    config::Settings,
    error::PipelineError,
    event::{Event, UnsignedEvent},
    fanout::LocalFanout,
    keys::RelayIdentity,
    mixer::{self, Clock, SystemClock},
    policy::PolicyChain,
    rebroadcast::Rebroadcaster,
    storage::EventStore,
};

/// Kind of notes synthesized by the HTTP submission surface.
pub const SUBMISSION_KIND: u32 = 1;

/// Result of an HTTP submission.
#[derive(Debug)]
pub struct Submission {
    /// The mixed event that was stored.
    pub event: Event,
    /// One description per peer that did not accept the event.
    pub rebroadcast_failures: Vec<String>,
}

pub struct Pipeline {
    policy: PolicyChain,
    identity: RelayIdentity,
    store: Arc<dyn EventStore>,
    fanout: LocalFanout,
    rebroadcaster: Arc<Rebroadcaster>,
    clock: Arc<dyn Clock>,
    open_submissions: bool,
}

impl Pipeline {
    pub fn new(settings: &Settings, store: Arc<dyn EventStore>, fanout: LocalFanout) -> Self {
        let policy = PolicyChain::from_settings(settings);
        debug!(policies = ?policy.names(), "admission chain ready");
        Self {
            policy,
            identity: settings.identity.clone(),
            store,
            fanout,
            rebroadcaster: Arc::new(Rebroadcaster::from_settings(settings)),
            clock: Arc::new(SystemClock),
            open_submissions: settings.open_submissions(),
        }
    }

    /// Replace the wall clock used to re-stamp mixed events.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    pub fn with_rebroadcaster(mut self, rebroadcaster: Rebroadcaster) -> Self {
        self.rebroadcaster = Arc::new(rebroadcaster);
        self
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.fanout.subscribe()
    }

    pub fn public_key_hex(&self) -> &str {
        self.identity.public_key_hex()
    }

    /// Protocol-native ingestion. Returns once the mixed event is stored and
    /// fanned out locally; peer rebroadcast continues on a detached task.
    pub fn publish(&self, inbound: &Event) -> Result<Event, PipelineError> {
        let mixed = self.mix_and_store(inbound)?;
        if !self.rebroadcaster.peers().is_empty() {
            drop(self.rebroadcaster.clone().spawn(mixed.clone()));
        }
        Ok(mixed)
    }

    /// HTTP submission of a plain note. Only available while the relay has no
    /// pubkey allowlist. Waits for every peer and reports their failures.
    pub async fn submit(&self, content: String) -> Result<Submission, PipelineError> {
        if !self.open_submissions {
            return Err(PipelineError::SubmissionsClosed);
        }
        if content.trim().is_empty() {
            return Err(PipelineError::EmptyContent);
        }
        let inbound = self.identity.sign(UnsignedEvent {
            created_at: self.clock.now(),
            kind: SUBMISSION_KIND,
            tags: vec![],
            content,
        })?;
        let event = self.mix_and_store(&inbound)?;
        let rebroadcast_failures = self.rebroadcaster.rebroadcast(&event).await;
        Ok(Submission {
            event,
            rebroadcast_failures,
        })
    }

    fn mix_and_store(&self, inbound: &Event) -> Result<Event, PipelineError> {
        if let Some(reason) = self.policy.admit(inbound).reason() {
            return Err(PipelineError::Rejected(reason.to_string()));
        }
        let unsigned = mixer::mix(inbound, self.clock.as_ref());
        let mixed = self.identity.sign(unsigned).map_err(|e| {
            error!(error = %e, "failed to sign mixed event");
            PipelineError::from(e)
        })?;
        self.store.save(&mixed).map_err(|e| {
            error!(event = %mixed.id, error = %e, "failed to save mixed event");
            PipelineError::Storage(e)
        })?;
        info!(event = %mixed.id, kind = mixed.kind, "saved mixed event");
        self.fanout.broadcast(&mixed);
        Ok(mixed)
    }
}
