//! The switchboard: public handle and event loop
//!
//! [`Switchboard::start`] spawns the event loop that owns all routing state
//! and returns a cheap, cloneable handle to it. Every handle method only
//! queues a command; outcomes reach the [`CallOwner`] asynchronously.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use rvoip_switchboard::prelude::*;
//! # async fn example(catalog: Arc<dyn ServiceCatalog>, owner: Arc<dyn CallOwner>) -> Result<()> {
//! let switchboard = Switchboard::start(SwitchboardConfig::default(), catalog, owner)?;
//!
//! let call_id = switchboard.place_outgoing_call(Call::outgoing("tel:+15551234567"))?;
//! // ... the owner hears back through handle_successful_outgoing_call
//! //     or handle_failed_outgoing_call
//!
//! let stats = switchboard.stats().await?;
//! println!("{} call(s) pending", stats.pending_calls);
//!
//! switchboard.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod engine;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::SwitchboardConfig;
use crate::error::{Result, SwitchboardError};
use crate::events::SwitchboardEvent;
use crate::remote::{CallOwner, ServiceCatalog};
use crate::types::{Call, CallId, CallUpdate, ProviderDescriptor};

use self::engine::SwitchboardCore;

/// Point-in-time counters of a running switchboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchboardStats {
    /// Calls waiting for both lookup cycles
    pub new_calls: usize,
    /// Calls dispatched to a processor and not finished yet
    pub pending_calls: usize,
    /// Calls the switchboard still tracks, connected ones included
    pub live_calls: usize,
    pub active_processors: usize,
    /// Attempts of ended calls a provider has not answered yet
    pub abandoned_attempts: usize,
    pub cached_providers: usize,
    pub cached_selectors: usize,
    pub lookup_cycle: u64,
    pub outgoing_succeeded: u64,
    pub outgoing_failed: u64,
    pub outgoing_aborted: u64,
    /// Aborted by the expiry sweep; also counted in `outgoing_aborted`
    pub outgoing_expired: u64,
    pub incoming_succeeded: u64,
    pub incoming_failed: u64,
}

/// Shuts the event loop down once the last [`Switchboard`] clone is gone
#[derive(Debug)]
struct LoopGuard {
    events: mpsc::UnboundedSender<SwitchboardEvent>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        // Fails harmlessly when the loop already stopped
        let _ = self.events.send(SwitchboardEvent::Shutdown { reply: None });
    }
}

/// Handle to a running switchboard.
///
/// Dropping the last clone shuts the switchboard down the same way
/// [`Switchboard::shutdown`] does, without waiting for it.
#[derive(Debug, Clone)]
pub struct Switchboard {
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    _guard: Arc<LoopGuard>,
}

impl Switchboard {
    /// Validate `config` and spawn the event loop on the current tokio runtime
    pub fn start(
        config: SwitchboardConfig,
        catalog: Arc<dyn ServiceCatalog>,
        owner: Arc<dyn CallOwner>,
    ) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let core = SwitchboardCore::new(config, catalog, owner, tx.clone(), rx);
        tokio::spawn(core.run());

        info!("✅ Switchboard started");
        Ok(Self {
            _guard: Arc::new(LoopGuard { events: tx.clone() }),
            events: tx,
        })
    }

    /// Route a new outgoing call. Returns its id.
    pub fn place_outgoing_call(&self, call: Call) -> Result<CallId> {
        let call_id = call.id.clone();
        self.send(SwitchboardEvent::PlaceOutgoingCall { call })?;
        Ok(call_id)
    }

    /// Have the provider behind `descriptor` pick up an incoming call
    pub fn retrieve_incoming_call(&self, call: Call, descriptor: ProviderDescriptor) -> Result<CallId> {
        let call_id = call.id.clone();
        self.send(SwitchboardEvent::RetrieveIncomingCall { call, descriptor })?;
        Ok(call_id)
    }

    /// Give up on an outgoing call that has not connected yet
    pub fn abort_outgoing_call(&self, call_id: &CallId) -> Result<()> {
        self.send(SwitchboardEvent::AbortOutgoingCall {
            call_id: call_id.clone(),
        })
    }

    pub fn update_call(&self, call_id: &CallId, update: CallUpdate) -> Result<()> {
        self.send(SwitchboardEvent::UpdateCall {
            call_id: call_id.clone(),
            update,
        })
    }

    /// Forget a call. One still being routed is aborted first.
    pub fn remove_call(&self, call_id: &CallId) -> Result<()> {
        self.send(SwitchboardEvent::RemoveCall {
            call_id: call_id.clone(),
        })
    }

    pub async fn stats(&self) -> Result<SwitchboardStats> {
        let (reply, rx) = oneshot::channel();
        self.send(SwitchboardEvent::GetStats { reply })?;
        rx.await.map_err(|_| SwitchboardError::Shutdown)
    }

    /// Abort every call still being routed, release all endpoints and stop
    /// the event loop. Returns once the call owner has been told about the
    /// aborted calls.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SwitchboardEvent::Shutdown { reply: Some(reply) })?;
        rx.await.map_err(|_| SwitchboardError::Shutdown)
    }

    fn send(&self, event: SwitchboardEvent) -> Result<()> {
        self.events.send(event).map_err(|_| SwitchboardError::Shutdown)
    }
}
