//! Interfaces to everything outside the switchboard
//!
//! The switchboard talks to three kinds of collaborators:
//!
//! - the platform [`ServiceCatalog`], which enumerates installed endpoints and
//!   opens/closes connections to them;
//! - remote [`ConnectionProvider`]s and [`CallSelector`]s, reached through the
//!   interfaces the catalog hands back;
//! - the [`CallOwner`], which is told how each call ended.
//!
//! Remote methods are `async` and may complete on any task. The switchboard
//! never awaits them on its own event loop: every remote call runs on a
//! spawned task whose only job is to post the result back as an event.
//!
//! ```text
//!   owner ──▶ Switchboard handle ──▶ ┌──────────────────────┐
//!                                    │  event loop (single) │◀── SelectorAdapter
//!   catalog / providers / selectors  └──────────┬───────────┘
//!          ▲                                    │ spawn
//!          └──────────── remote call ◀──────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::events::SwitchboardEvent;
use crate::types::{
    CallDirection, CallId, CallSnapshot, ComponentName, ConnectionDetails, FailureCause, HandoffInfo,
    ProviderDescriptor,
};

/// Kind of endpoint the catalog is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Provider,
    Selector,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Provider => write!(f, "provider"),
            ServiceKind::Selector => write!(f, "selector"),
        }
    }
}

/// A live connection to one remote endpoint.
///
/// The endpoint is considered disconnected as soon as `disconnected` resolves,
/// whether the sender fires or is dropped.
pub struct Binding<T: ?Sized> {
    pub service: Arc<T>,
    pub disconnected: oneshot::Receiver<()>,
}

impl<T: ?Sized> Binding<T> {
    pub fn new(service: Arc<T>, disconnected: oneshot::Receiver<()>) -> Self {
        Self { service, disconnected }
    }
}

impl<T: ?Sized> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding").finish_non_exhaustive()
    }
}

/// Platform catalog of installed endpoints
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Every installed endpoint implementing `kind`. May contain duplicates.
    fn installed(&self, kind: ServiceKind) -> Vec<ComponentName>;

    /// Open a connection to a provider endpoint
    async fn bind_provider(&self, component: &ComponentName) -> Result<Binding<dyn ConnectionProvider>>;

    /// Open a connection to a selector endpoint
    async fn bind_selector(&self, component: &ComponentName) -> Result<Binding<dyn CallSelector>>;

    /// Close a connection opened by one of the bind methods
    fn unbind(&self, kind: ServiceKind, component: &ComponentName);
}

/// Request handed to a provider to create a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub call: CallSnapshot,
    /// Account on the provider the connection should use
    pub descriptor: ProviderDescriptor,
    pub direction: CallDirection,
}

/// How a provider answered a create-connection request
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionResult {
    Created(ConnectionDetails),
    Failed(FailureCause),
    /// The provider gave up on the call on its own
    Canceled,
}

/// A remote endpoint able to create connections for calls
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Accounts this endpoint offers
    async fn descriptors(&self) -> Result<Vec<ProviderDescriptor>>;

    /// Create the connection for a call
    async fn create_connection(&self, request: ConnectionRequest) -> Result<ConnectionResult>;

    /// Discard any connection created or being created for the call
    async fn abort(&self, call_id: &CallId) -> Result<()>;
}

/// A remote ranking/filtering policy over candidate providers
#[async_trait]
pub trait CallSelector: Send + Sync {
    /// Handed once per binding; lets the selector push back to the switchboard
    async fn set_adapter(&self, adapter: SelectorAdapter) -> Result<()>;

    /// Order and filter `candidates` for the call
    async fn select(&self, call: CallSnapshot, candidates: Vec<ProviderDescriptor>) -> Result<Vec<ProviderDescriptor>>;

    async fn on_call_updated(&self, call: CallSnapshot) -> Result<()>;

    async fn on_call_removed(&self, call_id: CallId) -> Result<()>;
}

/// Receives the final word on every call
#[async_trait]
pub trait CallOwner: Send + Sync {
    async fn handle_successful_outgoing_call(&self, call: CallSnapshot);

    async fn handle_failed_outgoing_call(&self, call: CallSnapshot, is_aborted: bool);

    async fn handle_successful_incoming_call(&self, call: CallSnapshot, details: ConnectionDetails);

    async fn handle_failed_incoming_call(&self, call: CallSnapshot);

    /// A selector published handoff information for a live call
    async fn handle_handoff_info(&self, _call: CallSnapshot, _info: HandoffInfo) {}
}

/// Handle a selector uses to push commands back to the switchboard.
///
/// Cheap to clone and safe to use from any thread; every method only queues
/// an event for the switchboard's event loop.
#[derive(Debug, Clone)]
pub struct SelectorAdapter {
    selector: ComponentName,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
}

impl SelectorAdapter {
    pub(crate) fn new(selector: ComponentName, events: mpsc::UnboundedSender<SwitchboardEvent>) -> Self {
        Self { selector, events }
    }

    pub fn selector(&self) -> &ComponentName {
        &self.selector
    }

    /// Ask the switchboard to abandon an outgoing call
    pub fn cancel_outgoing_call(&self, call_id: CallId) -> Result<()> {
        self.post(SwitchboardEvent::SelectorCancel {
            selector: self.selector.clone(),
            call_id,
        })
    }

    /// Publish where a live call could be handed off to
    pub fn set_handoff_info(&self, call_id: CallId, handle: impl Into<String>, extras: HashMap<String, String>) -> Result<()> {
        self.post(SwitchboardEvent::HandoffInfo {
            selector: self.selector.clone(),
            call_id,
            info: HandoffInfo {
                handle: handle.into(),
                extras,
            },
        })
    }

    fn post(&self, event: SwitchboardEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| crate::error::SwitchboardError::Shutdown)
    }
}
