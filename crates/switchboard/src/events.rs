//! Events drained by the switchboard event loop
//!
//! Everything that can change switchboard state arrives here: commands from
//! the public [`crate::Switchboard`] handle, completions of remote calls made
//! on spawned tasks, timer expiries and pushes from selectors. The event loop
//! is the only consumer, so handlers never race each other.

use tokio::sync::oneshot;

use crate::error::Result;
use crate::processor::SelectorRef;
use crate::remote::{Binding, CallSelector, ConnectionProvider, ConnectionResult, ServiceKind};
use crate::switchboard::SwitchboardStats;
use crate::types::{Call, CallId, CallUpdate, ComponentName, HandoffInfo, ProviderDescriptor};

#[derive(Debug)]
pub(crate) enum SwitchboardEvent {
    // Commands from the public handle
    PlaceOutgoingCall {
        call: Call,
    },
    RetrieveIncomingCall {
        call: Call,
        descriptor: ProviderDescriptor,
    },
    AbortOutgoingCall {
        call_id: CallId,
    },
    UpdateCall {
        call_id: CallId,
        update: CallUpdate,
    },
    RemoveCall {
        call_id: CallId,
    },
    GetStats {
        reply: oneshot::Sender<SwitchboardStats>,
    },
    /// `reply` is `None` when the last handle was dropped
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },

    // Provider endpoints
    ProviderBound {
        component: ComponentName,
        generation: u64,
        result: Result<Binding<dyn ConnectionProvider>>,
    },
    ProviderDescriptors {
        component: ComponentName,
        result: Result<Vec<ProviderDescriptor>>,
    },
    ProviderDisconnected {
        component: ComponentName,
        generation: u64,
    },

    // Selector endpoints
    SelectorBound {
        component: ComponentName,
        generation: u64,
        result: Result<Binding<dyn CallSelector>>,
    },
    SelectorDisconnected {
        component: ComponentName,
        generation: u64,
    },
    SelectionResult {
        selector: SelectorRef,
        call_id: CallId,
        result: Result<Vec<ProviderDescriptor>>,
    },

    // Pushed by selectors through their adapter
    SelectorCancel {
        selector: ComponentName,
        call_id: CallId,
    },
    HandoffInfo {
        selector: ComponentName,
        call_id: CallId,
        info: HandoffInfo,
    },

    // Connection attempts
    AttemptResult {
        call_id: CallId,
        seq: u64,
        result: Result<ConnectionResult>,
    },
    IncomingResult {
        call_id: CallId,
        result: Result<ConnectionResult>,
    },

    // Timers
    LookupDeadline {
        kind: ServiceKind,
        cycle: u64,
    },
    SweepTick,
}

impl SwitchboardEvent {
    /// Short name used in trace output
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::PlaceOutgoingCall { .. } => "place_outgoing_call",
            Self::RetrieveIncomingCall { .. } => "retrieve_incoming_call",
            Self::AbortOutgoingCall { .. } => "abort_outgoing_call",
            Self::UpdateCall { .. } => "update_call",
            Self::RemoveCall { .. } => "remove_call",
            Self::GetStats { .. } => "get_stats",
            Self::Shutdown { .. } => "shutdown",
            Self::ProviderBound { .. } => "provider_bound",
            Self::ProviderDescriptors { .. } => "provider_descriptors",
            Self::ProviderDisconnected { .. } => "provider_disconnected",
            Self::SelectorBound { .. } => "selector_bound",
            Self::SelectorDisconnected { .. } => "selector_disconnected",
            Self::SelectionResult { .. } => "selection_result",
            Self::SelectorCancel { .. } => "selector_cancel",
            Self::HandoffInfo { .. } => "handoff_info",
            Self::AttemptResult { .. } => "attempt_result",
            Self::IncomingResult { .. } => "incoming_result",
            Self::LookupDeadline { .. } => "lookup_deadline",
            Self::SweepTick => "sweep_tick",
        }
    }
}
