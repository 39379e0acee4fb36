//! Switchboard event loop and routing state
//!
//! All routing state lives in [`SwitchboardCore`] and is only touched from
//! its event loop. Remote calls run on spawned tasks that post their results
//! back as [`SwitchboardEvent`]s, so handlers here are plain synchronous code.
//!
//! Outgoing calls move through two queues:
//!
//! ```text
//!   place ──▶ new_calls ──drain (both lookups done)──▶ pending_calls ──▶ processor
//!                 │                                         │
//!                 └──────────── sweep / abort ──────────────┴──▶ owner notified
//! ```
//!
//! Placing a call starts a fresh lookup cycle for providers and selectors.
//! Only when the current cycle has produced a non-empty provider set and a
//! non-empty selector set is a call promoted, one per drain step.
//!
//! A processor is dropped as soon as its call has an outcome. An attempt it
//! left with a provider is kept in `abandoned` until the provider answers, so
//! a connection created after the fact can still be discarded.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::SwitchboardStats;
use crate::config::SwitchboardConfig;
use crate::emergency::{emergency_selection, EmergencyMatcher};
use crate::error::Result;
use crate::events::SwitchboardEvent;
use crate::processor::{AttemptDriver, ConnectionAttemptProcessor, ProcessorOutcome, SelectorRef};
use crate::registry::{ProviderRegistry, ProviderUpdate, ProviderWaiter, SelectorRegistry};
use crate::remote::{
    CallOwner, ConnectionProvider, ConnectionRequest, ConnectionResult, ServiceCatalog, ServiceKind,
};
use crate::selector::UnansweredSelection;
use crate::types::{
    failure_codes, Call, CallDirection, CallId, CallPhase, CallSnapshot, CallUpdate, ComponentName,
    ConnectionDetails, FailureCause, HandoffInfo, ProviderDescriptor,
};

/// Something the call owner has to hear about
#[derive(Debug)]
enum OwnerNotice {
    OutgoingSucceeded(CallSnapshot),
    OutgoingFailed { call: CallSnapshot, aborted: bool },
    IncomingSucceeded { call: CallSnapshot, details: ConnectionDetails },
    IncomingFailed(CallSnapshot),
    Handoff { call: CallSnapshot, info: HandoffInfo },
}

/// Deliver notices to the owner one at a time, in the order they were made
async fn deliver_notices(owner: Arc<dyn CallOwner>, mut notices: mpsc::UnboundedReceiver<OwnerNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            OwnerNotice::OutgoingSucceeded(call) => owner.handle_successful_outgoing_call(call).await,
            OwnerNotice::OutgoingFailed { call, aborted } => owner.handle_failed_outgoing_call(call, aborted).await,
            OwnerNotice::IncomingSucceeded { call, details } => {
                owner.handle_successful_incoming_call(call, details).await
            }
            OwnerNotice::IncomingFailed(call) => owner.handle_failed_incoming_call(call).await,
            OwnerNotice::Handoff { call, info } => owner.handle_handoff_info(call, info).await,
        }
    }
}

pub(crate) struct SwitchboardCore {
    config: SwitchboardConfig,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    receiver: mpsc::UnboundedReceiver<SwitchboardEvent>,
    notices: mpsc::UnboundedSender<OwnerNotice>,
    notifier: JoinHandle<()>,

    calls: HashMap<CallId, Call>,
    new_calls: IndexSet<CallId>,
    pending_calls: IndexSet<CallId>,
    processors: HashMap<CallId, ConnectionAttemptProcessor>,
    /// Attempts of ended calls still waiting on a provider, by call and seq
    abandoned: HashMap<(CallId, u64), ProviderDescriptor>,

    providers: ProviderRegistry,
    selectors: SelectorRegistry,
    cached_providers: Option<Vec<ProviderDescriptor>>,
    cached_selectors: Option<Vec<ComponentName>>,
    lookup_cycle: u64,

    emergency: EmergencyMatcher,
    sweep: Option<JoinHandle<()>>,
    totals: SwitchboardStats,
    shutting_down: bool,
}

impl SwitchboardCore {
    pub(crate) fn new(
        config: SwitchboardConfig,
        catalog: Arc<dyn ServiceCatalog>,
        owner: Arc<dyn CallOwner>,
        events: mpsc::UnboundedSender<SwitchboardEvent>,
        receiver: mpsc::UnboundedReceiver<SwitchboardEvent>,
    ) -> Self {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let notifier = tokio::spawn(deliver_notices(owner, notice_rx));

        Self {
            providers: ProviderRegistry::new(catalog.clone(), events.clone(), config.provider_timeout()),
            selectors: SelectorRegistry::new(
                catalog,
                events.clone(),
                config.selector_timeout(),
                config.lookup.fallback_selector.clone(),
            ),
            emergency: EmergencyMatcher::new(&config.emergency.numbers),
            config,
            events,
            receiver,
            notices,
            notifier,
            calls: HashMap::new(),
            new_calls: IndexSet::new(),
            pending_calls: IndexSet::new(),
            processors: HashMap::new(),
            abandoned: HashMap::new(),
            cached_providers: None,
            cached_selectors: None,
            lookup_cycle: 0,
            sweep: None,
            totals: SwitchboardStats::default(),
            shutting_down: false,
        }
    }

    /// Drain events until shutdown
    pub(crate) async fn run(mut self) {
        info!("🚀 Switchboard event loop running");

        while let Some(event) = self.receiver.recv().await {
            debug!("Handling {}", event.name());
            if let ControlFlow::Break(reply) = self.handle_event(event) {
                self.shutdown(reply).await;
                return;
            }
            self.update_sweep();
        }
    }

    /// Breaks with the reply channel, if any, when the event asked for
    /// shutdown
    fn handle_event(&mut self, event: SwitchboardEvent) -> ControlFlow<Option<oneshot::Sender<()>>> {
        match event {
            SwitchboardEvent::PlaceOutgoingCall { call } => self.place_outgoing_call(call),
            SwitchboardEvent::RetrieveIncomingCall { call, descriptor } => {
                self.retrieve_incoming_call(call, descriptor)
            }
            SwitchboardEvent::AbortOutgoingCall { call_id } => self.abort_outgoing_call(&call_id),
            SwitchboardEvent::UpdateCall { call_id, update } => self.update_call(&call_id, update),
            SwitchboardEvent::RemoveCall { call_id } => self.remove_call(&call_id),
            SwitchboardEvent::GetStats { reply } => {
                let _ = reply.send(self.stats());
            }
            SwitchboardEvent::Shutdown { reply } => return ControlFlow::Break(reply),

            SwitchboardEvent::ProviderBound {
                component,
                generation,
                result,
            } => {
                let update = self.providers.on_bound(&component, generation, result);
                self.apply_provider_update(update);
            }
            SwitchboardEvent::ProviderDescriptors { component, result } => {
                let update = self.providers.on_descriptors(&component, result);
                self.apply_provider_update(update);
            }
            SwitchboardEvent::ProviderDisconnected { component, generation } => {
                if self.providers.on_disconnect(&component, generation) {
                    self.provider_lost(&component);
                }
            }

            SwitchboardEvent::SelectorBound {
                component,
                generation,
                result,
            } => {
                let (update, completed) = self.selectors.on_bound(&component, generation, result);
                let selector = SelectorRef::Installed(component);
                for unanswered in update.unanswered {
                    self.selection_unanswered(&selector, unanswered);
                }
                for (cycle, ranked) in completed {
                    self.on_selectors_found(cycle, ranked);
                }
            }
            SwitchboardEvent::SelectorDisconnected { component, generation } => {
                let unanswered = self.selectors.on_disconnect(&component, generation);
                let selector = SelectorRef::Installed(component);
                for selection in unanswered {
                    self.selection_unanswered(&selector, selection);
                }
            }
            SwitchboardEvent::SelectionResult {
                selector,
                call_id,
                result,
            } => self.on_selection_result(selector, call_id, result),
            SwitchboardEvent::SelectorCancel { selector, call_id } => self.on_selector_cancel(&selector, &call_id),
            SwitchboardEvent::HandoffInfo {
                selector,
                call_id,
                info,
            } => self.on_handoff_info(selector, &call_id, info),

            SwitchboardEvent::AttemptResult { call_id, seq, result } => {
                if let Some(descriptor) = self.abandoned.remove(&(call_id.clone(), seq)) {
                    self.on_abandoned_result(&call_id, &descriptor, result);
                    return ControlFlow::Continue(());
                }
                let result = result.unwrap_or_else(|e| {
                    ConnectionResult::Failed(FailureCause::provider_unavailable(e.to_string()))
                });
                self.with_processor(&call_id, |p, d| p.on_attempt_result(seq, result, d));
            }
            SwitchboardEvent::IncomingResult { call_id, result } => self.on_incoming_result(&call_id, result),

            SwitchboardEvent::LookupDeadline { kind, cycle } => match kind {
                ServiceKind::Provider => {
                    if let Some((cycle, descriptors)) = self.providers.on_deadline(cycle) {
                        self.on_providers_found(cycle, descriptors);
                    }
                }
                ServiceKind::Selector => {
                    if let Some((cycle, ranked)) = self.selectors.on_deadline(cycle) {
                        self.on_selectors_found(cycle, ranked);
                    }
                }
            },
            SwitchboardEvent::SweepTick => self.sweep_expired(),
        }
        ControlFlow::Continue(())
    }

    // ---------------------------------------------------------------------
    // Outgoing calls
    // ---------------------------------------------------------------------

    fn place_outgoing_call(&mut self, mut call: Call) {
        if self.shutting_down {
            return;
        }
        if self.calls.contains_key(&call.id) {
            warn!("Call {} is already known, ignoring", call.id);
            return;
        }

        info!("📞 Placing outgoing call {} to {}", call.id, call.handle);
        call.direction = CallDirection::Outgoing;
        call.phase = CallPhase::New;
        call.provider = None;

        // Results of an older cycle must not leak into this one
        self.cached_providers = None;
        self.cached_selectors = None;

        self.new_calls.insert(call.id.clone());
        self.calls.insert(call.id.clone(), call);

        self.lookup_cycle += 1;
        let cycle = self.lookup_cycle;
        let update = self.providers.lookup(cycle);
        self.apply_provider_update(update);
        if let Some((cycle, ranked)) = self.selectors.lookup(cycle) {
            self.on_selectors_found(cycle, ranked);
        }
    }

    fn on_providers_found(&mut self, cycle: u64, descriptors: Vec<ProviderDescriptor>) {
        if cycle != self.lookup_cycle {
            debug!("Ignoring provider lookup cycle {} (current is {})", cycle, self.lookup_cycle);
            return;
        }
        info!("🔍 Provider lookup cycle {} found {} candidate(s)", cycle, descriptors.len());
        self.cached_providers = Some(descriptors);
        self.drain();
    }

    fn on_selectors_found(&mut self, cycle: u64, ranked: Vec<ComponentName>) {
        if cycle != self.lookup_cycle {
            debug!("Ignoring selector lookup cycle {} (current is {})", cycle, self.lookup_cycle);
            return;
        }
        info!("🔍 Selector lookup cycle {} found {} selector(s)", cycle, ranked.len());
        self.cached_selectors = Some(ranked);
        self.drain();
    }

    /// Promote at most one new call and dispatch it
    fn drain(&mut self) {
        if self.shutting_down || self.new_calls.is_empty() {
            return;
        }
        let (Some(providers), Some(selectors)) = (&self.cached_providers, &self.cached_selectors) else {
            return;
        };
        if providers.is_empty() || selectors.is_empty() {
            debug!(
                "Holding {} new call(s): {} provider(s), {} selector(s)",
                self.new_calls.len(),
                providers.len(),
                selectors.len()
            );
            return;
        }

        let providers = providers.clone();
        let selectors = selectors.clone();
        let Some(call_id) = self.new_calls.shift_remove_index(0) else {
            return;
        };
        self.pending_calls.insert(call_id.clone());
        self.dispatch(call_id, providers, selectors);
    }

    fn dispatch(&mut self, call_id: CallId, providers: Vec<ProviderDescriptor>, selectors: Vec<ComponentName>) {
        // An earlier call under this id may still have an attempt out
        let resume = self
            .abandoned
            .keys()
            .filter(|(id, _)| *id == call_id)
            .map(|(_, seq)| *seq)
            .max()
            .unwrap_or(0);

        let Some(call) = self.calls.get_mut(&call_id) else {
            error!("Dispatching call {} that is not tracked", call_id);
            self.pending_calls.shift_remove(&call_id);
            return;
        };
        call.phase = CallPhase::Pending;

        let emergency = self.emergency.is_emergency(&call.handle);
        let mut order: Vec<SelectorRef> = match &call.pinned_selector {
            Some(pinned) => vec![SelectorRef::Installed(pinned.clone())],
            None => selectors.into_iter().map(SelectorRef::Installed).collect(),
        };
        if emergency {
            info!("🚨 Call {} is an emergency call", call_id);
            order.insert(0, SelectorRef::Emergency);
        }

        let processor = ConnectionAttemptProcessor::new(call, providers, order, emergency).resume_after(resume);
        self.processors.insert(call_id.clone(), processor);
        self.with_processor(&call_id, |p, d| p.process(d));
    }

    /// Drive the processor of `call_id` with this core as its driver and
    /// act on whatever outcome it reports
    fn with_processor<F>(&mut self, call_id: &CallId, f: F)
    where
        F: FnOnce(&mut ConnectionAttemptProcessor, &mut dyn AttemptDriver) -> Option<ProcessorOutcome>,
    {
        let Some(mut processor) = self.processors.remove(call_id) else {
            debug!("No processor for call {}, dropping event", call_id);
            return;
        };

        let driver: &mut dyn AttemptDriver = self;
        let outcome = f(&mut processor, driver);

        if !processor.has_reported() {
            self.processors.insert(call_id.clone(), processor);
        } else if processor.is_settled() {
            debug!("Processor for call {} settled in {:?}", call_id, processor.state());
        } else if let Some(attempt) = processor.abandon() {
            debug!(
                "Call {} ended with attempt {} through {} still out",
                call_id, attempt.seq, attempt.descriptor.id
            );
            self.abandoned.insert((call_id.clone(), attempt.seq), attempt.descriptor);
        }
        if let Some(outcome) = outcome {
            self.finish_outgoing(call_id, outcome);
        }
    }

    fn finish_outgoing(&mut self, call_id: &CallId, outcome: ProcessorOutcome) {
        self.new_calls.shift_remove(call_id);
        self.pending_calls.shift_remove(call_id);
        self.selectors.forget_call(call_id);

        let Some(mut call) = self.calls.remove(call_id) else {
            warn!("Outcome for untracked call {}", call_id);
            self.drain();
            return;
        };

        match outcome {
            ProcessorOutcome::Succeeded { details, selector } => {
                info!("✅ Outgoing call {} connected through {}", call_id, details.provider.id);
                call.phase = CallPhase::Connected;
                call.provider = Some(details.provider);
                call.failure = None;
                if selector.is_some() {
                    call.selector = selector;
                }
                self.totals.outgoing_succeeded += 1;
                self.notify(OwnerNotice::OutgoingSucceeded(call.snapshot()));
                self.calls.insert(call_id.clone(), call);
            }
            ProcessorOutcome::Failed(cause) => {
                info!("❌ Outgoing call {} failed: {}", call_id, cause);
                call.phase = CallPhase::Failed;
                call.provider = None;
                call.failure = Some(cause);
                self.totals.outgoing_failed += 1;
                self.notify(OwnerNotice::OutgoingFailed {
                    call: call.snapshot(),
                    aborted: false,
                });
            }
            ProcessorOutcome::Canceled | ProcessorOutcome::Aborted => {
                info!("🛑 Outgoing call {} aborted", call_id);
                call.phase = CallPhase::Aborted;
                call.provider = None;
                self.totals.outgoing_aborted += 1;
                self.notify(OwnerNotice::OutgoingFailed {
                    call: call.snapshot(),
                    aborted: true,
                });
            }
        }

        self.drain();
    }

    fn is_in_flight(&self, call_id: &CallId) -> bool {
        self.new_calls.contains(call_id) || self.pending_calls.contains(call_id)
    }

    /// Abort a call that has not connected yet. False when it is not being
    /// routed.
    fn abort_call(&mut self, call_id: &CallId) -> bool {
        if self.new_calls.contains(call_id) {
            self.finish_outgoing(call_id, ProcessorOutcome::Aborted);
            return true;
        }
        if !self.pending_calls.contains(call_id) {
            return false;
        }

        if self.processors.contains_key(call_id) {
            self.with_processor(call_id, |p, d| p.abort(d));
        }
        if self.pending_calls.contains(call_id) {
            // Processor already gone or done without reporting
            self.finish_outgoing(call_id, ProcessorOutcome::Aborted);
        }
        true
    }

    fn abort_outgoing_call(&mut self, call_id: &CallId) {
        if !self.abort_call(call_id) {
            warn!("Abort for call {} that is not being routed, ignoring", call_id);
        }
    }

    fn sweep_expired(&mut self) {
        let budget = self.config.new_call_budget();
        let expired: Vec<CallId> = self
            .new_calls
            .iter()
            .chain(self.pending_calls.iter())
            .filter(|id| self.calls.get(*id).is_some_and(|call| call.age() >= budget))
            .cloned()
            .collect();

        for call_id in expired {
            warn!("⏰ Call {} expired after {:?}", call_id, budget);
            self.totals.outgoing_expired += 1;
            self.abort_call(&call_id);
        }
    }

    fn update_sweep(&mut self) {
        let busy = !self.new_calls.is_empty() || !self.pending_calls.is_empty();
        let ticking = self.sweep.is_some();

        if busy && !ticking && self.config.expiry.sweep_enabled && !self.shutting_down {
            self.sweep = Some(self.spawn_sweep());
        } else if !busy && ticking {
            self.stop_sweep();
        }
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        let period = self.config.sweep_interval();
        debug!("⏱️ Expiry sweep started (every {:?})", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(SwitchboardEvent::SweepTick).is_err() {
                    break;
                }
            }
        })
    }

    fn stop_sweep(&mut self) {
        if let Some(sweep) = self.sweep.take() {
            sweep.abort();
            debug!("Expiry sweep stopped");
        }
    }

    // ---------------------------------------------------------------------
    // Providers
    // ---------------------------------------------------------------------

    fn apply_provider_update(&mut self, update: ProviderUpdate) {
        for (cycle, descriptors) in update.completed {
            self.on_providers_found(cycle, descriptors);
        }
        for (waiter, service) in update.ready {
            self.on_provider_ready(waiter, service);
        }
        for (waiter, cause) in update.failed {
            self.on_provider_unavailable(waiter, cause);
        }
    }

    fn on_provider_ready(&mut self, waiter: ProviderWaiter, service: Arc<dyn ConnectionProvider>) {
        match waiter {
            ProviderWaiter::Attempt {
                call_id,
                seq,
                descriptor,
            } => {
                if self.abandoned.remove(&(call_id.clone(), seq)).is_some() {
                    debug!("Attempt {} for ended call {} was never sent", seq, call_id);
                    return;
                }
                let wanted = self.processors.get(&call_id).is_some_and(|p| p.wants_attempt(seq));
                if wanted {
                    self.spawn_create(call_id, seq, descriptor, service);
                } else {
                    debug!("Attempt {} for call {} no longer wanted", seq, call_id);
                    let skipped = ConnectionResult::Failed(FailureCause::unspecified());
                    self.with_processor(&call_id, |p, d| p.on_attempt_result(seq, skipped, d));
                }
            }
            ProviderWaiter::Incoming { call_id, descriptor } => self.spawn_incoming(call_id, descriptor, service),
            ProviderWaiter::Query => {}
        }
    }

    fn on_provider_unavailable(&mut self, waiter: ProviderWaiter, cause: FailureCause) {
        match waiter {
            ProviderWaiter::Attempt { call_id, seq, .. } => {
                if self.abandoned.remove(&(call_id.clone(), seq)).is_none() {
                    self.with_processor(&call_id, |p, d| p.on_attempt_result(seq, ConnectionResult::Failed(cause), d));
                }
            }
            ProviderWaiter::Incoming { call_id, .. } => self.fail_incoming(&call_id, cause),
            ProviderWaiter::Query => {}
        }
    }

    /// Every processor whose in-flight attempt targets `component` moves on
    fn provider_lost(&mut self, component: &ComponentName) {
        // Whatever the endpoint created went away with it
        self.abandoned.retain(|_, descriptor| descriptor.component() != component);

        let affected: Vec<CallId> = self
            .processors
            .iter()
            .filter(|(_, p)| p.current_provider().is_some_and(|d| d.component() == component))
            .map(|(id, _)| id.clone())
            .collect();

        for call_id in affected {
            self.with_processor(&call_id, |p, d| p.provider_lost(component, d));
        }
    }

    /// A provider answered an attempt of a call that already ended
    fn on_abandoned_result(&mut self, call_id: &CallId, descriptor: &ProviderDescriptor, result: Result<ConnectionResult>) {
        match result {
            Ok(ConnectionResult::Created(_)) => {
                info!("♻️ Discarding connection created by {} for ended call {}", descriptor.id, call_id);
                self.discard_connection(call_id, descriptor);
            }
            _ => debug!("Late answer from {} for ended call {} dropped", descriptor.id, call_id),
        }
    }

    fn spawn_create(
        &self,
        call_id: CallId,
        seq: u64,
        descriptor: ProviderDescriptor,
        service: Arc<dyn ConnectionProvider>,
    ) {
        let events = self.events.clone();
        let Some(call) = self.calls.get(&call_id) else {
            let _ = events.send(SwitchboardEvent::AttemptResult {
                call_id: call_id.clone(),
                seq,
                result: Err(crate::error::SwitchboardError::not_found(format!("call {}", call_id))),
            });
            return;
        };

        let request = ConnectionRequest {
            call: call.snapshot(),
            descriptor,
            direction: CallDirection::Outgoing,
        };
        tokio::spawn(async move {
            let result = service.create_connection(request).await;
            let _ = events.send(SwitchboardEvent::AttemptResult { call_id, seq, result });
        });
    }

    // ---------------------------------------------------------------------
    // Selectors
    // ---------------------------------------------------------------------

    fn on_selection_result(&mut self, selector: SelectorRef, call_id: CallId, result: Result<Vec<ProviderDescriptor>>) {
        let ranked = match &selector {
            SelectorRef::Emergency => result.unwrap_or_default(),
            SelectorRef::Installed(component) => {
                let Some(handle) = self.selectors.get_mut(component) else {
                    warn!("Selection for call {} from unknown selector {}, dropping", call_id, component);
                    return;
                };
                match handle.resolve(&call_id, result) {
                    Some(ranked) => ranked,
                    None => return,
                }
            }
        };
        self.with_processor(&call_id, |p, d| p.on_selection(&selector, ranked, None, d));
    }

    fn selection_unanswered(&mut self, selector: &SelectorRef, unanswered: UnansweredSelection) {
        let UnansweredSelection { call_id, failure } = unanswered;
        self.with_processor(&call_id, |p, d| p.on_selection(selector, Vec::new(), failure, d));
    }

    fn on_selector_cancel(&mut self, selector: &ComponentName, call_id: &CallId) {
        if !self.calls.contains_key(call_id) {
            warn!("Selector {} canceled unknown call {}, dropping", selector, call_id);
            return;
        }
        if !self.is_in_flight(call_id) {
            warn!("Selector {} canceled call {} which is not being routed, dropping", selector, call_id);
            return;
        }
        info!("Selector {} canceled call {}", selector, call_id);
        self.abort_call(call_id);
    }

    fn on_handoff_info(&mut self, selector: ComponentName, call_id: &CallId, info: HandoffInfo) {
        let Some(call) = self.calls.get_mut(call_id) else {
            warn!("Handoff info from {} for unknown call {}, dropping", selector, call_id);
            return;
        };
        info!("🔀 Selector {} published handoff info for call {}", selector, call_id);
        call.handoff = Some(info.clone());
        // The pin is read when the call is dispatched
        if self.new_calls.contains(call_id) {
            call.pinned_selector = Some(selector);
        } else {
            debug!("Call {} is past dispatch, not pinning it to {}", call_id, selector);
        }
        let snapshot = call.snapshot();
        self.notify(OwnerNotice::Handoff { call: snapshot, info });
    }

    // ---------------------------------------------------------------------
    // Live calls
    // ---------------------------------------------------------------------

    fn bound_selector(&self, call_id: &CallId) -> Option<ComponentName> {
        let call = self.calls.get(call_id)?;
        call.selector.clone().or_else(|| call.pinned_selector.clone())
    }

    fn update_call(&mut self, call_id: &CallId, update: CallUpdate) {
        let Some(call) = self.calls.get_mut(call_id) else {
            warn!("Update for unknown call {}, ignoring", call_id);
            return;
        };
        if let Some(handle) = update.handle {
            call.handle = handle;
        }
        call.extras.extend(update.extras);
        let snapshot = call.snapshot();

        if let Some(selector) = self.bound_selector(call_id) {
            if let Some(handle) = self.selectors.get(&selector) {
                handle.notify_call_updated(snapshot);
            }
        }
    }

    fn remove_call(&mut self, call_id: &CallId) {
        let selector = self.bound_selector(call_id);

        if self.is_in_flight(call_id) {
            info!("Removing call {} while it is being routed, aborting it", call_id);
            self.abort_call(call_id);
        } else if self.calls.remove(call_id).is_none() {
            warn!("Remove for unknown call {}, ignoring", call_id);
            return;
        } else {
            debug!("Removed call {}", call_id);
        }

        if let Some(selector) = selector {
            if let Some(handle) = self.selectors.get(&selector) {
                handle.notify_call_removed(call_id.clone());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Incoming calls
    // ---------------------------------------------------------------------

    fn retrieve_incoming_call(&mut self, mut call: Call, descriptor: ProviderDescriptor) {
        if self.shutting_down {
            return;
        }
        if self.calls.contains_key(&call.id) {
            warn!("Call {} is already known, ignoring", call.id);
            return;
        }

        info!("📥 Retrieving incoming call {} through {}", call.id, descriptor.id);
        call.direction = CallDirection::Incoming;
        call.phase = CallPhase::Connecting;
        call.provider = Some(descriptor.clone());
        let call_id = call.id.clone();
        self.calls.insert(call_id.clone(), call);

        let waiter = ProviderWaiter::Incoming {
            call_id,
            descriptor: descriptor.clone(),
        };
        if let Some((waiter, service)) = self.providers.acquire(descriptor.component(), waiter) {
            self.on_provider_ready(waiter, service);
        }
    }

    fn spawn_incoming(&self, call_id: CallId, descriptor: ProviderDescriptor, service: Arc<dyn ConnectionProvider>) {
        let Some(call) = self.calls.get(&call_id) else {
            debug!("Incoming call {} went away before its provider was bound", call_id);
            return;
        };

        let request = ConnectionRequest {
            call: call.snapshot(),
            descriptor,
            direction: CallDirection::Incoming,
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service.create_connection(request).await;
            let _ = events.send(SwitchboardEvent::IncomingResult { call_id, result });
        });
    }

    fn on_incoming_result(&mut self, call_id: &CallId, result: Result<ConnectionResult>) {
        match result {
            Ok(ConnectionResult::Created(details)) => {
                let Some(call) = self.calls.get_mut(call_id) else {
                    warn!("Incoming connection for unknown call {}", call_id);
                    return;
                };
                info!("✅ Incoming call {} connected", call_id);
                call.phase = CallPhase::Connected;
                call.provider = Some(details.provider.clone());
                let snapshot = call.snapshot();
                self.totals.incoming_succeeded += 1;
                self.notify(OwnerNotice::IncomingSucceeded {
                    call: snapshot,
                    details,
                });
            }
            Ok(ConnectionResult::Failed(cause)) => self.fail_incoming(call_id, cause),
            Ok(ConnectionResult::Canceled) => {
                self.fail_incoming(call_id, FailureCause::new(failure_codes::ERROR_UNSPECIFIED, "canceled by provider"))
            }
            Err(e) => self.fail_incoming(call_id, FailureCause::provider_unavailable(e.to_string())),
        }
    }

    fn fail_incoming(&mut self, call_id: &CallId, cause: FailureCause) {
        let Some(mut call) = self.calls.remove(call_id) else {
            warn!("Failure for unknown incoming call {}", call_id);
            return;
        };
        info!("❌ Incoming call {} failed: {}", call_id, cause);
        call.phase = CallPhase::Failed;
        call.failure = Some(cause);
        self.totals.incoming_failed += 1;
        self.notify(OwnerNotice::IncomingFailed(call.snapshot()));
    }

    // ---------------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------------

    fn notify(&self, notice: OwnerNotice) {
        if self.notices.send(notice).is_err() {
            error!("Call owner notifier is gone, dropping notice");
        }
    }

    fn stats(&self) -> SwitchboardStats {
        SwitchboardStats {
            new_calls: self.new_calls.len(),
            pending_calls: self.pending_calls.len(),
            live_calls: self.calls.len(),
            active_processors: self.processors.len(),
            abandoned_attempts: self.abandoned.len(),
            cached_providers: self.providers.len(),
            cached_selectors: self.selectors.len(),
            lookup_cycle: self.lookup_cycle,
            ..self.totals.clone()
        }
    }

    async fn shutdown(mut self, reply: Option<oneshot::Sender<()>>) {
        info!("🛑 Switchboard shutting down");
        self.shutting_down = true;

        let in_flight: Vec<CallId> = self.new_calls.iter().chain(self.pending_calls.iter()).cloned().collect();
        for call_id in in_flight {
            self.abort_call(&call_id);
        }

        self.stop_sweep();
        self.processors.clear();
        self.abandoned.clear();
        self.providers.release_all();
        self.selectors.release_all();

        let Self {
            receiver,
            notices,
            notifier,
            ..
        } = self;
        drop(receiver);
        drop(notices);
        if let Err(e) = notifier.await {
            error!("Call owner notifier failed: {}", e);
        }

        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        info!("Switchboard stopped");
    }
}

impl AttemptDriver for SwitchboardCore {
    fn request_selection(&mut self, call_id: &CallId, selector: &SelectorRef, candidates: &[ProviderDescriptor]) {
        match selector {
            SelectorRef::Emergency => {
                let ranked = emergency_selection(candidates);
                let _ = self.events.send(SwitchboardEvent::SelectionResult {
                    selector: SelectorRef::Emergency,
                    call_id: call_id.clone(),
                    result: Ok(ranked),
                });
            }
            SelectorRef::Installed(component) => {
                let Some(call) = self.calls.get(call_id) else {
                    warn!("Selection requested for untracked call {}", call_id);
                    return;
                };
                let snapshot = call.snapshot();
                if let Err(e) = self.selectors.handle_mut(component).select(snapshot, candidates.to_vec()) {
                    warn!("Selection for call {} refused: {}", call_id, e);
                }
            }
        }
    }

    fn start_attempt(&mut self, call_id: &CallId, seq: u64, descriptor: &ProviderDescriptor) {
        let waiter = ProviderWaiter::Attempt {
            call_id: call_id.clone(),
            seq,
            descriptor: descriptor.clone(),
        };
        if let Some((_, service)) = self.providers.acquire(descriptor.component(), waiter) {
            self.spawn_create(call_id.clone(), seq, descriptor.clone(), service);
        }
    }

    fn discard_connection(&mut self, call_id: &CallId, descriptor: &ProviderDescriptor) {
        let Some(service) = self.providers.service(descriptor.component()) else {
            debug!("Provider {} not bound, nothing to discard for call {}", descriptor.id, call_id);
            return;
        };
        let call_id = call_id.clone();
        let provider = descriptor.id.clone();
        tokio::spawn(async move {
            if let Err(e) = service.abort(&call_id).await {
                warn!("Provider {} failed to discard call {}: {}", provider, call_id, e);
            }
        });
    }

    fn attach_provider(&mut self, call_id: &CallId, descriptor: Option<&ProviderDescriptor>) {
        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        call.provider = descriptor.cloned();
        if descriptor.is_some() {
            call.phase = CallPhase::Connecting;
        }
    }
}
