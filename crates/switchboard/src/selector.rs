//! Handle to one remote selector endpoint
//!
//! A [`SelectorHandle`] binds its selector on demand, tracks the selection
//! requests it has forwarded (at most one per call) and matches the answers
//! back to them. It also carries fire-and-forget notifications to the
//! selector. Commands the selector pushes back arrive through the
//! [`SelectorAdapter`] it was handed when bound.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{watch_disconnect, BindOutcome, BindRequest, ServiceConnection};
use crate::error::{Result, SwitchboardError};
use crate::events::SwitchboardEvent;
use crate::processor::SelectorRef;
use crate::remote::{Binding, CallSelector, SelectorAdapter, ServiceCatalog, ServiceKind};
use crate::types::{failure_codes, CallId, CallSnapshot, ComponentName, FailureCause, ProviderDescriptor};

/// A caller waiting for the selector to be bound
#[derive(Debug)]
pub(crate) enum SelectorWaiter {
    /// Lookup query: binding is the whole query
    Query,
    Select {
        call: CallSnapshot,
        candidates: Vec<ProviderDescriptor>,
    },
}

/// Selection forwarded to the selector and not answered yet
#[derive(Debug)]
pub(crate) struct PendingSelection {
    pub(crate) requested_at: Instant,
    pub(crate) candidates: usize,
}

/// A selection that finished without an answer from the selector
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnansweredSelection {
    pub(crate) call_id: CallId,
    pub(crate) failure: Option<FailureCause>,
}

/// What a completed bind meant for the handle's callers
#[derive(Debug, Default)]
pub(crate) struct SelectorBindUpdate {
    /// The lookup query waiting on this bind is settled
    pub(crate) query_settled: bool,
    /// Selections that can no longer be answered
    pub(crate) unanswered: Vec<UnansweredSelection>,
}

pub(crate) struct SelectorHandle {
    component: ComponentName,
    connection: ServiceConnection<dyn CallSelector, SelectorWaiter>,
    pending: HashMap<CallId, PendingSelection>,
    query_in_flight: bool,
    watcher: Option<JoinHandle<()>>,
    catalog: Arc<dyn ServiceCatalog>,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
}

impl SelectorHandle {
    pub(crate) fn new(
        component: ComponentName,
        catalog: Arc<dyn ServiceCatalog>,
        events: mpsc::UnboundedSender<SwitchboardEvent>,
    ) -> Self {
        Self {
            connection: ServiceConnection::new(component.clone()),
            component,
            pending: HashMap::new(),
            query_in_flight: false,
            watcher: None,
            catalog,
            events,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self, call_id: &CallId) -> bool {
        self.pending.contains_key(call_id)
    }

    /// Bind for a lookup query. False when the selector is already bound
    /// and nothing has to be waited for.
    pub(crate) fn query(&mut self) -> bool {
        if self.connection.is_connected() {
            return false;
        }
        if self.query_in_flight {
            return true;
        }
        self.query_in_flight = true;
        match self.connection.bind(SelectorWaiter::Query) {
            BindRequest::Ready(..) => {
                self.query_in_flight = false;
                false
            }
            BindRequest::Queued => true,
            BindRequest::Start(generation) => {
                self.spawn_bind(generation);
                true
            }
        }
    }

    /// Ask the selector to rank `candidates` for `call`
    pub(crate) fn select(&mut self, call: CallSnapshot, candidates: Vec<ProviderDescriptor>) -> Result<()> {
        if self.pending.contains_key(&call.id) {
            return Err(SwitchboardError::AlreadyExists(format!(
                "selection for call {} already pending on {}",
                call.id, self.component
            )));
        }

        debug!(
            "Requesting selection for call {} from {} ({} candidates)",
            call.id,
            self.component,
            candidates.len()
        );
        self.pending.insert(
            call.id.clone(),
            PendingSelection {
                requested_at: Instant::now(),
                candidates: candidates.len(),
            },
        );

        match self.connection.bind(SelectorWaiter::Select { call, candidates }) {
            BindRequest::Ready(SelectorWaiter::Select { call, candidates }, service) => {
                self.spawn_select(service, call, candidates);
            }
            BindRequest::Ready(SelectorWaiter::Query, _) | BindRequest::Queued => {}
            BindRequest::Start(generation) => self.spawn_bind(generation),
        }
        Ok(())
    }

    /// Stop waiting for a ranking of `call_id`. An answer that still arrives
    /// is dropped, and a selection queued behind a bind is never sent.
    pub(crate) fn forget(&mut self, call_id: &CallId) -> bool {
        self.pending.remove(call_id).is_some()
    }

    /// Match an answer from the selector to its pending request.
    ///
    /// `None` when nothing was pending for the call; the answer is dropped.
    pub(crate) fn resolve(
        &mut self,
        call_id: &CallId,
        result: Result<Vec<ProviderDescriptor>>,
    ) -> Option<Vec<ProviderDescriptor>> {
        let Some(pending) = self.pending.remove(call_id) else {
            warn!("Dropping selection from {} for call {} with no pending request", self.component, call_id);
            return None;
        };

        match result {
            Ok(ranked) => {
                debug!(
                    "Selector {} ranked {} of {} candidates for call {} in {:?}",
                    self.component,
                    ranked.len(),
                    pending.candidates,
                    call_id,
                    pending.requested_at.elapsed()
                );
                Some(ranked)
            }
            Err(e) => {
                warn!("Selector {} failed to rank call {}: {}", self.component, call_id, e);
                Some(Vec::new())
            }
        }
    }

    pub(crate) fn on_bound(&mut self, generation: u64, result: Result<Binding<dyn CallSelector>>) -> SelectorBindUpdate {
        let mut update = SelectorBindUpdate::default();

        let (service, disconnected) = match result {
            Ok(binding) => (Ok(binding.service), Some(binding.disconnected)),
            Err(e) => (Err(e), None),
        };

        match self.connection.complete_bind(generation, service) {
            BindOutcome::Stale => {
                debug!("Ignoring stale bind of selector {} (generation {})", self.component, generation);
                if disconnected.is_some() {
                    self.catalog.unbind(ServiceKind::Selector, &self.component);
                }
            }
            BindOutcome::Connected { service, waiters } => {
                info!("🔗 Selector {} bound", self.component);
                if let Some(disconnected) = disconnected {
                    self.stop_watching();
                    self.watcher = Some(watch_disconnect(
                        disconnected,
                        self.events.clone(),
                        SwitchboardEvent::SelectorDisconnected {
                            component: self.component.clone(),
                            generation,
                        },
                    ));
                }
                self.spawn_set_adapter(service.clone());

                for waiter in waiters {
                    match waiter {
                        SelectorWaiter::Query => {
                            self.query_in_flight = false;
                            update.query_settled = true;
                        }
                        SelectorWaiter::Select { call, candidates } => {
                            if self.pending.contains_key(&call.id) {
                                self.spawn_select(service.clone(), call, candidates);
                            } else {
                                debug!("Selection for call {} withdrawn before {} was bound", call.id, self.component);
                            }
                        }
                    }
                }
            }
            BindOutcome::Failed { waiters, error } => {
                warn!("❌ Failed to bind selector {}: {}", self.component, error);
                self.fail_waiters(waiters, &mut update, "selector unavailable");
            }
            BindOutcome::TornDown { waiters, .. } => {
                debug!("Selector {} bound after release, tearing down", self.component);
                self.catalog.unbind(ServiceKind::Selector, &self.component);
                self.fail_waiters(waiters, &mut update, "selector released");
            }
        }
        update
    }

    /// The selector went away. Every pending selection is answered with an
    /// empty ranking. `None` for a stale signal.
    pub(crate) fn on_disconnect(&mut self, generation: u64) -> Option<Vec<UnansweredSelection>> {
        if !self.connection.handle_disconnect(generation) {
            debug!("Ignoring stale disconnect of selector {}", self.component);
            return None;
        }

        warn!("🔌 Selector {} disconnected with {} pending selection(s)", self.component, self.pending.len());
        self.stop_watching();
        self.catalog.unbind(ServiceKind::Selector, &self.component);
        Some(
            self.pending
                .drain()
                .map(|(call_id, _)| UnansweredSelection { call_id, failure: None })
                .collect(),
        )
    }

    /// Tell the selector a call changed. Skipped when not bound.
    pub(crate) fn notify_call_updated(&self, call: CallSnapshot) {
        let Some(service) = self.connection.service() else {
            debug!("Selector {} not bound, skipping update of call {}", self.component, call.id);
            return;
        };
        let component = self.component.clone();
        tokio::spawn(async move {
            let call_id = call.id.clone();
            if let Err(e) = service.on_call_updated(call).await {
                warn!("Selector {} failed to take update of call {}: {}", component, call_id, e);
            }
        });
    }

    /// Tell the selector a call is gone. Skipped when not bound.
    pub(crate) fn notify_call_removed(&self, call_id: CallId) {
        let Some(service) = self.connection.service() else {
            debug!("Selector {} not bound, skipping removal of call {}", self.component, call_id);
            return;
        };
        let component = self.component.clone();
        tokio::spawn(async move {
            if let Err(e) = service.on_call_removed(call_id.clone()).await {
                warn!("Selector {} failed to take removal of call {}: {}", component, call_id, e);
            }
        });
    }

    pub(crate) fn release(&mut self) {
        self.stop_watching();
        if self.connection.unbind().is_some() {
            debug!("Releasing selector {}", self.component);
            self.catalog.unbind(ServiceKind::Selector, &self.component);
        }
    }

    fn fail_waiters(&mut self, waiters: Vec<SelectorWaiter>, update: &mut SelectorBindUpdate, reason: &str) {
        for waiter in waiters {
            match waiter {
                SelectorWaiter::Query => {
                    self.query_in_flight = false;
                    update.query_settled = true;
                }
                SelectorWaiter::Select { call, .. } => {
                    if self.pending.remove(&call.id).is_some() {
                        update.unanswered.push(UnansweredSelection {
                            call_id: call.id,
                            failure: Some(FailureCause::new(failure_codes::SELECTOR_UNAVAILABLE, reason)),
                        });
                    }
                }
            }
        }
    }

    fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }

    fn spawn_bind(&self, generation: u64) {
        let catalog = self.catalog.clone();
        let events = self.events.clone();
        let component = self.component.clone();
        tokio::spawn(async move {
            let result = catalog.bind_selector(&component).await;
            let bound = result.is_ok();
            let event = SwitchboardEvent::SelectorBound {
                component: component.clone(),
                generation,
                result,
            };
            if events.send(event).is_err() && bound {
                catalog.unbind(ServiceKind::Selector, &component);
            }
        });
    }

    fn spawn_set_adapter(&self, service: Arc<dyn CallSelector>) {
        let adapter = SelectorAdapter::new(self.component.clone(), self.events.clone());
        let component = self.component.clone();
        tokio::spawn(async move {
            if let Err(e) = service.set_adapter(adapter).await {
                warn!("Selector {} refused its adapter: {}", component, e);
            }
        });
    }

    fn spawn_select(&self, service: Arc<dyn CallSelector>, call: CallSnapshot, candidates: Vec<ProviderDescriptor>) {
        let events = self.events.clone();
        let component = self.component.clone();
        tokio::spawn(async move {
            let call_id = call.id.clone();
            let result = service.select(call, candidates).await;
            let _ = events.send(SwitchboardEvent::SelectionResult {
                selector: SelectorRef::Installed(component),
                call_id,
                result,
            });
        });
    }
}
