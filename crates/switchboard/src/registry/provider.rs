//! Registry of connection provider endpoints
//!
//! One entry per installed provider endpoint, created the first time a lookup
//! sees it. The entry owns the endpoint's [`ServiceConnection`] and the
//! descriptors the endpoint last reported. Querying an endpoint means binding
//! it and asking for its descriptors; once answered, the descriptors are
//! reused by later lookups without asking again. Entries are dropped when the
//! endpoint disconnects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lookup::{CompletedCycle, LookupTracker};
use crate::connection::{watch_disconnect, BindOutcome, BindRequest, ServiceConnection};
use crate::error::Result;
use crate::events::SwitchboardEvent;
use crate::remote::{Binding, ConnectionProvider, ServiceCatalog, ServiceKind};
use crate::types::{CallId, ComponentName, FailureCause, ProviderDescriptor};

/// A caller waiting for a provider endpoint to be bound
#[derive(Debug, Clone)]
pub(crate) enum ProviderWaiter {
    /// Lookup query: fetch descriptors once bound
    Query,
    /// Outgoing connection attempt
    Attempt {
        call_id: CallId,
        seq: u64,
        descriptor: ProviderDescriptor,
    },
    /// Incoming call being retrieved
    Incoming {
        call_id: CallId,
        descriptor: ProviderDescriptor,
    },
}

/// Results of feeding one event into the registry
#[derive(Default)]
pub(crate) struct ProviderUpdate {
    /// Lookup cycles that finished, with their flattened descriptors
    pub(crate) completed: Vec<(u64, Vec<ProviderDescriptor>)>,
    /// Waiters whose endpoint is now bound
    pub(crate) ready: Vec<(ProviderWaiter, Arc<dyn ConnectionProvider>)>,
    /// Waiters whose endpoint could not be bound
    pub(crate) failed: Vec<(ProviderWaiter, FailureCause)>,
}

struct ProviderEntry {
    connection: ServiceConnection<dyn ConnectionProvider, ProviderWaiter>,
    descriptors: Option<Vec<ProviderDescriptor>>,
    query_in_flight: bool,
    watcher: Option<JoinHandle<()>>,
}

impl ProviderEntry {
    fn new(component: ComponentName) -> Self {
        Self {
            connection: ServiceConnection::new(component),
            descriptors: None,
            query_in_flight: false,
            watcher: None,
        }
    }

    fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

pub(crate) struct ProviderRegistry {
    catalog: Arc<dyn ServiceCatalog>,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    entries: HashMap<ComponentName, ProviderEntry>,
    lookups: LookupTracker,
}

impl ProviderRegistry {
    pub(crate) fn new(
        catalog: Arc<dyn ServiceCatalog>,
        events: mpsc::UnboundedSender<SwitchboardEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            lookups: LookupTracker::new(ServiceKind::Provider, timeout, events.clone()),
            catalog,
            events,
            entries: HashMap::new(),
        }
    }

    /// Start lookup cycle `cycle` over every installed provider endpoint
    pub(crate) fn lookup(&mut self, cycle: u64) -> ProviderUpdate {
        let discovered: IndexSet<ComponentName> =
            self.catalog.installed(ServiceKind::Provider).into_iter().collect();
        debug!("Provider lookup cycle {}: {} endpoint(s) installed", cycle, discovered.len());

        let mut update = ProviderUpdate::default();
        let mut outstanding = HashSet::new();
        for component in &discovered {
            let entry = self
                .entries
                .entry(component.clone())
                .or_insert_with(|| ProviderEntry::new(component.clone()));

            if entry.descriptors.is_some() {
                continue;
            }
            outstanding.insert(component.clone());
            if entry.query_in_flight {
                continue;
            }

            entry.query_in_flight = true;
            match entry.connection.bind(ProviderWaiter::Query) {
                BindRequest::Ready(_, service) => self.spawn_query(component.clone(), service),
                BindRequest::Queued => {}
                BindRequest::Start(generation) => self.spawn_bind(component.clone(), generation),
            }
        }

        if let Some(done) = self.lookups.begin(cycle, discovered.into_iter().collect(), outstanding) {
            update.completed.push(self.collect(done));
        }
        update
    }

    /// Bind `component` on behalf of `waiter`. Returns the waiter right away
    /// when the endpoint is already bound.
    pub(crate) fn acquire(
        &mut self,
        component: &ComponentName,
        waiter: ProviderWaiter,
    ) -> Option<(ProviderWaiter, Arc<dyn ConnectionProvider>)> {
        let entry = self
            .entries
            .entry(component.clone())
            .or_insert_with(|| ProviderEntry::new(component.clone()));

        match entry.connection.bind(waiter) {
            BindRequest::Ready(waiter, service) => Some((waiter, service)),
            BindRequest::Queued => None,
            BindRequest::Start(generation) => {
                self.spawn_bind(component.clone(), generation);
                None
            }
        }
    }

    /// The bound interface of `component`, if any
    pub(crate) fn service(&self, component: &ComponentName) -> Option<Arc<dyn ConnectionProvider>> {
        self.entries.get(component).and_then(|e| e.connection.service())
    }

    pub(crate) fn on_bound(
        &mut self,
        component: &ComponentName,
        generation: u64,
        result: Result<Binding<dyn ConnectionProvider>>,
    ) -> ProviderUpdate {
        let mut update = ProviderUpdate::default();

        let Some(entry) = self.entries.get_mut(component) else {
            warn!("Bind completed for unknown provider {}", component);
            if result.is_ok() {
                self.catalog.unbind(ServiceKind::Provider, component);
            }
            return update;
        };

        let (service, disconnected) = match result {
            Ok(binding) => (Ok(binding.service), Some(binding.disconnected)),
            Err(e) => (Err(e), None),
        };

        let mut query_failed = false;
        match entry.connection.complete_bind(generation, service) {
            BindOutcome::Stale => {
                debug!("Ignoring stale bind of provider {} (generation {})", component, generation);
                if disconnected.is_some() {
                    self.catalog.unbind(ServiceKind::Provider, component);
                }
                return update;
            }
            BindOutcome::Connected { service, waiters } => {
                info!("🔗 Provider {} bound", component);
                if let Some(disconnected) = disconnected {
                    entry.stop_watching();
                    entry.watcher = Some(watch_disconnect(
                        disconnected,
                        self.events.clone(),
                        SwitchboardEvent::ProviderDisconnected {
                            component: component.clone(),
                            generation,
                        },
                    ));
                }
                for waiter in waiters {
                    match waiter {
                        ProviderWaiter::Query => self.spawn_query(component.clone(), service.clone()),
                        other => update.ready.push((other, service.clone())),
                    }
                }
            }
            BindOutcome::Failed { waiters, error } => {
                warn!("❌ Failed to bind provider {}: {}", component, error);
                let cause = FailureCause::provider_unavailable(error.to_string());
                for waiter in waiters {
                    match waiter {
                        ProviderWaiter::Query => query_failed = true,
                        other => update.failed.push((other, cause.clone())),
                    }
                }
            }
            BindOutcome::TornDown { waiters, .. } => {
                debug!("Provider {} bound after release, tearing down", component);
                self.catalog.unbind(ServiceKind::Provider, component);
                let cause = FailureCause::provider_unavailable("provider released");
                for waiter in waiters {
                    match waiter {
                        ProviderWaiter::Query => query_failed = true,
                        other => update.failed.push((other, cause.clone())),
                    }
                }
            }
        }

        if query_failed {
            if let Some(entry) = self.entries.get_mut(component) {
                entry.query_in_flight = false;
            }
            for done in self.lookups.resolve(component) {
                update.completed.push(self.collect(done));
            }
        }
        update
    }

    pub(crate) fn on_descriptors(
        &mut self,
        component: &ComponentName,
        result: Result<Vec<ProviderDescriptor>>,
    ) -> ProviderUpdate {
        let mut update = ProviderUpdate::default();

        if !self.lookups.is_outstanding(component) {
            warn!("Late or unexpected descriptors from provider {}", component);
        }

        match self.entries.get_mut(component) {
            Some(entry) => {
                entry.query_in_flight = false;
                match result {
                    Ok(descriptors) => {
                        debug!("Provider {} reported {} descriptor(s)", component, descriptors.len());
                        entry.descriptors = Some(descriptors);
                    }
                    Err(e) => warn!("❌ Descriptor query to provider {} failed: {}", component, e),
                }
            }
            None => debug!("Descriptors from provider {} arrived after it went away", component),
        }

        for done in self.lookups.resolve(component) {
            update.completed.push(self.collect(done));
        }
        update
    }

    pub(crate) fn on_deadline(&mut self, cycle: u64) -> Option<(u64, Vec<ProviderDescriptor>)> {
        let done = self.lookups.expire(cycle)?;
        Some(self.collect(done))
    }

    /// The endpoint went away. Returns true when this removed its entry.
    pub(crate) fn on_disconnect(&mut self, component: &ComponentName, generation: u64) -> bool {
        let Some(entry) = self.entries.get_mut(component) else {
            return false;
        };
        if !entry.connection.handle_disconnect(generation) {
            debug!("Ignoring stale disconnect of provider {}", component);
            return false;
        }

        warn!("🔌 Provider {} disconnected", component);
        if let Some(mut entry) = self.entries.remove(component) {
            entry.stop_watching();
        }
        self.catalog.unbind(ServiceKind::Provider, component);
        true
    }

    /// Unbind every cached endpoint
    pub(crate) fn release_all(&mut self) {
        self.lookups.clear();
        for (component, mut entry) in self.entries.drain() {
            entry.stop_watching();
            if entry.connection.unbind().is_some() {
                debug!("Releasing provider {}", component);
                self.catalog.unbind(ServiceKind::Provider, &component);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn collect(&self, done: CompletedCycle) -> (u64, Vec<ProviderDescriptor>) {
        let descriptors = done
            .members
            .iter()
            .filter_map(|component| self.entries.get(component))
            .filter_map(|entry| entry.descriptors.as_ref())
            .flat_map(|descriptors| descriptors.iter().cloned())
            .collect();
        (done.cycle, descriptors)
    }

    fn spawn_bind(&self, component: ComponentName, generation: u64) {
        let catalog = self.catalog.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = catalog.bind_provider(&component).await;
            let bound = result.is_ok();
            let event = SwitchboardEvent::ProviderBound {
                component: component.clone(),
                generation,
                result,
            };
            if events.send(event).is_err() && bound {
                catalog.unbind(ServiceKind::Provider, &component);
            }
        });
    }

    fn spawn_query(&self, component: ComponentName, service: Arc<dyn ConnectionProvider>) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service.descriptors().await;
            let _ = events.send(SwitchboardEvent::ProviderDescriptors { component, result });
        });
    }
}
