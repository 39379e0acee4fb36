//! Shared fixtures for the switchboard integration tests
//!
//! Everything here is an in-process stand-in for a remote endpoint: a catalog
//! that hands out mock providers and selectors, and a call owner that records
//! what it is told.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rvoip_switchboard::prelude::*;
use tokio::sync::{mpsc, oneshot};

pub const PACKAGE: &str = "com.example.telecom";

pub fn component(class: &str) -> ComponentName {
    ComponentName::new(PACKAGE, class)
}

pub fn account(component: &ComponentName, id: &str, capabilities: Capabilities) -> ProviderDescriptor {
    ProviderDescriptor::new(ProviderId::new(component.clone(), id), capabilities)
}

/// Route switchboard logs to the test harness. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing() {
    let logging = test_config().logging.with_level("warn").with_test_writer();
    setup_logging(&logging).expect("logging configuration should be valid");
}

/// Configuration with the default timings and `911` as emergency number
pub fn test_config() -> SwitchboardConfig {
    SwitchboardConfig::default()
        .with_fallback_selector(None)
        .with_emergency_numbers(vec!["911".to_string()])
}

/// How a mock provider answers `create_connection` for one account
#[derive(Debug, Clone)]
pub enum Behavior {
    Connect,
    Fail(i32),
    Cancel,
    Hang,
    ConnectAfter(Duration),
}

pub struct MockProvider {
    descriptors: Vec<ProviderDescriptor>,
    hang_descriptors: bool,
    behaviors: Mutex<HashMap<ProviderId, Behavior>>,
    attempts: Mutex<Vec<(CallId, ProviderId, CallDirection)>>,
    aborts: Mutex<Vec<CallId>>,
}

impl MockProvider {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            descriptors,
            hang_descriptors: false,
            behaviors: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
        })
    }

    /// A provider that binds but never reports its descriptors
    pub fn unresponsive() -> Arc<Self> {
        Arc::new(Self {
            descriptors: Vec::new(),
            hang_descriptors: true,
            behaviors: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, descriptor: &ProviderDescriptor, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(descriptor.id.clone(), behavior);
    }

    /// Accounts tried, in order
    pub fn attempts(&self) -> Vec<ProviderId> {
        self.attempts.lock().unwrap().iter().map(|(_, id, _)| id.clone()).collect()
    }

    pub fn attempt_directions(&self) -> Vec<CallDirection> {
        self.attempts.lock().unwrap().iter().map(|(_, _, d)| *d).collect()
    }

    pub fn aborts(&self) -> Vec<CallId> {
        self.aborts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn descriptors(&self) -> Result<Vec<ProviderDescriptor>> {
        if self.hang_descriptors {
            std::future::pending::<()>().await;
        }
        Ok(self.descriptors.clone())
    }

    async fn create_connection(&self, request: ConnectionRequest) -> Result<ConnectionResult> {
        let behavior = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push((request.call.id.clone(), request.descriptor.id.clone(), request.direction));
            self.behaviors
                .lock()
                .unwrap()
                .get(&request.descriptor.id)
                .cloned()
                .unwrap_or(Behavior::Connect)
        };

        let details = ConnectionDetails {
            provider: request.descriptor.clone(),
            handle: request.call.handle.clone(),
            extras: HashMap::new(),
        };
        match behavior {
            Behavior::Connect => Ok(ConnectionResult::Created(details)),
            Behavior::Fail(code) => Ok(ConnectionResult::Failed(FailureCause::new(code, "refused"))),
            Behavior::Cancel => Ok(ConnectionResult::Canceled),
            Behavior::Hang => std::future::pending().await,
            Behavior::ConnectAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ConnectionResult::Created(details))
            }
        }
    }

    async fn abort(&self, call_id: &CallId) -> Result<()> {
        self.aborts.lock().unwrap().push(call_id.clone());
        Ok(())
    }
}

/// Order in which selectors were consulted, shared between several of them
pub type ConsultLog = Arc<Mutex<Vec<ComponentName>>>;

/// Selector that returns a fixed ranking, or the candidates as given
pub struct MockSelector {
    ranking: Mutex<Option<Vec<ProviderDescriptor>>>,
    silent: bool,
    consult_log: Mutex<Option<(ComponentName, ConsultLog)>>,
    adapter: Mutex<Option<SelectorAdapter>>,
    selections: Mutex<Vec<CallId>>,
    updates: Mutex<Vec<CallSnapshot>>,
    removals: Mutex<Vec<CallId>>,
}

impl MockSelector {
    pub fn passthrough() -> Arc<Self> {
        Arc::new(Self {
            ranking: Mutex::new(None),
            silent: false,
            consult_log: Mutex::new(None),
            adapter: Mutex::new(None),
            selections: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        })
    }

    pub fn ranking(ranking: Vec<ProviderDescriptor>) -> Arc<Self> {
        let selector = Self::passthrough();
        *selector.ranking.lock().unwrap() = Some(ranking);
        selector
    }

    /// A selector that takes selection requests and never answers them
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            ranking: Mutex::new(None),
            silent: true,
            consult_log: Mutex::new(None),
            adapter: Mutex::new(None),
            selections: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        })
    }

    /// Append `name` to `log` every time this selector is asked to rank
    pub fn log_consults(&self, name: ComponentName, log: ConsultLog) {
        *self.consult_log.lock().unwrap() = Some((name, log));
    }

    pub fn adapter(&self) -> Option<SelectorAdapter> {
        self.adapter.lock().unwrap().clone()
    }

    pub fn selections(&self) -> Vec<CallId> {
        self.selections.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<CallSnapshot> {
        self.updates.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<CallId> {
        self.removals.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallSelector for MockSelector {
    async fn set_adapter(&self, adapter: SelectorAdapter) -> Result<()> {
        *self.adapter.lock().unwrap() = Some(adapter);
        Ok(())
    }

    async fn select(&self, call: CallSnapshot, candidates: Vec<ProviderDescriptor>) -> Result<Vec<ProviderDescriptor>> {
        self.selections.lock().unwrap().push(call.id);
        let consult = self.consult_log.lock().unwrap().clone();
        if let Some((name, log)) = consult {
            log.lock().unwrap().push(name);
        }
        if self.silent {
            std::future::pending::<()>().await;
        }
        let ranking = self.ranking.lock().unwrap().clone();
        Ok(ranking.unwrap_or(candidates))
    }

    async fn on_call_updated(&self, call: CallSnapshot) -> Result<()> {
        self.updates.lock().unwrap().push(call);
        Ok(())
    }

    async fn on_call_removed(&self, call_id: CallId) -> Result<()> {
        self.removals.lock().unwrap().push(call_id);
        Ok(())
    }
}

/// Catalog over a fixed set of mock endpoints
#[derive(Default)]
pub struct MockCatalog {
    providers: Mutex<Vec<(ComponentName, Arc<MockProvider>)>>,
    selectors: Mutex<Vec<(ComponentName, Arc<MockSelector>)>>,
    refused: Mutex<HashSet<ComponentName>>,
    bind_delays: Mutex<HashMap<ComponentName, Duration>>,
    disconnects: Mutex<HashMap<ComponentName, oneshot::Sender<()>>>,
    binds: Mutex<Vec<ComponentName>>,
    unbinds: Mutex<Vec<(ServiceKind, ComponentName)>>,
}

impl MockCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_provider(&self, component: ComponentName, provider: Arc<MockProvider>) {
        self.providers.lock().unwrap().push((component, provider));
    }

    pub fn add_selector(&self, component: ComponentName, selector: Arc<MockSelector>) {
        self.selectors.lock().unwrap().push((component, selector));
    }

    /// Make every bind of `component` fail
    pub fn refuse(&self, component: &ComponentName) {
        self.refused.lock().unwrap().insert(component.clone());
    }

    /// Make every bind of `component` take `delay` to complete
    pub fn delay_bind(&self, component: &ComponentName, delay: Duration) {
        self.bind_delays.lock().unwrap().insert(component.clone(), delay);
    }

    /// Drop the connection to `component` as if its process died
    pub fn disconnect(&self, component: &ComponentName) {
        if let Some(signal) = self.disconnects.lock().unwrap().remove(component) {
            let _ = signal.send(());
        }
    }

    pub fn binds(&self) -> Vec<ComponentName> {
        self.binds.lock().unwrap().clone()
    }

    pub fn unbinds(&self) -> Vec<(ServiceKind, ComponentName)> {
        self.unbinds.lock().unwrap().clone()
    }

    fn open(&self, component: &ComponentName) -> Result<oneshot::Receiver<()>> {
        self.binds.lock().unwrap().push(component.clone());
        if self.refused.lock().unwrap().contains(component) {
            return Err(SwitchboardError::remote(format!("{} refused to bind", component)));
        }
        let (signal, disconnected) = oneshot::channel();
        self.disconnects.lock().unwrap().insert(component.clone(), signal);
        Ok(disconnected)
    }
}

#[async_trait]
impl ServiceCatalog for MockCatalog {
    fn installed(&self, kind: ServiceKind) -> Vec<ComponentName> {
        match kind {
            ServiceKind::Provider => self.providers.lock().unwrap().iter().map(|(c, _)| c.clone()).collect(),
            ServiceKind::Selector => self.selectors.lock().unwrap().iter().map(|(c, _)| c.clone()).collect(),
        }
    }

    async fn bind_provider(&self, component: &ComponentName) -> Result<Binding<dyn ConnectionProvider>> {
        let provider = self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == component)
            .map(|(_, p)| p.clone());
        let Some(provider) = provider else {
            return Err(SwitchboardError::not_found(component.to_string()));
        };
        let delay = self.bind_delays.lock().unwrap().get(component).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let disconnected = self.open(component)?;
        let service: Arc<dyn ConnectionProvider> = provider;
        Ok(Binding::new(service, disconnected))
    }

    async fn bind_selector(&self, component: &ComponentName) -> Result<Binding<dyn CallSelector>> {
        let selector = self
            .selectors
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == component)
            .map(|(_, s)| s.clone());
        let Some(selector) = selector else {
            return Err(SwitchboardError::not_found(component.to_string()));
        };
        let disconnected = self.open(component)?;
        let service: Arc<dyn CallSelector> = selector;
        Ok(Binding::new(service, disconnected))
    }

    fn unbind(&self, kind: ServiceKind, component: &ComponentName) {
        self.unbinds.lock().unwrap().push((kind, component.clone()));
    }
}

/// What the switchboard told the call owner
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerEvent {
    OutgoingSucceeded(CallSnapshot),
    OutgoingFailed { call: CallSnapshot, aborted: bool },
    IncomingSucceeded(CallSnapshot, ConnectionDetails),
    IncomingFailed(CallSnapshot),
    Handoff(CallSnapshot, HandoffInfo),
}

pub struct RecordingOwner {
    events: mpsc::UnboundedSender<OwnerEvent>,
}

impl RecordingOwner {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OwnerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

#[async_trait]
impl CallOwner for RecordingOwner {
    async fn handle_successful_outgoing_call(&self, call: CallSnapshot) {
        let _ = self.events.send(OwnerEvent::OutgoingSucceeded(call));
    }

    async fn handle_failed_outgoing_call(&self, call: CallSnapshot, is_aborted: bool) {
        let _ = self.events.send(OwnerEvent::OutgoingFailed {
            call,
            aborted: is_aborted,
        });
    }

    async fn handle_successful_incoming_call(&self, call: CallSnapshot, details: ConnectionDetails) {
        let _ = self.events.send(OwnerEvent::IncomingSucceeded(call, details));
    }

    async fn handle_failed_incoming_call(&self, call: CallSnapshot) {
        let _ = self.events.send(OwnerEvent::IncomingFailed(call));
    }

    async fn handle_handoff_info(&self, call: CallSnapshot, info: HandoffInfo) {
        let _ = self.events.send(OwnerEvent::Handoff(call, info));
    }
}

/// Next owner event, failing the test if none arrives
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<OwnerEvent>) -> OwnerEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for the call owner to be notified")
        .expect("owner channel closed")
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
