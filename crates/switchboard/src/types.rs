//! Core data model: calls, endpoint identities and provider descriptors

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Unique identifier for a call routed through the switchboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity of an installed remote endpoint: the package that ships it and
/// the class inside that package.
///
/// Two discoveries of the same `(package, class)` pair are the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// Identity of one account offered by a provider endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    /// Endpoint that issued the account
    pub component: ComponentName,
    /// Provider-assigned sub-id, unique within the endpoint
    pub id: String,
}

impl ProviderId {
    pub fn new(component: ComponentName, id: impl Into<String>) -> Self {
        Self {
            component,
            id: id.into(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.component, self.id)
    }
}

/// Capability flags advertised by a provider account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities(u32);

impl Capabilities {
    /// The built-in circuit-switched (PSTN) provider; the only kind allowed
    /// to carry emergency calls
    pub const PSTN: Capabilities = Capabilities(1 << 0);
    /// Can carry video
    pub const VIDEO: Capabilities = Capabilities(1 << 1);
    /// Can take over a call from another provider
    pub const HANDOFF: Capabilities = Capabilities(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

/// Immutable identity plus capabilities of one candidate provider account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub capabilities: Capabilities,
}

impl ProviderDescriptor {
    pub fn new(id: ProviderId, capabilities: Capabilities) -> Self {
        Self { id, capabilities }
    }

    /// Endpoint that has to be bound to use this descriptor
    pub fn component(&self) -> &ComponentName {
        &self.id.component
    }

    pub fn is_pstn(&self) -> bool {
        self.capabilities.contains(Capabilities::PSTN)
    }
}

/// Failure codes produced by the switchboard itself.
///
/// Providers report their own (non-negative) codes; the switchboard only
/// synthesizes negative ones so the two never collide.
pub mod failure_codes {
    /// Nothing more specific is known, or no attempt was ever made
    pub const ERROR_UNSPECIFIED: i32 = -1;
    /// The provider endpoint could not be bound or went away mid-attempt
    pub const PROVIDER_UNAVAILABLE: i32 = -2;
    /// The selector endpoint could not be bound
    pub const SELECTOR_UNAVAILABLE: i32 = -3;
}

/// Why a connection attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub code: i32,
    pub message: Option<String>,
}

impl FailureCause {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn unspecified() -> Self {
        Self {
            code: failure_codes::ERROR_UNSPECIFIED,
            message: None,
        }
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(failure_codes::PROVIDER_UNAVAILABLE, message)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Returned by a provider when it created a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub provider: ProviderDescriptor,
    pub handle: String,
    pub extras: HashMap<String, String>,
}

/// Handoff target pushed by a selector for a live call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffInfo {
    pub handle: String,
    pub extras: HashMap<String, String>,
}

/// Lifecycle phase of a call inside the switchboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPhase {
    /// Queued, waiting for both lookup cycles
    New,
    /// Dispatched to a processor, ranking in progress
    Pending,
    /// A provider is creating the connection
    Connecting,
    Connected,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// A call owned by the switchboard
#[derive(Debug, Clone)]
pub struct Call {
    pub id: CallId,
    /// Target address (number or URI)
    pub handle: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Provider currently attached to the call
    pub provider: Option<ProviderDescriptor>,
    /// Selector that ranked the winning candidate list; sticky for handoff
    pub selector: Option<ComponentName>,
    /// Account the user asked for explicitly; tried first
    pub pinned_account: Option<ProviderId>,
    /// Selector the call is pinned to after a handoff
    pub pinned_selector: Option<ComponentName>,
    pub extras: HashMap<String, String>,
    pub failure: Option<FailureCause>,
    pub handoff: Option<HandoffInfo>,
    created_at: Instant,
    created_wall: DateTime<Utc>,
}

impl Call {
    pub fn outgoing(handle: impl Into<String>) -> Self {
        Self::with_direction(handle, CallDirection::Outgoing)
    }

    pub fn incoming(handle: impl Into<String>) -> Self {
        Self::with_direction(handle, CallDirection::Incoming)
    }

    fn with_direction(handle: impl Into<String>, direction: CallDirection) -> Self {
        Self {
            id: CallId::new(),
            handle: handle.into(),
            direction,
            phase: CallPhase::New,
            provider: None,
            selector: None,
            pinned_account: None,
            pinned_selector: None,
            extras: HashMap::new(),
            failure: None,
            handoff: None,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: CallId) -> Self {
        self.id = id;
        self
    }

    pub fn with_pinned_account(mut self, account: ProviderId) -> Self {
        self.pinned_account = Some(account);
        self
    }

    pub fn with_pinned_selector(mut self, selector: ComponentName) -> Self {
        self.pinned_selector = Some(selector);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Time since the call was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            id: self.id.clone(),
            handle: self.handle.clone(),
            direction: self.direction,
            phase: self.phase,
            provider: self.provider.clone(),
            selector: self.selector.clone(),
            extras: self.extras.clone(),
            failure: self.failure.clone(),
            handoff: self.handoff.clone(),
            created_at: self.created_wall,
            age_ms: self.age().as_millis() as u64,
        }
    }
}

/// Read-only view of a call handed to remote endpoints and the call owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub id: CallId,
    pub handle: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    pub provider: Option<ProviderDescriptor>,
    pub selector: Option<ComponentName>,
    pub extras: HashMap<String, String>,
    pub failure: Option<FailureCause>,
    pub handoff: Option<HandoffInfo>,
    pub created_at: DateTime<Utc>,
    pub age_ms: u64,
}

/// Changes the call owner applies to a live call
#[derive(Debug, Clone, Default)]
pub struct CallUpdate {
    pub handle: Option<String>,
    pub extras: HashMap<String, String>,
}
