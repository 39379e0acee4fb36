//! # RVoIP Switchboard
//!
//! Routes outgoing calls across competing connection providers.
//!
//! A host process (the *call owner*) hands calls to a [`Switchboard`]. For
//! each call the switchboard:
//!
//! - looks up every installed provider endpoint and collects the accounts
//!   (provider descriptors) they offer;
//! - looks up every installed selector endpoint and ranks the selectors;
//! - asks the selectors, one at a time, to order the candidate accounts;
//! - tries the ordered accounts one at a time until one connects.
//!
//! Emergency destinations bypass the installed selectors and go straight to
//! PSTN-capable accounts. Calls that are not routed within a configurable
//! budget are aborted. Incoming calls are handed to the provider that offered
//! them.
//!
//! ## Architecture
//!
//! - `remote`: the traits remote endpoints and the call owner implement
//! - `registry`: binding, caching and lookup cycles for providers and selectors
//! - `selector`: per-selector handle with its pending selections
//! - `processor`: the attempt state machine for one outgoing call
//! - `switchboard`: the public handle and the event loop that owns all state
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_switchboard::prelude::*;
//!
//! # async fn example(catalog: Arc<dyn ServiceCatalog>, owner: Arc<dyn CallOwner>) -> Result<()> {
//! let config = SwitchboardConfig::from_toml_str("[emergency]\nnumbers = [\"911\"]")?;
//! let switchboard = Switchboard::start(config, catalog, owner)?;
//! switchboard.place_outgoing_call(Call::outgoing("tel:+15551234567"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod emergency;
pub mod error;
pub mod logging;
pub mod remote;
pub mod types;

pub(crate) mod connection;
pub(crate) mod events;
pub(crate) mod processor;
pub(crate) mod registry;
pub(crate) mod selector;
mod switchboard;

pub use config::SwitchboardConfig;
pub use logging::{setup_logging, LoggingConfig};
pub use error::{Result, SwitchboardError};
pub use remote::{
    Binding, CallOwner, CallSelector, ConnectionProvider, ConnectionRequest, ConnectionResult, SelectorAdapter,
    ServiceCatalog, ServiceKind,
};
pub use switchboard::{Switchboard, SwitchboardStats};
pub use types::{
    Call, CallDirection, CallId, CallPhase, CallSnapshot, CallUpdate, Capabilities, ComponentName,
    ConnectionDetails, FailureCause, HandoffInfo, ProviderDescriptor, ProviderId,
};

pub mod prelude {
    pub use crate::{
        Binding, Call, CallDirection, CallId, CallOwner, CallPhase, CallSelector, CallSnapshot, CallUpdate,
        Capabilities, ComponentName, ConnectionDetails, ConnectionProvider, ConnectionRequest, ConnectionResult,
        FailureCause, HandoffInfo, LoggingConfig, ProviderDescriptor, ProviderId, Result, SelectorAdapter,
        ServiceCatalog, ServiceKind, Switchboard, SwitchboardConfig, SwitchboardError, SwitchboardStats,
    };
    pub use crate::logging::setup_logging;
    pub use crate::types::failure_codes;
}
