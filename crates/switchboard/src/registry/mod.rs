//! Discovery and caching of remote endpoints
//!
//! Two registries share the same lookup-cycle machinery:
//!
//! - [`ProviderRegistry`] binds provider endpoints and gathers the
//!   descriptors they offer;
//! - [`SelectorRegistry`] binds selector endpoints and ranks them.
//!
//! Both are driven from the switchboard event loop and report finished
//! lookup cycles back to it as return values.

pub(crate) mod lookup;
pub(crate) mod provider;
pub(crate) mod selector;

pub(crate) use provider::{ProviderRegistry, ProviderUpdate, ProviderWaiter};
pub(crate) use selector::SelectorRegistry;
