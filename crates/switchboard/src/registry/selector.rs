//! Registry of selector endpoints
//!
//! Querying a selector is just binding it, so a lookup cycle here reports
//! which selectors could be bound in time. The result is ranked before it is
//! handed out: the configured fallback selector always goes last, and the
//! rest come out newest-discovered first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tokio::sync::mpsc;
use tracing::debug;

use super::lookup::{CompletedCycle, LookupTracker};
use crate::error::Result;
use crate::events::SwitchboardEvent;
use crate::remote::{Binding, CallSelector, ServiceCatalog, ServiceKind};
use crate::selector::{SelectorBindUpdate, SelectorHandle, UnansweredSelection};
use crate::types::{CallId, ComponentName};

/// Order selectors the way the switchboard consults them.
///
/// Every selector except `fallback` is placed in front of the ones discovered
/// before it; `fallback` is appended at the end.
pub(crate) fn rank_selectors(discovered: &[ComponentName], fallback: Option<&ComponentName>) -> Vec<ComponentName> {
    let mut ranked = Vec::with_capacity(discovered.len());
    let mut fallback_found = None;

    for component in discovered {
        if Some(component) == fallback {
            fallback_found = Some(component.clone());
        } else {
            ranked.insert(0, component.clone());
        }
    }
    ranked.extend(fallback_found);
    ranked
}

pub(crate) struct SelectorRegistry {
    catalog: Arc<dyn ServiceCatalog>,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    handles: HashMap<ComponentName, SelectorHandle>,
    lookups: LookupTracker,
    fallback: Option<ComponentName>,
}

impl SelectorRegistry {
    pub(crate) fn new(
        catalog: Arc<dyn ServiceCatalog>,
        events: mpsc::UnboundedSender<SwitchboardEvent>,
        timeout: Duration,
        fallback: Option<ComponentName>,
    ) -> Self {
        Self {
            lookups: LookupTracker::new(ServiceKind::Selector, timeout, events.clone()),
            catalog,
            events,
            handles: HashMap::new(),
            fallback,
        }
    }

    /// Start lookup cycle `cycle` over every installed selector endpoint
    pub(crate) fn lookup(&mut self, cycle: u64) -> Option<(u64, Vec<ComponentName>)> {
        let discovered: IndexSet<ComponentName> =
            self.catalog.installed(ServiceKind::Selector).into_iter().collect();
        debug!("Selector lookup cycle {}: {} endpoint(s) installed", cycle, discovered.len());

        let mut outstanding = HashSet::new();
        for component in &discovered {
            if self.handle_mut(component).query() {
                outstanding.insert(component.clone());
            }
        }

        self.lookups
            .begin(cycle, discovered.into_iter().collect(), outstanding)
            .map(|done| self.rank(done))
    }

    /// Handle for `component`, created on first use
    pub(crate) fn handle_mut(&mut self, component: &ComponentName) -> &mut SelectorHandle {
        self.handles.entry(component.clone()).or_insert_with(|| {
            SelectorHandle::new(component.clone(), self.catalog.clone(), self.events.clone())
        })
    }

    pub(crate) fn get_mut(&mut self, component: &ComponentName) -> Option<&mut SelectorHandle> {
        self.handles.get_mut(component)
    }

    pub(crate) fn get(&self, component: &ComponentName) -> Option<&SelectorHandle> {
        self.handles.get(component)
    }

    /// Withdraw whatever selection is still pending for `call_id`
    pub(crate) fn forget_call(&mut self, call_id: &CallId) {
        for (component, handle) in self.handles.iter_mut() {
            if handle.forget(call_id) {
                debug!("Withdrew selection for call {} from {}", call_id, component);
            }
        }
    }

    pub(crate) fn on_bound(
        &mut self,
        component: &ComponentName,
        generation: u64,
        result: Result<Binding<dyn CallSelector>>,
    ) -> (SelectorBindUpdate, Vec<(u64, Vec<ComponentName>)>) {
        let Some(handle) = self.handles.get_mut(component) else {
            debug!("Bind completed for unknown selector {}", component);
            if result.is_ok() {
                self.catalog.unbind(ServiceKind::Selector, component);
            }
            return (SelectorBindUpdate::default(), Vec::new());
        };

        let update = handle.on_bound(generation, result);
        let completed = if update.query_settled {
            self.lookups
                .resolve(component)
                .into_iter()
                .map(|done| self.rank(done))
                .collect()
        } else {
            Vec::new()
        };
        (update, completed)
    }

    pub(crate) fn on_deadline(&mut self, cycle: u64) -> Option<(u64, Vec<ComponentName>)> {
        let done = self.lookups.expire(cycle)?;
        Some(self.rank(done))
    }

    /// The selector went away. Its handle is dropped and its pending
    /// selections are returned unanswered.
    pub(crate) fn on_disconnect(&mut self, component: &ComponentName, generation: u64) -> Vec<UnansweredSelection> {
        let Some(handle) = self.handles.get_mut(component) else {
            return Vec::new();
        };
        match handle.on_disconnect(generation) {
            Some(unanswered) => {
                self.handles.remove(component);
                unanswered
            }
            None => Vec::new(),
        }
    }

    /// Unbind every cached endpoint
    pub(crate) fn release_all(&mut self) {
        self.lookups.clear();
        for (_, mut handle) in self.handles.drain() {
            handle.release();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    fn rank(&self, done: CompletedCycle) -> (u64, Vec<ComponentName>) {
        let bound: Vec<ComponentName> = done
            .members
            .into_iter()
            .filter(|component| self.handles.get(component).is_some_and(|h| h.is_connected()))
            .collect();
        (done.cycle, rank_selectors(&bound, self.fallback.as_ref()))
    }
}
