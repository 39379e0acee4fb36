//! Lookup cycles: bounded scatter/gather rounds over one kind of endpoint
//!
//! A cycle starts with the endpoints discovered for it and the subset that
//! still has to answer. It finishes exactly once, either when the last
//! outstanding endpoint answers or when its deadline fires, and yields the
//! endpoints that are no longer outstanding, in discovery order. Several
//! cycles may be live at the same time; one answer settles that endpoint in
//! every live cycle waiting for it.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::SwitchboardEvent;
use crate::remote::ServiceKind;
use crate::types::ComponentName;

/// A finished cycle and the endpoints that answered in time
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompletedCycle {
    pub(crate) cycle: u64,
    pub(crate) members: Vec<ComponentName>,
}

struct LookupCycle {
    order: Vec<ComponentName>,
    outstanding: HashSet<ComponentName>,
    deadline: Option<JoinHandle<()>>,
}

impl LookupCycle {
    fn finish(self, cycle: u64) -> CompletedCycle {
        if let Some(deadline) = self.deadline {
            deadline.abort();
        }
        let outstanding = self.outstanding;
        CompletedCycle {
            cycle,
            members: self
                .order
                .into_iter()
                .filter(|component| !outstanding.contains(component))
                .collect(),
        }
    }
}

/// Live lookup cycles for one [`ServiceKind`]
pub(crate) struct LookupTracker {
    kind: ServiceKind,
    timeout: Duration,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    cycles: BTreeMap<u64, LookupCycle>,
}

impl LookupTracker {
    pub(crate) fn new(kind: ServiceKind, timeout: Duration, events: mpsc::UnboundedSender<SwitchboardEvent>) -> Self {
        Self {
            kind,
            timeout,
            events,
            cycles: BTreeMap::new(),
        }
    }

    /// Start a cycle. Completes on the spot when nothing is outstanding;
    /// otherwise arms the deadline.
    pub(crate) fn begin(
        &mut self,
        cycle: u64,
        order: Vec<ComponentName>,
        outstanding: HashSet<ComponentName>,
    ) -> Option<CompletedCycle> {
        let mut lookup = LookupCycle {
            order,
            outstanding,
            deadline: None,
        };

        if lookup.outstanding.is_empty() {
            debug!("{} lookup cycle {} complete without queries", self.kind, cycle);
            return Some(lookup.finish(cycle));
        }

        debug!(
            "{} lookup cycle {} waiting on {} endpoint(s)",
            self.kind,
            cycle,
            lookup.outstanding.len()
        );

        let events = self.events.clone();
        let kind = self.kind;
        let timeout = self.timeout;
        lookup.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(SwitchboardEvent::LookupDeadline { kind, cycle });
        }));

        self.cycles.insert(cycle, lookup);
        None
    }

    /// Whether any live cycle is still waiting on `component`
    pub(crate) fn is_outstanding(&self, component: &ComponentName) -> bool {
        self.cycles.values().any(|c| c.outstanding.contains(component))
    }

    /// `component` answered (or failed). Returns every cycle this finished.
    pub(crate) fn resolve(&mut self, component: &ComponentName) -> Vec<CompletedCycle> {
        let mut finished = Vec::new();
        for (id, cycle) in self.cycles.iter_mut() {
            if cycle.outstanding.remove(component) && cycle.outstanding.is_empty() {
                finished.push(*id);
            }
        }

        finished
            .into_iter()
            .filter_map(|id| self.cycles.remove(&id).map(|c| c.finish(id)))
            .collect()
    }

    /// The deadline of `cycle` fired. `None` if the cycle already finished.
    pub(crate) fn expire(&mut self, cycle: u64) -> Option<CompletedCycle> {
        let Some(mut lookup) = self.cycles.remove(&cycle) else {
            debug!("{} lookup cycle {} already complete at deadline", self.kind, cycle);
            return None;
        };

        for component in &lookup.outstanding {
            warn!(
                "⏰ {} {} did not answer lookup cycle {} within {:?}",
                self.kind, component, cycle, self.timeout
            );
        }
        // The timer task is the one calling us
        lookup.deadline = None;
        Some(lookup.finish(cycle))
    }

    /// Drop every live cycle without completing it
    pub(crate) fn clear(&mut self) {
        for (_, cycle) in std::mem::take(&mut self.cycles) {
            if let Some(deadline) = cycle.deadline {
                deadline.abort();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_cycles(&self) -> usize {
        self.cycles.len()
    }
}
