//! Per-call connection attempt state machine
//!
//! A [`ConnectionAttemptProcessor`] walks the selectors chosen for a call.
//! Each selector ranks the discovered providers; the processor then tries the
//! ranked providers one at a time until one creates the connection. When a
//! ranking runs dry it moves on to the next selector, skipping providers it
//! already tried. When the selectors run dry the call has failed with the
//! last failure seen.
//!
//! ```text
//!   Idle ──process──▶ Selecting(j) ──ranking──▶ Attempting(i) ──created──▶ Succeeded
//!                        ▲   │                     │    │
//!                        │   └──no selectors left──┼────┴──────────────▶ Exhausted
//!                        └──────ranking used up────┘
//!          abort / remote cancel from any live state ──────────────────▶ Aborted
//! ```
//!
//! The processor performs no I/O. Everything it needs done goes through an
//! [`AttemptDriver`], and every answer comes back in as a method call. This
//! lets the switchboard own the I/O and lets tests drive the processor with a
//! recording driver.
//!
//! Each connection attempt is tagged with a sequence number. Answers carrying
//! any other number are stale and ignored. Once an outcome is reported the
//! processor is done; an attempt still in flight at that point is handed back
//! by [`ConnectionAttemptProcessor::abandon`] so the owner can discard a
//! connection that gets created anyway.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::remote::ConnectionResult;
use crate::types::{
    Call, CallId, ComponentName, ConnectionDetails, FailureCause, ProviderDescriptor, ProviderId,
};

/// A selector consulted by a processor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SelectorRef {
    /// Built-in ranking for emergency destinations
    Emergency,
    Installed(ComponentName),
}

impl fmt::Display for SelectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorRef::Emergency => write!(f, "emergency"),
            SelectorRef::Installed(component) => write!(f, "{}", component),
        }
    }
}

/// Work the processor hands to its owner
pub(crate) trait AttemptDriver {
    /// Ask `selector` to rank `candidates`; the answer comes back through
    /// [`ConnectionAttemptProcessor::on_selection`]
    fn request_selection(&mut self, call_id: &CallId, selector: &SelectorRef, candidates: &[ProviderDescriptor]);

    /// Bind the provider behind `descriptor` and ask it to create the
    /// connection; the answer comes back through
    /// [`ConnectionAttemptProcessor::on_attempt_result`] tagged with `seq`
    fn start_attempt(&mut self, call_id: &CallId, seq: u64, descriptor: &ProviderDescriptor);

    /// Tell the provider behind `descriptor` to drop whatever it created
    /// for the call
    fn discard_connection(&mut self, call_id: &CallId, descriptor: &ProviderDescriptor);

    /// Attach the provider to the call, or detach it with `None`
    fn attach_provider(&mut self, call_id: &CallId, descriptor: Option<&ProviderDescriptor>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessorState {
    Idle,
    /// Waiting on selector `j`
    Selecting(usize),
    /// Waiting on candidate `i` of the current ranking
    Attempting(usize),
    Succeeded,
    Exhausted,
    Aborted,
}

/// How a call ended, reported once per processor
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProcessorOutcome {
    Succeeded {
        details: ConnectionDetails,
        /// Selector whose ranking produced the winning provider
        selector: Option<ComponentName>,
    },
    /// Every candidate of every selector failed
    Failed(FailureCause),
    /// The provider gave up on the call
    Canceled,
    Aborted,
}

/// A connection attempt handed to a provider
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub(crate) seq: u64,
    pub(crate) descriptor: ProviderDescriptor,
}

pub(crate) struct ConnectionAttemptProcessor {
    call_id: CallId,
    pinned_account: Option<ProviderId>,
    emergency: bool,
    /// Discovered providers, in discovery order
    providers: Vec<ProviderDescriptor>,
    selectors: Vec<SelectorRef>,
    next_selector: usize,
    active_selector: Option<SelectorRef>,
    candidates: Vec<ProviderDescriptor>,
    cursor: usize,
    attempted: HashSet<ProviderId>,
    current: Option<Attempt>,
    seq: u64,
    last_failure: Option<FailureCause>,
    response_pending: bool,
    state: ProcessorState,
}

impl ConnectionAttemptProcessor {
    pub(crate) fn new(
        call: &Call,
        providers: Vec<ProviderDescriptor>,
        selectors: Vec<SelectorRef>,
        emergency: bool,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            pinned_account: call.pinned_account.clone(),
            emergency,
            providers,
            selectors,
            next_selector: 0,
            active_selector: None,
            candidates: Vec::new(),
            cursor: 0,
            attempted: HashSet::new(),
            current: None,
            seq: 0,
            last_failure: None,
            response_pending: true,
            state: ProcessorState::Idle,
        }
    }

    /// Number attempts after `seq`, so that answers meant for an earlier
    /// processor of the same call never match this one
    pub(crate) fn resume_after(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub(crate) fn state(&self) -> ProcessorState {
        self.state
    }

    pub(crate) fn has_reported(&self) -> bool {
        !self.response_pending
    }

    /// True once the outcome was reported and no attempt is left in flight
    pub(crate) fn is_settled(&self) -> bool {
        !self.response_pending && self.current.is_none()
    }

    /// Give up the processor after its outcome was reported, returning the
    /// attempt that is still waiting on a provider
    pub(crate) fn abandon(self) -> Option<Attempt> {
        if self.response_pending {
            warn!("Abandoning call {} before it reported an outcome", self.call_id);
        }
        self.current
    }

    /// Whether an attempt tagged `seq` should still be carried out
    pub(crate) fn wants_attempt(&self, seq: u64) -> bool {
        self.response_pending && self.current.as_ref().is_some_and(|a| a.seq == seq)
    }

    /// Provider the in-flight attempt targets
    pub(crate) fn current_provider(&self) -> Option<&ProviderDescriptor> {
        self.current.as_ref().map(|a| &a.descriptor)
    }

    pub(crate) fn process(&mut self, driver: &mut dyn AttemptDriver) -> Option<ProcessorOutcome> {
        if self.state != ProcessorState::Idle {
            warn!("Processor for call {} already started", self.call_id);
            return None;
        }
        debug!(
            "Processing call {} with {} provider(s) and {} selector(s)",
            self.call_id,
            self.providers.len(),
            self.selectors.len()
        );
        self.select_next(driver)
    }

    /// A selector answered. `failure` is set when it could not rank at all.
    pub(crate) fn on_selection(
        &mut self,
        selector: &SelectorRef,
        ranked: Vec<ProviderDescriptor>,
        failure: Option<FailureCause>,
        driver: &mut dyn AttemptDriver,
    ) -> Option<ProcessorOutcome> {
        let expected = match self.state {
            ProcessorState::Selecting(j) => self.selectors.get(j),
            _ => None,
        };
        if !self.response_pending || expected != Some(selector) {
            debug!("Ignoring ranking from {} for call {} in state {:?}", selector, self.call_id, self.state);
            return None;
        }

        if let Some(failure) = failure {
            warn!("Selector {} could not rank call {}: {}", selector, self.call_id, failure);
            if self.last_failure.is_none() {
                self.last_failure = Some(failure);
            }
        }

        self.candidates = self.build_candidates(ranked);
        self.cursor = 0;
        self.active_selector = Some(selector.clone());
        debug!(
            "Call {} has {} candidate(s) from {}",
            self.call_id,
            self.candidates.len(),
            selector
        );
        self.attempt_next(driver)
    }

    /// A provider answered attempt `seq`
    pub(crate) fn on_attempt_result(
        &mut self,
        seq: u64,
        result: ConnectionResult,
        driver: &mut dyn AttemptDriver,
    ) -> Option<ProcessorOutcome> {
        let attempt = match &self.current {
            Some(attempt) if attempt.seq == seq => attempt.clone(),
            _ => {
                debug!("Ignoring stale attempt {} for call {}", seq, self.call_id);
                return None;
            }
        };
        if !self.response_pending {
            debug!("Ignoring attempt {} for call {} after its outcome", seq, self.call_id);
            return None;
        }
        self.current = None;

        match result {
            ConnectionResult::Created(details) => {
                info!("✅ Call {} connected through {}", self.call_id, attempt.descriptor.id);
                self.response_pending = false;
                self.state = ProcessorState::Succeeded;
                let selector = match &self.active_selector {
                    Some(SelectorRef::Installed(component)) => Some(component.clone()),
                    _ => None,
                };
                Some(ProcessorOutcome::Succeeded { details, selector })
            }
            ConnectionResult::Failed(cause) => {
                debug!("Provider {} failed call {}: {}", attempt.descriptor.id, self.call_id, cause);
                self.last_failure = Some(cause);
                self.attempt_next(driver)
            }
            ConnectionResult::Canceled => {
                info!("Provider {} canceled call {}", attempt.descriptor.id, self.call_id);
                self.response_pending = false;
                self.state = ProcessorState::Aborted;
                driver.attach_provider(&self.call_id, None);
                Some(ProcessorOutcome::Canceled)
            }
        }
    }

    /// The provider endpoint `component` went away
    pub(crate) fn provider_lost(
        &mut self,
        component: &ComponentName,
        driver: &mut dyn AttemptDriver,
    ) -> Option<ProcessorOutcome> {
        let Some(attempt) = self.current.as_ref().filter(|a| a.descriptor.component() == component) else {
            return None;
        };
        let seq = attempt.seq;
        let cause = FailureCause::provider_unavailable(format!("{} disconnected", component));
        self.on_attempt_result(seq, ConnectionResult::Failed(cause), driver)
    }

    /// Stop processing. Reports [`ProcessorOutcome::Aborted`] unless an
    /// outcome was already reported.
    pub(crate) fn abort(&mut self, driver: &mut dyn AttemptDriver) -> Option<ProcessorOutcome> {
        // Cleared first: a success landing from here on is discarded
        let was_pending = std::mem::replace(&mut self.response_pending, false);
        if !was_pending {
            return None;
        }

        if let Some(attempt) = &self.current {
            driver.discard_connection(&self.call_id, &attempt.descriptor);
        }
        driver.attach_provider(&self.call_id, None);

        info!("🛑 Aborted processing of call {} in state {:?}", self.call_id, self.state);
        self.state = ProcessorState::Aborted;
        Some(ProcessorOutcome::Aborted)
    }

    fn select_next(&mut self, driver: &mut dyn AttemptDriver) -> Option<ProcessorOutcome> {
        if !self.response_pending {
            return None;
        }

        let j = self.next_selector;
        let Some(selector) = self.selectors.get(j).cloned() else {
            return Some(self.exhaust(driver));
        };
        self.next_selector += 1;
        self.state = ProcessorState::Selecting(j);
        driver.request_selection(&self.call_id, &selector, &self.providers);
        None
    }

    fn attempt_next(&mut self, driver: &mut dyn AttemptDriver) -> Option<ProcessorOutcome> {
        if !self.response_pending {
            return None;
        }

        let i = self.cursor;
        let Some(descriptor) = self.candidates.get(i).cloned() else {
            return self.select_next(driver);
        };
        self.cursor += 1;
        self.seq += 1;
        self.attempted.insert(descriptor.id.clone());
        self.current = Some(Attempt {
            seq: self.seq,
            descriptor: descriptor.clone(),
        });
        self.state = ProcessorState::Attempting(i);

        debug!("Call {} attempt {} through {}", self.call_id, self.seq, descriptor.id);
        driver.attach_provider(&self.call_id, Some(&descriptor));
        driver.start_attempt(&self.call_id, self.seq, &descriptor);
        None
    }

    fn exhaust(&mut self, driver: &mut dyn AttemptDriver) -> ProcessorOutcome {
        let cause = self.last_failure.take().unwrap_or_else(FailureCause::unspecified);
        info!("❌ Call {} exhausted all candidates: {}", self.call_id, cause);
        self.response_pending = false;
        self.current = None;
        self.state = ProcessorState::Exhausted;
        driver.attach_provider(&self.call_id, None);
        ProcessorOutcome::Failed(cause)
    }

    fn build_candidates(&self, ranked: Vec<ProviderDescriptor>) -> Vec<ProviderDescriptor> {
        let mut list: Vec<ProviderDescriptor> = Vec::new();

        if let Some(pinned) = &self.pinned_account {
            if let Some(known) = self.providers.iter().find(|d| &d.id == pinned) {
                list.push(known.clone());
            }
        }

        for descriptor in ranked {
            let Some(known) = self.providers.iter().find(|d| d.id == descriptor.id) else {
                debug!("Dropping unknown candidate {} for call {}", descriptor.id, self.call_id);
                continue;
            };
            if !list.iter().any(|d| d.id == known.id) {
                list.push(known.clone());
            }
        }

        if self.emergency {
            list = self.providers.iter().filter(|d| d.is_pstn()).cloned().collect();
        }

        list.retain(|d| !self.attempted.contains(&d.id));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, ComponentName};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Select(SelectorRef),
        Attempt(u64, ProviderId),
        Discard(ProviderId),
        Attach(Option<ProviderId>),
    }

    #[derive(Default)]
    struct RecordingDriver {
        actions: Vec<Action>,
    }

    impl RecordingDriver {
        fn attempts(&self) -> Vec<(u64, ProviderId)> {
            self.actions
                .iter()
                .filter_map(|a| match a {
                    Action::Attempt(seq, id) => Some((*seq, id.clone())),
                    _ => None,
                })
                .collect()
        }

        fn discards(&self) -> Vec<ProviderId> {
            self.actions
                .iter()
                .filter_map(|a| match a {
                    Action::Discard(id) => Some(id.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl AttemptDriver for RecordingDriver {
        fn request_selection(&mut self, _call_id: &CallId, selector: &SelectorRef, _candidates: &[ProviderDescriptor]) {
            self.actions.push(Action::Select(selector.clone()));
        }

        fn start_attempt(&mut self, _call_id: &CallId, seq: u64, descriptor: &ProviderDescriptor) {
            self.actions.push(Action::Attempt(seq, descriptor.id.clone()));
        }

        fn discard_connection(&mut self, _call_id: &CallId, descriptor: &ProviderDescriptor) {
            self.actions.push(Action::Discard(descriptor.id.clone()));
        }

        fn attach_provider(&mut self, _call_id: &CallId, descriptor: Option<&ProviderDescriptor>) {
            self.actions.push(Action::Attach(descriptor.map(|d| d.id.clone())));
        }
    }

    fn provider(class: &str, caps: Capabilities) -> ProviderDescriptor {
        ProviderDescriptor::new(ProviderId::new(ComponentName::new("test.pkg", class), "0"), caps)
    }

    fn selector(class: &str) -> SelectorRef {
        SelectorRef::Installed(ComponentName::new("test.pkg", class))
    }

    fn created(descriptor: &ProviderDescriptor) -> ConnectionResult {
        ConnectionResult::Created(ConnectionDetails {
            provider: descriptor.clone(),
            handle: "5551234".to_string(),
            extras: HashMap::new(),
        })
    }

    fn failed(code: i32, message: &str) -> ConnectionResult {
        ConnectionResult::Failed(FailureCause::new(code, message))
    }

    fn processor(
        call: &Call,
        providers: &[ProviderDescriptor],
        selectors: Vec<SelectorRef>,
        emergency: bool,
    ) -> ConnectionAttemptProcessor {
        ConnectionAttemptProcessor::new(call, providers.to_vec(), selectors, emergency)
    }

    #[test]
    fn test_failure_then_success_reports_success() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        assert!(proc.process(&mut driver).is_none());
        assert_eq!(driver.actions, vec![Action::Select(selector("S"))]);

        assert!(proc
            .on_selection(&selector("S"), vec![p1.clone(), p2.clone()], None, &mut driver)
            .is_none());
        assert_eq!(proc.state(), ProcessorState::Attempting(0));

        assert!(proc.on_attempt_result(1, failed(7, "busy"), &mut driver).is_none());
        assert_eq!(proc.state(), ProcessorState::Attempting(1));

        let outcome = proc.on_attempt_result(2, created(&p2), &mut driver).unwrap();
        assert!(matches!(
            outcome,
            ProcessorOutcome::Succeeded { ref details, ref selector } if details.provider == p2
                && selector.as_ref().map(|s| s.class.as_str()) == Some("S")
        ));
        assert_eq!(driver.attempts(), vec![(1, p1.id.clone()), (2, p2.id.clone())]);
        assert!(proc.is_settled());
    }

    #[test]
    fn test_all_fail_reports_last_failure() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1, p2], None, &mut driver);
        proc.on_attempt_result(1, failed(7, "busy"), &mut driver);
        let outcome = proc.on_attempt_result(2, failed(3, "no service"), &mut driver);

        assert_eq!(outcome, Some(ProcessorOutcome::Failed(FailureCause::new(3, "no service"))));
        assert_eq!(proc.state(), ProcessorState::Exhausted);
        assert_eq!(driver.actions.last(), Some(&Action::Attach(None)));
    }

    #[test]
    fn test_nothing_attempted_reports_unspecified() {
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[provider("P1", Capabilities::empty())], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        let outcome = proc.on_selection(&selector("S"), Vec::new(), None, &mut driver);
        assert_eq!(outcome, Some(ProcessorOutcome::Failed(FailureCause::unspecified())));
    }

    #[test]
    fn test_emergency_uses_pstn_in_discovery_order() {
        let voip = provider("Voip", Capabilities::VIDEO);
        let sim1 = provider("Sim1", Capabilities::PSTN);
        let sim2 = provider("Sim2", Capabilities::PSTN);
        let call = Call::outgoing("911");
        let providers = [sim1.clone(), voip.clone(), sim2.clone()];
        let mut proc = processor(&call, &providers, vec![SelectorRef::Emergency, selector("S")], true);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        assert_eq!(driver.actions, vec![Action::Select(SelectorRef::Emergency)]);

        // Whatever order the ranking has, only PSTN in discovery order is used
        proc.on_selection(&SelectorRef::Emergency, vec![voip.clone(), sim2.clone(), sim1.clone()], None, &mut driver);
        proc.on_attempt_result(1, failed(7, "busy"), &mut driver);
        proc.on_attempt_result(2, failed(8, "busy"), &mut driver);

        // Next selector: everything PSTN was already tried
        assert_eq!(driver.actions.last(), Some(&Action::Select(selector("S"))));
        let outcome = proc.on_selection(&selector("S"), vec![voip.clone(), sim1.clone()], None, &mut driver);

        assert_eq!(driver.attempts(), vec![(1, sim1.id.clone()), (2, sim2.id.clone())]);
        assert_eq!(outcome, Some(ProcessorOutcome::Failed(FailureCause::new(8, "busy"))));
    }

    #[test]
    fn test_pinned_account_goes_first() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234").with_pinned_account(p2.id.clone());
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1.clone(), p2.clone()], None, &mut driver);
        proc.on_attempt_result(1, failed(7, "busy"), &mut driver);

        assert_eq!(driver.attempts(), vec![(1, p2.id.clone()), (2, p1.id.clone())]);
    }

    #[test]
    fn test_unknown_ranked_candidates_dropped() {
        let p1 = provider("P1", Capabilities::empty());
        let stranger = provider("Stranger", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![stranger, p1.clone()], None, &mut driver);
        assert_eq!(driver.attempts(), vec![(1, p1.id.clone())]);
    }

    #[test]
    fn test_abort_hands_back_attempt_in_flight() {
        let p1 = provider("P1", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1.clone()], None, &mut driver);

        assert_eq!(proc.abort(&mut driver), Some(ProcessorOutcome::Aborted));
        assert_eq!(driver.discards(), vec![p1.id.clone()]);
        // Second abort reports nothing
        assert_eq!(proc.abort(&mut driver), None);

        // A success landing now is not reported
        assert_eq!(proc.on_attempt_result(1, created(&p1), &mut driver), None);
        assert!(proc.has_reported());
        assert!(!proc.is_settled());
        assert_eq!(proc.state(), ProcessorState::Aborted);

        let attempt = proc.abandon().unwrap();
        assert_eq!(attempt.seq, 1);
        assert_eq!(attempt.descriptor, p1);
    }

    #[test]
    fn test_resumed_numbering_skips_earlier_attempts() {
        let p1 = provider("P1", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone()], vec![selector("S")], false).resume_after(4);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1.clone()], None, &mut driver);
        assert_eq!(driver.attempts(), vec![(5, p1.id.clone())]);
        assert!(proc.on_attempt_result(1, created(&p1), &mut driver).is_none());
        assert!(proc.wants_attempt(5));
    }

    #[test]
    fn test_remote_cancel_reported_once() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1, p2], None, &mut driver);

        assert_eq!(
            proc.on_attempt_result(1, ConnectionResult::Canceled, &mut driver),
            Some(ProcessorOutcome::Canceled)
        );
        assert_eq!(proc.abort(&mut driver), None);
        assert_eq!(driver.attempts().len(), 1);
    }

    #[test]
    fn test_stale_answers_ignored() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        // Ranking from a selector that was not asked
        assert!(proc.on_selection(&selector("Other"), vec![p1.clone()], None, &mut driver).is_none());
        assert_eq!(proc.state(), ProcessorState::Selecting(0));

        proc.on_selection(&selector("S"), vec![p1.clone(), p2.clone()], None, &mut driver);
        proc.on_attempt_result(1, failed(7, "busy"), &mut driver);

        // Late answer for attempt 1
        assert!(proc.on_attempt_result(1, created(&p1), &mut driver).is_none());
        assert_eq!(proc.current_provider(), Some(&p2));
        assert!(proc.wants_attempt(2));
        assert!(!proc.wants_attempt(1));
    }

    #[test]
    fn test_lost_provider_counts_as_failure() {
        let p1 = provider("P1", Capabilities::empty());
        let p2 = provider("P2", Capabilities::empty());
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[p1.clone(), p2.clone()], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        proc.on_selection(&selector("S"), vec![p1.clone(), p2.clone()], None, &mut driver);

        assert!(proc.provider_lost(p2.component(), &mut driver).is_none());
        assert_eq!(driver.attempts().len(), 1);

        proc.provider_lost(p1.component(), &mut driver);
        assert_eq!(driver.attempts(), vec![(1, p1.id.clone()), (2, p2.id.clone())]);
    }

    #[test]
    fn test_selector_failure_reported_when_nothing_else_failed() {
        let call = Call::outgoing("5551234");
        let mut proc = processor(&call, &[provider("P1", Capabilities::empty())], vec![selector("S")], false);
        let mut driver = RecordingDriver::default();

        proc.process(&mut driver);
        let cause = FailureCause::new(crate::types::failure_codes::SELECTOR_UNAVAILABLE, "selector unavailable");
        let outcome = proc.on_selection(&selector("S"), Vec::new(), Some(cause.clone()), &mut driver);
        assert_eq!(outcome, Some(ProcessorOutcome::Failed(cause)));
    }
}
