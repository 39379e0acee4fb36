//! Bind/unbind lifecycle of one remote endpoint
//!
//! [`ServiceConnection`] is a pure state machine: it never spawns, sleeps or
//! talks to the catalog itself. Its owner (a registry entry or a selector
//! handle) asks it what to do and performs the I/O, then feeds completions
//! back in. This keeps the rules in one place:
//!
//! - callers that arrive while a bind is outstanding are queued and resolved
//!   together, all with the bound interface or all with the failure;
//! - `unbind()` before the bind lands records an abort intent, so a bind that
//!   succeeds afterwards is torn down without ever being handed out, unless
//!   another `bind()` arrives first and cancels the intent;
//! - a remote disconnect is reported once per binding and never retried.
//!
//! Every bind carries a generation number so that completions and
//! disconnect signals from an earlier binding are recognised as stale.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, SwitchboardError};
use crate::events::SwitchboardEvent;
use crate::types::ComponentName;

/// What the owner has to do after [`ServiceConnection::bind`]
pub(crate) enum BindRequest<T: ?Sized, W> {
    /// Already connected; the waiter can proceed in the same turn
    Ready(W, Arc<T>),
    /// A bind is outstanding; the waiter was queued behind it
    Queued,
    /// The waiter was queued and a new platform bind must be started
    Start(u64),
}

/// What the owner has to do after [`ServiceConnection::complete_bind`]
pub(crate) enum BindOutcome<T: ?Sized, W> {
    /// Completion for a binding that is no longer current
    Stale,
    Connected { service: Arc<T>, waiters: Vec<W> },
    Failed { waiters: Vec<W>, error: SwitchboardError },
    /// Bound after `unbind()` was requested; release it, fail the waiters
    TornDown { service: Arc<T>, waiters: Vec<W> },
}

enum State<T: ?Sized> {
    Idle,
    Binding { generation: u64 },
    Connected { generation: u64, service: Arc<T> },
}

/// Connection state for one remote endpoint of interface `T`, with queued
/// callers of type `W`
pub(crate) struct ServiceConnection<T: ?Sized, W> {
    component: ComponentName,
    state: State<T>,
    waiters: Vec<W>,
    generation: u64,
    abort_requested: bool,
}

impl<T: ?Sized, W> ServiceConnection<T, W> {
    pub(crate) fn new(component: ComponentName) -> Self {
        Self {
            component,
            state: State::Idle,
            waiters: Vec::new(),
            generation: 0,
            abort_requested: false,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    #[cfg(test)]
    pub(crate) fn is_binding(&self) -> bool {
        matches!(self.state, State::Binding { .. })
    }

    /// The bound interface, if connected
    pub(crate) fn service(&self) -> Option<Arc<T>> {
        match &self.state {
            State::Connected { service, .. } => Some(service.clone()),
            _ => None,
        }
    }

    pub(crate) fn bind(&mut self, waiter: W) -> BindRequest<T, W> {
        match &self.state {
            State::Connected { service, .. } => BindRequest::Ready(waiter, service.clone()),
            State::Binding { .. } => {
                // A new caller wants the endpoint after all
                self.abort_requested = false;
                self.waiters.push(waiter);
                BindRequest::Queued
            }
            State::Idle => {
                self.generation += 1;
                self.abort_requested = false;
                self.state = State::Binding {
                    generation: self.generation,
                };
                self.waiters.push(waiter);
                debug!("Binding {} (generation {})", self.component, self.generation);
                BindRequest::Start(self.generation)
            }
        }
    }

    pub(crate) fn complete_bind(&mut self, generation: u64, result: Result<Arc<T>>) -> BindOutcome<T, W> {
        match self.state {
            State::Binding { generation: current } if current == generation => {}
            _ => return BindOutcome::Stale,
        }

        let waiters = std::mem::take(&mut self.waiters);
        match result {
            Ok(service) if self.abort_requested => {
                self.abort_requested = false;
                self.state = State::Idle;
                BindOutcome::TornDown { service, waiters }
            }
            Ok(service) => {
                self.state = State::Connected {
                    generation,
                    service: service.clone(),
                };
                BindOutcome::Connected { service, waiters }
            }
            Err(error) => {
                self.abort_requested = false;
                self.state = State::Idle;
                BindOutcome::Failed { waiters, error }
            }
        }
    }

    /// Release the connection.
    ///
    /// Returns the interface when one was bound so the owner can tell the
    /// catalog. Safe to call any number of times.
    pub(crate) fn unbind(&mut self) -> Option<Arc<T>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Connected { service, .. } => Some(service),
            State::Binding { generation } => {
                self.abort_requested = true;
                self.state = State::Binding { generation };
                None
            }
            State::Idle => None,
        }
    }

    /// The remote side went away. True only for the first signal of the
    /// current binding.
    pub(crate) fn handle_disconnect(&mut self, generation: u64) -> bool {
        match self.state {
            State::Connected { generation: current, .. } if current == generation => {
                self.state = State::Idle;
                true
            }
            _ => false,
        }
    }
}

/// Post `event` once `disconnected` resolves, whether the remote side
/// signalled or simply dropped its end.
pub(crate) fn watch_disconnect(
    disconnected: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SwitchboardEvent>,
    event: SwitchboardEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = disconnected.await;
        let _ = events.send(event);
    })
}
