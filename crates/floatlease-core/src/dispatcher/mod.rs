//! Notification dispatcher
//!
//! One background task per granted lease. It sleeps until the next renewal
//! deadline (or a shutdown signal, whichever comes first), renews through the
//! transport, applies the result through the state machine and delivers
//! notifications.
//!
//! ## Retry Policy
//!
//! Transient failures (connection, timeout, generic server failure) move the
//! lease to `Renewing` and are retried with exponential backoff. A retry is
//! only scheduled if it starts before the lease expires and the attempt
//! budget allows it. Otherwise the dispatcher waits out the remaining lease
//! time, expires the lease and stops. Terminal denials expire the lease at
//! once.
//!
//! ## Cancellation
//!
//! [`NotificationDispatcher::stop`] signals the task and joins it. Once it
//! returns, the task has exited and no callback runs anymore.
//!
//! ## Forbidden Capabilities
//! - ❌ Hold the state lock while calling the transport or a callback
//! - ❌ Raise renewal errors to the caller (they become events)

pub mod callback;
pub mod event;

pub use callback::CallbackRegistration;
pub use event::ClientEvent;

pub(crate) use callback::CallbackSlot;
pub(crate) use event::EventSink;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::lease::LeaseEventKind;
use crate::machine::{Generation, LeaseStateMachine, LeaseTerms};
use crate::traits::{LeaseGrant, LeaseRequest, LeaseTransport};

/// Everything the dispatcher task shares with the client
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub(crate) machine: Arc<LeaseStateMachine>,
    pub(crate) transport: Arc<dyn LeaseTransport>,
    pub(crate) request: LeaseRequest,
    pub(crate) callback: Arc<CallbackSlot>,
    pub(crate) events: EventSink,
    pub(crate) request_timeout: Duration,
}

impl DispatchContext {
    /// Deliver a notification to the callback and the event channel
    pub(crate) fn notify(&self, kind: LeaseEventKind) {
        debug!("Delivering {:?} notification", kind);
        if let Some(registration) = self.callback.get() {
            registration.invoke(kind);
        }
        self.events.emit(ClientEvent::Notification(kind));
    }
}

/// Handle to a running renewal task
#[derive(Debug)]
pub struct NotificationDispatcher {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Spawn the renewal task for the lease started in `generation`
    pub(crate) fn spawn(
        context: DispatchContext,
        generation: Generation,
        terms: LeaseTerms,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_renewals(context, generation, terms, shutdown_rx));
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already be gone
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("Notification dispatcher panicked: {}", e);
            }
        }
    }
}

async fn run_renewals(
    context: DispatchContext,
    generation: Generation,
    terms: LeaseTerms,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let policy = *context.machine.policy();
    let mut wake_at = terms.renew_at;
    let mut deadline = terms.deadline;
    let mut attempts: u32 = 0;

    debug!("Notification dispatcher started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Notification dispatcher stopped");
                return;
            }
            _ = tokio::time::sleep_until(wake_at) => {}
        }

        let Some(target) = context.machine.renewal_target(generation) else {
            debug!("Lease no longer held, dispatcher exiting");
            return;
        };
        let request = context.request.clone().with_lease_id(target.lease_id);

        let outcome = tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Notification dispatcher stopped during renewal");
                return;
            }
            result = tokio::time::timeout_at(
                (Instant::now() + context.request_timeout).min(deadline),
                context.transport.renew(&target.location, &request),
            ) => result.unwrap_or(Err(Error::ConnectionTimeout)),
        };
        let outcome = outcome.and_then(LeaseGrant::validate);

        match outcome {
            Ok(grant) => {
                attempts = 0;
                let Some(renewed) = context.machine.apply_renewal(generation, grant) else {
                    return;
                };
                wake_at = renewed.renew_at;
                deadline = renewed.deadline;

                context.events.emit(ClientEvent::LeaseRenewed {
                    expires_at: renewed.expires_at,
                    features_changed: renewed.features_changed,
                });
                if renewed.features_changed {
                    context.notify(LeaseEventKind::FeaturesChanged);
                }
            }
            Err(e) if e.is_transient() => {
                attempts += 1;
                if !context.machine.mark_renewing(generation) {
                    return;
                }

                let delay = policy.backoff(attempts);
                let retry_at = Instant::now() + delay;
                if retry_at < deadline && policy.allows_attempt(attempts) {
                    warn!(
                        "Renewal attempt {} failed: {}. Retrying in {:?}",
                        attempts, e, delay
                    );
                    context.events.emit(ClientEvent::RenewalFailed {
                        attempt: attempts,
                        error: e.to_string(),
                        next_attempt_in: Some(delay),
                    });
                    wake_at = retry_at;
                    continue;
                }

                warn!(
                    "Renewal attempt {} failed: {}. No retry fits before expiry",
                    attempts, e
                );
                context.events.emit(ClientEvent::RenewalFailed {
                    attempt: attempts,
                    error: e.to_string(),
                    next_attempt_in: None,
                });

                // The lease stays usable until it lapses
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Notification dispatcher stopped before expiry");
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                let kind = if e.is_network() {
                    LeaseEventKind::ExpiredNetwork
                } else {
                    LeaseEventKind::Expired
                };
                expire(&context, generation, kind);
                return;
            }
            Err(e) => {
                error!("Renewal denied: {}", e);
                expire(&context, generation, LeaseEventKind::Expired);
                return;
            }
        }
    }
}

fn expire(context: &DispatchContext, generation: Generation, kind: LeaseEventKind) {
    if context.machine.expire(generation) {
        info!("Lease lost ({:?})", kind);
        context.notify(kind);
    }
}
