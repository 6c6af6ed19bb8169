// # Client Events
//
// Every observable change of the lease is posted on a bounded channel that
// the embedding application drains. Callbacks are optional; the channel is
// always there.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::lease::LeaseEventKind;

/// Events emitted by the lease client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server granted a lease
    LeaseGranted {
        lease_id: Option<String>,
        expires_at: DateTime<Utc>,
    },

    /// A renewal succeeded
    LeaseRenewed {
        expires_at: DateTime<Utc>,
        features_changed: bool,
    },

    /// A renewal failed transiently
    RenewalFailed {
        attempt: u32,
        error: String,
        /// `None` when no retry fits before expiry
        next_attempt_in: Option<Duration>,
    },

    /// A notification was delivered (or would have been, without a callback)
    Notification(LeaseEventKind),

    /// The lease was released by the caller
    LeaseDropped,
}

/// Sending half of the client event channel
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<ClientEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the application drains
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Post an event without waiting
    pub(crate) fn emit(&self, event: ClientEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Event channel full, dropping {:?}. \
                     Consider increasing event_channel_capacity.",
                    event
                );
            }
            // Nobody is listening
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(ClientEvent::LeaseDropped);
        sink.emit(ClientEvent::Notification(LeaseEventKind::Expired));

        assert_eq!(rx.recv().await, Some(ClientEvent::LeaseDropped));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_is_ignored() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.emit(ClientEvent::LeaseDropped);
    }
}
