//! Bounded hand-off from the detector to a notification consumer.
//!
//! The detector never waits on notification. When the buffer is full the
//! newest opportunity is dropped with a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::detector::OpportunityCallback;
use crate::types::ArbitrageOpportunity;

#[derive(Debug)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<ArbitrageOpportunity>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelNotifier {
    /// Creates a notifier with room for `buffer` pending opportunities.
    #[must_use]
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<ArbitrageOpportunity>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let notifier = Arc::new(Self {
            tx,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (notifier, rx)
    }

    /// Queues an opportunity without waiting. Returns false when it was dropped.
    pub fn notify(&self, opportunity: ArbitrageOpportunity) -> bool {
        match self.tx.try_send(opportunity) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(opportunity)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = %opportunity.external_id,
                    pair = %opportunity.pair(),
                    net_profit_percent = %opportunity.net_profit_percent(),
                    "Notification buffer full, opportunity dropped"
                );
                false
            }
            Err(TrySendError::Closed(opportunity)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(id = %opportunity.external_id, "Notification receiver closed");
                false
            }
        }
    }

    /// Adapts the notifier to the detector's callback signature.
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> OpportunityCallback {
        let notifier = Arc::clone(self);
        Arc::new(move |opportunity| {
            notifier.notify(opportunity);
        })
    }

    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
