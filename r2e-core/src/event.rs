//! A minimal publish/subscribe signal used for `resource_added` notifications
//! and component startup events.
//!
//! There is no event replay: a subscriber only observes events published
//! after it calls [`Signal::subscribe`]. Callers that need to react to an
//! event that might already have happened must check the current state
//! first and subscribe before triggering whatever might produce it —
//! subscribe-then-act, not act-then-subscribe.

use tokio::sync::broadcast;

use crate::error::OrchestratorError;

/// A broadcast channel of events of type `E`, bounded to avoid unbounded
/// memory growth if a subscriber stops draining it.
pub struct Signal<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> Signal<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Signal { sender }
    }

    /// Publishes an event to all current subscribers. A no-op if nobody is
    /// listening.
    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> SignalReceiver<E> {
        SignalReceiver {
            inner: self.sender.subscribe(),
        }
    }
}

pub struct SignalReceiver<E> {
    inner: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> SignalReceiver<E> {
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // The supervisor treats overflow on its own stream as
                    // fatal (see orchestrator.rs); plain subscribers just
                    // skip ahead to the next event instead of erroring.
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Waits on one or more signals until `predicate` accepts an event, or until
/// every signal's sender has been dropped.
///
/// `signals` is typically the `resource_added` signal of every context in a
/// chain (self plus ancestors), so a wait started from a descendant observes
/// resources published anywhere up the tree.
pub async fn wait_event<E, F>(
    mut receivers: Vec<SignalReceiver<E>>,
    mut predicate: F,
) -> Result<E, OrchestratorError>
where
    E: Clone + Send + 'static,
    F: FnMut(&E) -> bool,
{
    use futures_util::stream::{FuturesUnordered, StreamExt};

    loop {
        if receivers.is_empty() {
            return Err(OrchestratorError::EventStreamClosed);
        }
        let mut futs: FuturesUnordered<_> = receivers
            .iter_mut()
            .enumerate()
            .map(|(i, r)| Box::pin(async move { (i, r.recv().await) }))
            .collect();

        let (idx, event) = match futs.next().await {
            Some(v) => v,
            None => return Err(OrchestratorError::EventStreamClosed),
        };
        drop(futs);

        match event {
            Some(event) if predicate(&event) => return Ok(event),
            Some(_) => continue,
            None => {
                receivers.remove(idx);
            }
        }
    }
}
