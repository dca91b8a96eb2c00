use tokio::sync::mpsc;
use tracing::warn;

use crate::core::StateUpdate;

/// Producer side of the state update queue, owned by the protocol engine
#[derive(Debug, Clone)]
pub struct StateUpdateSink {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

/// Consumer side of the state update queue, drained by the controller layer
#[derive(Debug)]
pub struct StateUpdateStream {
    rx: mpsc::UnboundedReceiver<StateUpdate>,
}

/// Creates a connected sink/stream pair
pub fn state_channel() -> (StateUpdateSink, StateUpdateStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StateUpdateSink { tx }, StateUpdateStream { rx })
}

impl StateUpdateSink {
    /// Enqueues an update without blocking. Returns `false` if the consumer is gone.
    pub fn put(&self, update: StateUpdate) -> bool {
        match self.tx.send(update) {
            Ok(()) => true,
            Err(_) => {
                warn!(?update, "state update consumer is gone, dropping update");
                false
            }
        }
    }
}

impl StateUpdateStream {
    /// Waits for the next update. Returns `None` once every sink is dropped
    /// and the queue is drained.
    pub async fn take(&mut self) -> Option<StateUpdate> {
        self.rx.recv().await
    }

    /// Returns the next update if one is queued
    pub fn try_take(&mut self) -> Option<StateUpdate> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_updates_arrive_in_order() {
        let (sink, mut stream) = state_channel();
        assert!(sink.put(StateUpdate::new(1, 0)));
        assert!(sink.put(StateUpdate::new(1, 65535)));
        drop(sink);

        assert_eq!(stream.take().await, Some(StateUpdate::new(1, 0)));
        assert_eq!(stream.take().await, Some(StateUpdate::new(1, 65535)));
        assert_eq!(stream.take().await, None);
    }

    #[test]
    fn test_put_without_consumer() {
        let (sink, stream) = state_channel();
        drop(stream);
        assert!(!sink.put(StateUpdate::new(2, -1)));
    }
}
