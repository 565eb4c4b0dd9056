//! The FIFO that serializes connect and disconnect events.
//!
//! Connects and disconnects arrive from many connection tasks at once.
//! They all land here, in arrival order, and the coordinator pulls them
//! out one at a time, and only while no authentication is in flight.
//!
//! The queue is an unbounded tokio mpsc channel: producers get a cheap,
//! cloneable [`QueueHandle`] whose `enqueue` never waits, and the single
//! consumer polls with `try_recv` from inside its drive tick.

use tokio::sync::mpsc;

use crate::{AuthState, ConnectionOperation};

/// Producer side of the [`OperationQueue`].
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<ConnectionOperation>,
}

impl QueueHandle {
    /// Appends an operation to the tail of the queue.
    ///
    /// Never waits. If the queue itself has been dropped the operation
    /// is discarded, because nobody is left to process it.
    pub fn enqueue(&self, op: ConnectionOperation) {
        let peer = op.peer();
        let kind = op.kind().name();
        if self.tx.send(op).is_err() {
            tracing::debug!(%peer, kind, "operation queue closed, dropping operation");
        } else {
            tracing::trace!(%peer, kind, "operation enqueued");
        }
    }
}

/// Pending connect/disconnect operations, processed strictly in order.
#[derive(Debug)]
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<ConnectionOperation>,
    rx: mpsc::UnboundedReceiver<ConnectionOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Returns a producer handle for connection tasks.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.tx.clone(),
        }
    }

    /// Appends an operation to the tail of the queue.
    pub fn enqueue(&self, op: ConnectionOperation) {
        self.handle().enqueue(op);
    }

    /// Removes and returns the head of the queue, but only while `state`
    /// is [`AuthState::Idle`].
    ///
    /// While an authentication is pending the queue is frozen, which is
    /// what keeps a second connect (or a disconnect) from interleaving
    /// with the one in flight.
    pub fn try_dequeue_if_idle(
        &mut self,
        state: &AuthState,
    ) -> Option<ConnectionOperation> {
        if !state.is_idle() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Number of operations waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use turnstile_protocol::IdentityKey;
    use turnstile_transport::ConnectionId;

    use super::*;
    use crate::{ConnectRequest, OperationKind, PendingAuth};

    fn peer(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn authenticating() -> AuthState {
        AuthState::Authenticating(PendingAuth::new(
            1,
            peer(1),
            ConnectRequest {
                version: "1.0".into(),
                ticket: vec![1],
                identity_key: IdentityKey(1).to_wire().to_vec(),
                display_name: "ada".into(),
            },
            IdentityKey(1),
            Instant::now(),
        ))
    }

    #[test]
    fn test_try_dequeue_if_idle_returns_in_enqueue_order() {
        let mut queue = OperationQueue::new();
        for id in 1..=5 {
            queue.enqueue(ConnectionOperation::disconnect(peer(id)));
        }

        let order: Vec<u64> = std::iter::from_fn(|| {
            queue.try_dequeue_if_idle(&AuthState::Idle)
        })
        .map(|op| op.peer().into_inner())
        .collect();

        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_try_dequeue_if_idle_blocked_while_authenticating() {
        let mut queue = OperationQueue::new();
        queue.enqueue(ConnectionOperation::disconnect(peer(2)));

        assert!(queue.try_dequeue_if_idle(&authenticating()).is_none());
        assert_eq!(queue.len(), 1, "head must stay in place");

        let op = queue.try_dequeue_if_idle(&AuthState::Idle).unwrap();
        assert_eq!(op.peer(), peer(2));
    }

    #[test]
    fn test_try_dequeue_if_idle_empty_returns_none() {
        let mut queue = OperationQueue::new();
        assert!(queue.is_empty());
        assert!(queue.try_dequeue_if_idle(&AuthState::Idle).is_none());
    }

    #[test]
    fn test_handles_from_many_threads_all_arrive() {
        let mut queue = OperationQueue::new();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let handle = queue.handle();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        handle.enqueue(ConnectionOperation::disconnect(peer(t * 100 + i)));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let mut per_thread: Vec<Vec<u64>> = vec![Vec::new(); 4];
        while let Some(op) = queue.try_dequeue_if_idle(&AuthState::Idle) {
            assert_eq!(op.kind(), &OperationKind::Disconnect);
            let id = op.peer().into_inner();
            per_thread[(id / 100) as usize].push(id % 100);
        }

        // Each producer's operations come out in the order it sent them.
        for ids in per_thread {
            assert_eq!(ids, (0..25).collect::<Vec<_>>());
        }
    }
}
