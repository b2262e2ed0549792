//! FIFO wait queue for fetches parked on a saturated pool
//!
//! Every parked fetch owns the receiving half of a oneshot channel. A
//! positive wake sends the id of the connection that was just returned to
//! the spare list. Dropping the sender (queue torn down) is a negative wake.

use std::collections::VecDeque;
use tokio::sync::oneshot;

use crate::connection::ConnectionId;

/// Receiving half held by a parked fetch
pub(crate) type WakeReceiver = oneshot::Receiver<ConnectionId>;

#[derive(Debug, Default)]
pub(crate) struct WaiterQueue {
    waiters: VecDeque<oneshot::Sender<ConnectionId>>,
}

impl WaiterQueue {
    /// Append a waiter at the back of the queue.
    pub(crate) fn park(&mut self) -> WakeReceiver {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Wake the oldest live waiter with `token`.
    ///
    /// Waiters whose receiver is gone are discarded on the way. Returns
    /// `false` when no live waiter was left to take the token.
    pub(crate) fn notify_one(&mut self, token: ConnectionId) -> bool {
        while let Some(tx) = self.waiters.pop_front() {
            if tx.send(token).is_ok() {
                return true;
            }
        }
        false
    }

    /// Drop every sender; all parked receivers observe a negative wake.
    pub(crate) fn close(&mut self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}
