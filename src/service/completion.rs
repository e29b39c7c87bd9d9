//! Single-slot, first-settle-wins completion.
//!
//! The run loop creates one [`Completion`] per run. The work task and the
//! lifecycle listener both hold clones; whichever settles first decides the
//! terminal result and every later settle is discarded without blocking.
//!
//! A settler that needs to do asynchronous work before it knows its value
//! (the kill hook) can [`Completion::claim`] the slot first, which locks out
//! every other settler while the work runs.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Shared handle to a completion slot.
pub struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Exclusive right to settle a completion, obtained via [`Completion::claim`].
#[must_use = "a dropped claim leaves the completion unsettled"]
pub struct Claim<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Completion<T> {
    /// A fresh slot and the receiver that yields its value.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Settle with `value`. Returns `false` if the slot was already settled
    /// or claimed, in which case `value` is dropped.
    pub fn settle(&self, value: T) -> bool {
        match self.claim() {
            Some(claim) => {
                claim.settle(value);
                true
            }
            None => false,
        }
    }

    /// Take exclusive ownership of the slot without settling it yet.
    pub fn claim(&self) -> Option<Claim<T>> {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.take().map(|sender| Claim {
            sender,
        })
    }

    /// Whether the slot has been settled or claimed.
    pub fn is_taken(&self) -> bool {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_none()
    }
}

impl<T> Claim<T> {
    /// Deliver the value. A receiver that is gone is ignored.
    pub fn settle(self, value: T) {
        let _ = self.sender.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_settle_wins() {
        let (completion, receiver) = Completion::new();
        assert!(completion.settle(1));
        assert!(!completion.settle(2));
        assert!(!completion.clone().settle(3));
        assert_eq!(receiver.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_blocks_other_settlers() {
        let (completion, receiver) = Completion::new();
        let claim = completion.claim().unwrap();
        assert!(completion.is_taken());
        assert!(!completion.settle("work"));
        assert!(completion.claim().is_none());
        claim.settle("kill");
        assert_eq!(receiver.await.unwrap(), "kill");
    }

    #[tokio::test]
    async fn test_settle_after_receiver_dropped_does_not_block() {
        let (completion, receiver) = Completion::new();
        drop(receiver);
        assert!(completion.settle(()));
        assert!(!completion.settle(()));
    }

    #[tokio::test]
    async fn test_concurrent_settlers_exactly_one_wins() {
        let (completion, receiver) = Completion::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let completion = completion.clone();
            handles.push(tokio::spawn(async move { completion.settle(i) }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(receiver.await.is_ok());
    }
}
