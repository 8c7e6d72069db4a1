//! # Single-Shot Rendezvous Channel
//!
//! The inbox/outbox primitive for the impersonation handoff. A fresh
//! pair is created for every round (the sender is consumed by `send`,
//! the receiver by `recv`), so there is no reset step and no observer
//! racing one.
//!
//! `send` is the release side and `recv` the acquire side of the
//! handoff: the mutex hand-over orders everything the sender wrote
//! before `send` ahead of everything the receiver does after `recv`.
//!
//! `recv` blocks until the value arrives. The engine guarantees a sender
//! never disappears without sending (workers always deposit a result;
//! the pool always publishes a task or a shutdown signal), so there is
//! deliberately no disconnect error.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct Shared<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a connected single-shot pair.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Deposits the value and wakes the receiver. Consumes the sender.
    pub fn send(self, value: T) {
        let mut slot = self.shared.slot.lock();
        debug_assert!(slot.is_none(), "single-shot channel sent twice");
        *slot = Some(value);
        self.shared.ready.notify_one();
    }
}

impl<T> Receiver<T> {
    /// Blocks until the value arrives. Consumes the receiver.
    pub fn recv(self) -> T {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

}
