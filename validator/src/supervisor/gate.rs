//! In-flight validation request tracking.
//!
//! - Counts validation calls currently talking to the worker.
//! - A stop or restart bumps the abort generation so those calls fail fast
//!   instead of waiting on a worker that is going away.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Notify;

/// Gate shared between the supervisor and the validation client.
#[derive(Clone, Debug, Default)]
pub struct RequestGate {
    inner: Arc<RequestGateInner>,
}

#[derive(Debug, Default)]
struct RequestGateInner {
    in_flight: AtomicUsize,
    abort_generation: AtomicU64,
    abort_notify: Notify,
}

impl RequestGate {
    /// Return current in-flight request count.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Increment the abort generation and wake every in-flight request.
    pub fn abort_in_flight(&self) {
        self.inner.abort_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_notify.notify_waiters();
    }

    /// Register a request. The ticket releases its slot on drop.
    pub fn begin(&self) -> RequestTicket {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestTicket {
            gate: self.clone(),
            generation: self.abort_generation(),
        }
    }

    fn finish(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn abort_generation(&self) -> u64 {
        self.inner.abort_generation.load(Ordering::SeqCst)
    }
}

/// Registration of one in-flight validation call.
#[derive(Debug)]
pub struct RequestTicket {
    gate: RequestGate,
    generation: u64,
}

impl RequestTicket {
    /// True once a stop or restart happened after this ticket was issued.
    pub fn is_aborted(&self) -> bool {
        self.gate.abort_generation() != self.generation
    }

    /// Resolves when the ticket is aborted.
    pub async fn aborted(&self) {
        loop {
            let notified = self.gate.inner.abort_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        self.gate.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ticket_tracks_in_flight_count() {
        let gate = RequestGate::default();
        let first = gate.begin();
        let second = gate.begin();
        assert_eq!(gate.in_flight(), 2);

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        drop(second);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn abort_wakes_waiting_ticket() {
        let gate = RequestGate::default();
        let ticket = gate.begin();
        assert!(!ticket.is_aborted());

        let waiter = tokio::spawn(async move {
            ticket.aborted().await;
            ticket.is_aborted()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.abort_in_flight();

        let aborted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ticket was not woken")
            .expect("waiter panicked");
        assert!(aborted);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn tickets_issued_after_abort_are_live() {
        let gate = RequestGate::default();
        gate.abort_in_flight();
        let ticket = gate.begin();
        assert!(!ticket.is_aborted());
    }
}
