//! Request coalescing for cache misses
//!
//! Concurrent misses for the same cache digest share one transform: the
//! first registrant becomes the leader and the rest subscribe to its
//! result.
//!
//! ```text
//! Request A ─┐
//! Request B ─┼──► RequestCoalescer ──► [one transform] ──► A, B, C
//! Request C ─┘
//! ```
//!
//! Uses `DashMap` entries for atomic check-and-insert and a
//! `tokio::sync::broadcast` channel per in-flight key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Statistics for monitoring coalescing effectiveness
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total registrations
    pub total_requests: u64,
    /// Registrations that waited on an existing leader
    pub coalesced_requests: u64,
}

/// Tracks in-flight transforms keyed by cache digest
pub struct RequestCoalescer<T: Clone> {
    in_flight: DashMap<String, broadcast::Sender<T>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

/// Outcome of registering for a key
pub enum Flight<'a, T: Clone> {
    /// Caller must do the work and call [`FlightGuard::complete`]
    Leader(FlightGuard<'a, T>),
    /// Another request is doing the work; wait on the receiver
    Follower(broadcast::Receiver<T>),
}

impl<T: Clone> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
        }
    }

    /// Register interest in `key`.
    pub fn register(&self, key: &str) -> Flight<'_, T> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let rx = entry.get().subscribe();
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Coalescing request onto in-flight transform");
                Flight::Follower(rx)
            }
            Entry::Vacant(entry) => {
                // One result is ever sent per channel.
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Flight::Leader(FlightGuard {
                    coalescer: self,
                    key: key.to_string(),
                    sender: Some(tx),
                })
            }
        }
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn release(&self, key: &str, sender: &broadcast::Sender<T>) {
        self.in_flight
            .remove_if(key, |_, current| current.same_channel(sender));
    }
}

impl<T: Clone> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Leadership of one in-flight key.
///
/// Dropping the guard without completing closes the channel, and
/// followers see `RecvError::Closed`.
pub struct FlightGuard<'a, T: Clone> {
    coalescer: &'a RequestCoalescer<T>,
    key: String,
    sender: Option<broadcast::Sender<T>>,
}

impl<T: Clone> FlightGuard<'_, T> {
    /// Publish the result to every follower and release the key.
    pub fn complete(mut self, value: T) {
        if let Some(tx) = self.sender.take() {
            self.coalescer.release(&self.key, &tx);
            let waiters = tx.receiver_count();
            let _ = tx.send(value);
            if waiters > 0 {
                debug!(key = %self.key, waiters, "Broadcast transform result");
            }
        }
    }
}

impl<T: Clone> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(tx) = self.sender.take() {
            self.coalescer.release(&self.key, &tx);
            debug!(key = %self.key, "In-flight transform abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn first_registration_leads() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let flight = coalescer.register("k");
        assert!(matches!(flight, Flight::Leader(_)));
        assert_eq!(coalescer.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn followers_receive_leader_result() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();

        let leader = match coalescer.register("k") {
            Flight::Leader(guard) => guard,
            Flight::Follower(_) => panic!("expected leader"),
        };
        let mut rx = match coalescer.register("k") {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("expected follower"),
        };

        leader.complete(42);
        assert_eq!(rx.recv().await.unwrap(), 42);
        assert_eq!(coalescer.in_flight_count(), 0);
        assert_eq!(
            coalescer.stats(),
            CoalescerStats {
                total_requests: 2,
                coalesced_requests: 1
            }
        );
    }

    #[tokio::test]
    async fn dropped_leader_closes_channel() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();

        let leader = coalescer.register("k");
        let mut rx = match coalescer.register("k") {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("expected follower"),
        };

        drop(leader);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn key_is_reusable_after_completion() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();

        if let Flight::Leader(guard) = coalescer.register("k") {
            guard.complete(1);
        }
        assert!(matches!(coalescer.register("k"), Flight::Leader(_)));
    }

    #[test]
    fn distinct_keys_do_not_coalesce() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let _a = coalescer.register("a");
        assert!(matches!(coalescer.register("b"), Flight::Leader(_)));
    }
}
