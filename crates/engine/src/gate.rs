//! Global serialization gate
//!
//! At most one CA-facing operation runs at a time in the whole process.
//! The gate owns the "processing" flag and publishes every transition to
//! subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Capacity of the transition broadcast channel
const EVENT_CAPACITY: usize = 64;

/// Processing-state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Processing,
    Idle,
}

/// Process-wide mutual exclusion for certificate operations
#[derive(Debug)]
pub struct Gate {
    lock: Arc<Mutex<()>>,
    processing: AtomicBool,
    events: broadcast::Sender<GateEvent>,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            lock: Arc::new(Mutex::new(())),
            processing: AtomicBool::new(false),
            events,
        })
    }

    /// Wait until no other operation holds the gate, then take it
    pub async fn acquire(self: &Arc<Self>) -> GateGuard {
        trace!("Waiting for certificate operation gate");
        let permit = Arc::clone(&self.lock).lock_owned().await;

        self.processing.store(true, Ordering::SeqCst);
        // No subscribers is fine
        let _ = self.events.send(GateEvent::Processing);
        debug!("Certificate operation gate acquired");

        GateGuard {
            gate: Arc::clone(self),
            permit: Some(permit),
        }
    }

    /// Non-blocking read of the processing flag
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Receive every subsequent transition
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    fn finish(&self) {
        self.processing.store(false, Ordering::SeqCst);
        let _ = self.events.send(GateEvent::Idle);
        debug!("Certificate operation gate released");
    }
}

/// Held while an operation is inside the gate; releases on drop
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<Gate>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl GateGuard {
    /// Release explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            // Flag clears before the next waiter can acquire
            self.gate.finish();
            drop(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_release_flag() {
        let gate = Gate::new();
        assert!(!gate.is_processing());

        let guard = gate.acquire().await;
        assert!(gate.is_processing());

        guard.release();
        assert!(!gate.is_processing());
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let gate = Gate::new();
        let mut events = gate.subscribe();

        drop(gate.acquire().await);

        assert_eq!(events.recv().await.unwrap(), GateEvent::Processing);
        assert_eq!(events.recv().await.unwrap(), GateEvent::Idle);
    }

    #[tokio::test]
    async fn test_at_most_one_holder() {
        let gate = Gate::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!gate.is_processing());
    }
}
