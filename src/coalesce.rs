//! Per-key load deduplication: `absent -> pending -> resident`.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::FeatureError;

struct Flight<V> {
    outcome: Mutex<Option<Result<V, FeatureError>>>,
    ready: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<V, FeatureError>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
    }

    /// `None` when the wait timed out.
    fn wait(&self, timeout: Option<Duration>) -> Option<Result<V, FeatureError>> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() && slot.is_none() {
                        return None;
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        slot.clone()
    }
}

enum Slot<V> {
    Pending(Arc<Flight<V>>),
    Resident(V),
}

struct State<K, V> {
    generation: u64,
    slots: HashMap<K, Slot<V>>,
}

enum Lookup<V> {
    Hit(V),
    Wait(Arc<Flight<V>>),
    Lead(Arc<Flight<V>>, u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub resident: usize,
    pub pending: usize,
    pub generation: u64,
}

pub struct Coalescer<K, V> {
    state: Mutex<State<K, V>>,
    wait_timeout: Option<Duration>,
}

impl<K, V> Default for Coalescer<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    fn default() -> Self {
        Self::new(None)
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    pub fn new(wait_timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(State {
                generation: 0,
                slots: HashMap::new(),
            }),
            wait_timeout,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        match self.state.lock().slots.get(key) {
            Some(Slot::Resident(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        matches!(self.state.lock().slots.get(key), Some(Slot::Resident(_)))
    }

    pub fn is_pending_or_resident(&self, key: &K) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// Returns the resident value for `key`, or runs `load` exactly once across all concurrent
    /// callers and shares its outcome.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<V, FeatureError>
    where
        F: FnOnce() -> Result<V, FeatureError>,
    {
        match self.lookup(key) {
            Lookup::Hit(value) => Ok(value),
            Lookup::Wait(flight) => {
                debug!(%key, "attaching to in-flight load");
                flight
                    .wait(self.wait_timeout)
                    .unwrap_or_else(|| {
                        Err(FeatureError::WaitTimedOut {
                            key: key.to_string(),
                        })
                    })
            }
            Lookup::Lead(flight, generation) => {
                let guard = LeadGuard {
                    owner: self,
                    key,
                    flight,
                    generation,
                    done: false,
                };
                let outcome = load();
                guard.finish(outcome)
            }
        }
    }

    fn lookup(&self, key: &K) -> Lookup<V> {
        let mut state = self.state.lock();
        match state.slots.get(key) {
            Some(Slot::Resident(value)) => Lookup::Hit(value.clone()),
            Some(Slot::Pending(flight)) => Lookup::Wait(Arc::clone(flight)),
            None => {
                let flight = Arc::new(Flight::new());
                state
                    .slots
                    .insert(key.clone(), Slot::Pending(Arc::clone(&flight)));
                Lookup::Lead(flight, state.generation)
            }
        }
    }

    // Only touch the slot if it still holds this flight.
    fn settle(
        &self,
        key: &K,
        flight: &Arc<Flight<V>>,
        generation: u64,
        outcome: &Result<V, FeatureError>,
    ) {
        let mut state = self.state.lock();
        let ours = matches!(
            state.slots.get(key),
            Some(Slot::Pending(current)) if Arc::ptr_eq(current, flight)
        );
        if !ours {
            debug!(
                %key,
                generation,
                current = state.generation,
                "discarding load from cleared generation"
            );
            return;
        }
        match outcome {
            Ok(value) => {
                state.slots.insert(key.clone(), Slot::Resident(value.clone()));
            }
            Err(_) => {
                state.slots.remove(key);
            }
        }
    }

    /// Drops a resident value. Pending loads are left alone.
    pub fn evict(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        match state.slots.remove(key) {
            Some(Slot::Resident(value)) => Some(value),
            Some(pending) => {
                state.slots.insert(key.clone(), pending);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) -> u64 {
        let mut state = self.state.lock();
        state.slots.clear();
        state.generation += 1;
        state.generation
    }

    pub fn stats(&self) -> CoalescerStats {
        let state = self.state.lock();
        let pending = state
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count();
        CoalescerStats {
            resident: state.slots.len() - pending,
            pending,
            generation: state.generation,
        }
    }
}

struct LeadGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    owner: &'a Coalescer<K, V>,
    key: &'a K,
    flight: Arc<Flight<V>>,
    generation: u64,
    done: bool,
}

impl<K, V> LeadGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    fn finish(mut self, outcome: Result<V, FeatureError>) -> Result<V, FeatureError> {
        self.owner
            .settle(self.key, &self.flight, self.generation, &outcome);
        self.flight.complete(outcome.clone());
        self.done = true;
        outcome
    }
}

impl<K, V> Drop for LeadGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let outcome = Err(FeatureError::LoadAbandoned {
            key: self.key.to_string(),
        });
        self.owner
            .settle(self.key, &self.flight, self.generation, &outcome);
        self.flight.complete(outcome);
    }
}
