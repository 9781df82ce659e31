//! Building blocks for optimistic mutations.
//!
//! A mutation takes a snapshot of local state, applies the change locally,
//! then settles against the server: commit on acknowledgement, or hand the
//! snapshot back for an exact rollback. [`MutationLanes`] serializes
//! mutations that target the same entity so settlements land in the order
//! the user acted, and [`InFlight`] exposes per-entity progress flags to
//! the UI.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("mutation already started")]
    AlreadyPending,
    #[error("no mutation in flight")]
    NotPending,
}

/// Lifecycle of one optimistic mutation. Begins idle, holds the rollback
/// snapshot while the remote call is out, and settles exactly once.
#[derive(Debug)]
pub enum Mutation<S> {
    Idle,
    Pending { snapshot: S },
    Settled,
}

impl<S> Mutation<S> {
    pub fn new() -> Self {
        Mutation::Idle
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Mutation::Pending { .. })
    }

    /// Capture the pre-mutation snapshot and enter `Pending`. The local
    /// optimistic write happens after this succeeds.
    pub fn begin(&mut self, snapshot: S) -> Result<(), TransitionError> {
        match self {
            Mutation::Idle => {
                *self = Mutation::Pending { snapshot };
                Ok(())
            }
            _ => Err(TransitionError::AlreadyPending),
        }
    }

    /// Server acknowledged; the optimistic state is now authoritative and
    /// the snapshot is discarded.
    pub fn commit(&mut self) -> Result<(), TransitionError> {
        match self {
            Mutation::Pending { .. } => {
                *self = Mutation::Settled;
                Ok(())
            }
            _ => Err(TransitionError::NotPending),
        }
    }

    /// Server rejected; hand the snapshot back so the caller can restore
    /// state to exactly what it was before `begin`.
    pub fn roll_back(&mut self) -> Result<S, TransitionError> {
        match std::mem::replace(self, Mutation::Settled) {
            Mutation::Pending { snapshot } => Ok(snapshot),
            other => {
                *self = other;
                Err(TransitionError::NotPending)
            }
        }
    }
}

impl<S> Default for Mutation<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// One async lock per entity key. Mutations for the same key queue up in
/// arrival order; mutations for different keys never wait on each other.
pub struct MutationLanes<K> {
    lanes: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> MutationLanes<K> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the lane. Holding the returned guard for the whole
    /// mutation, remote call included, is what gives per-key ordering.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap();
            Arc::clone(
                lanes
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lane.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for MutationLanes<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference-counted set of entities with a mutation in flight. The UI
/// reads it to dim a row or spin a toggle while its settlement is out.
#[derive(Debug)]
pub struct InFlight<K: Eq + Hash> {
    active: Arc<Mutex<HashMap<K, usize>>>,
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Raise the flag for `key` until the returned guard drops.
    pub fn begin(&self, key: K) -> InFlightGuard<K> {
        {
            let mut active = self.active.lock().unwrap();
            *active.entry(key.clone()).or_insert(0) += 1;
        }
        InFlightGuard {
            active: Arc::clone(&self.active),
            key,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.active.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().unwrap().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightGuard<K: Eq + Hash> {
    active: Arc<Mutex<HashMap<K, usize>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}
