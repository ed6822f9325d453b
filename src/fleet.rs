//! The single exclusive fleet lock (§5): every piece of shared mutable
//! scheduling state — the [`ResourceSet`], the [`ReservationTable`], the
//! [`DrainTable`], and the cached equivalence classes — lives inside one
//! [`FleetState`] behind one lock, rather than each getting its own as the
//! teacher's per-store locking (`resource_store.rs`, `reservation_store.rs`)
//! would otherwise suggest. A multi-field scheduling decision (placement,
//! refresh reconciliation) needs all four consistent with each other, and
//! giving each its own lock can't provide that without a second, higher
//! lock anyway — so there is just the one.
//!
//! `tokio::sync::Mutex` rather than `std::sync::Mutex`: call sites never
//! hold the guard across a bridge `.await` (§5 forbids blocking I/O under
//! the lock), but using the async mutex means a future accidental await
//! while holding it is a compile-time-friendly `Send` bound, not a runtime
//! deadlock waiting to happen.
//!
//! This does not implement true reentrancy despite §5 calling the fleet
//! lock "recursive" — no call path in this crate re-enters it, so a plain
//! exclusive lock gives the same observable behavior (see DESIGN.md).

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::domain::drain_table::DrainTable;
use crate::domain::equivalence_class::EquivalenceClass;
use crate::domain::reservation::ReservationTable;
use crate::domain::resource_set::ResourceSet;

pub struct FleetState {
    pub resources: ResourceSet,
    pub reservations: ReservationTable,
    pub drain_table: DrainTable,
    pub equivalence_classes: Vec<EquivalenceClass>,
}

impl FleetState {
    pub fn new(resources: ResourceSet) -> Self {
        Self { resources, reservations: ReservationTable::new(), drain_table: DrainTable::new(), equivalence_classes: Vec::new() }
    }
}

/// A cheaply-cloneable handle to the fleet lock. Every facade operation
/// and the refresh loop hold one of these; cloning shares the same
/// underlying state.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<Mutex<FleetState>>,
}

impl Fleet {
    pub fn new(resources: ResourceSet) -> Self {
        Self { inner: Arc::new(Mutex::new(FleetState::new(resources))) }
    }

    /// Acquires the exclusive lock. Callers run their critical section to
    /// completion and drop the guard before any bridge RPC (§5 ordering
    /// guarantees).
    pub async fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.inner.lock().await
    }
}
