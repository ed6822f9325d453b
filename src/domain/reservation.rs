use std::collections::HashMap;

use crate::domain::ids::{JobId, NodeName, ProcessGroupId};

/// State machine for a [`Reservation`] (§4.7):
///
/// `Unconfirmed` -> (forker callback) `Confirmed` -> (job end or release)
/// `Releasing` -> (bridge ack, claims=0) `Dead`.
/// `Unconfirmed` -> (missed extension) `Dead` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Unconfirmed,
    Confirmed,
    Releasing,
    Dead,
}

/// Mirrors one external placement-service allocation for a single job.
///
/// Invariant (testable property 2): `state == Confirmed` implies
/// `process_group_handle` is `Some`.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub allocation_id: String,
    pub jobid: JobId,
    pub nodes: Vec<NodeName>,
    pub state: ReservationState,
    /// While `Unconfirmed`, the bridge-side deadline by which this record
    /// must be extended or it is considered dead.
    pub expiration: i64,
    pub process_group_handle: Option<ProcessGroupId>,
}

impl Reservation {
    pub fn new_unconfirmed(allocation_id: impl Into<String>, jobid: JobId, nodes: Vec<NodeName>, expiration: i64) -> Self {
        Self { allocation_id: allocation_id.into(), jobid, nodes, state: ReservationState::Unconfirmed, expiration, process_group_handle: None }
    }

    pub fn confirm(&mut self, handle: ProcessGroupId) {
        self.process_group_handle = Some(handle);
        self.state = ReservationState::Confirmed;
    }

    pub fn mark_releasing(&mut self) {
        self.state = ReservationState::Releasing;
    }

    pub fn mark_dead(&mut self) {
        self.state = ReservationState::Dead;
    }

    pub fn is_dead(&self) -> bool {
        self.state == ReservationState::Dead
    }

    /// True once an unconfirmed record has passed its bridge-side deadline
    /// without being extended or confirmed.
    pub fn has_missed_extension(&self, now: i64) -> bool {
        self.state == ReservationState::Unconfirmed && now >= self.expiration
    }

    pub fn extend(&mut self, new_expiration: i64) {
        self.expiration = new_expiration;
    }
}

/// Keyed store of live [`Reservation`] records, one per job.
#[derive(Debug, Default)]
pub struct ReservationTable {
    by_jobid: HashMap<JobId, Reservation>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        self.by_jobid.insert(reservation.jobid.clone(), reservation);
    }

    pub fn get(&self, jobid: &JobId) -> Option<&Reservation> {
        self.by_jobid.get(jobid)
    }

    pub fn get_mut(&mut self, jobid: &JobId) -> Option<&mut Reservation> {
        self.by_jobid.get_mut(jobid)
    }

    pub fn remove(&mut self, jobid: &JobId) -> Option<Reservation> {
        self.by_jobid.remove(jobid)
    }

    pub fn values(&self) -> impl Iterator<Item = &Reservation> {
        self.by_jobid.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Reservation> {
        self.by_jobid.values_mut()
    }

    /// Drops every record in `Dead` state, releasing the table's hold on
    /// them. Called by the refresh loop after reconciling against the
    /// bridge (§4.7).
    pub fn sweep_dead(&mut self) {
        self.by_jobid.retain(|_, r| !r.is_dead());
    }
}
