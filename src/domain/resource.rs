use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::domain::ids::{JobId, NodeId, NodeName, User};
use crate::error::{Error, Result};

/// Lifecycle status of a single schedulable [`Resource`].
///
/// `Down` may only be entered through [`Resource::admin_set_status`]; the
/// placement engine and reservation controller never construct it, per the
/// invariant in SPEC_FULL.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    Idle,
    Allocated,
    Busy,
    Cleanup,
    CleanupPending,
    Down,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Idle => "idle",
            ResourceStatus::Allocated => "allocated",
            ResourceStatus::Busy => "busy",
            ResourceStatus::Cleanup => "cleanup",
            ResourceStatus::CleanupPending => "cleanup-pending",
            ResourceStatus::Down => "down",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ResourceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(ResourceStatus::Idle),
            "allocated" => Ok(ResourceStatus::Allocated),
            "busy" => Ok(ResourceStatus::Busy),
            "cleanup" => Ok(ResourceStatus::Cleanup),
            "cleanup-pending" => Ok(ResourceStatus::CleanupPending),
            "down" => Ok(ResourceStatus::Down),
            other => Err(Error::InvalidStatus { attempted: other.to_string() }),
        }
    }
}

/// A time-bounded claim on a [`Resource`] owned by a (user, jobid) pair.
///
/// A resource is "reserved" iff this is `Some`. Installed and cleared
/// atomically alongside the resource's status (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHold {
    pub owner_user: User,
    pub owner_jobid: JobId,
    pub until: i64,
}

/// One schedulable unit: a node, or on partitioned hardware a block that
/// may have parents/children in a nesting hierarchy.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: NodeName,
    pub id: NodeId,
    status: ResourceStatus,
    managed: bool,
    pub attributes: HashMap<String, String>,
    /// Queues this node serves. A node may serve more than one queue; the
    /// equivalence-class builder reads this to compute `Qₙ = n.queues ∩ Q`.
    pub queues: HashSet<crate::domain::ids::Queue>,
    hold: Option<ReservationHold>,
    pub parents: HashSet<NodeId>,
    pub children: HashSet<NodeId>,
    drain_until: Option<i64>,
    drain_jobid: Option<JobId>,
    drain_score: Option<i64>,
}

impl Resource {
    pub fn new(name: NodeName, id: NodeId, managed: bool) -> Self {
        Self {
            name,
            id,
            status: ResourceStatus::Idle,
            managed,
            attributes: HashMap::new(),
            queues: HashSet::new(),
            hold: None,
            parents: HashSet::new(),
            children: HashSet::new(),
            drain_until: None,
            drain_jobid: None,
            drain_score: None,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn is_reserved(&self) -> bool {
        self.hold.is_some()
    }

    pub fn hold(&self) -> Option<&ReservationHold> {
        self.hold.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.status == ResourceStatus::Idle && !self.is_reserved()
    }

    /// Installs a hold and sets status to `Allocated`. Re-reserving with the
    /// same (user, jobid) simply extends `until` (idempotent). A hold owned
    /// by a different (user, jobid) fails without mutating the resource.
    pub fn reserve(&mut self, until: i64, user: &User, jobid: &JobId) -> Result<()> {
        if !self.managed {
            return Err(Error::UnmanagedResource(self.name.clone()));
        }

        if let Some(existing) = &self.hold {
            if &existing.owner_user != user || &existing.owner_jobid != jobid {
                return Err(Error::ResourceReservationFailure {
                    node: self.name.clone(),
                    owner_user: existing.owner_user.as_str().to_string(),
                    owner_jobid: existing.owner_jobid.clone(),
                });
            }
        }

        self.hold = Some(ReservationHold { owner_user: user.clone(), owner_jobid: jobid.clone(), until });
        self.status = ResourceStatus::Allocated;
        self.clear_drain();
        Ok(())
    }

    pub fn drain_until(&self) -> Option<i64> {
        self.drain_until
    }

    pub fn drain_jobid(&self) -> Option<&JobId> {
        self.drain_jobid.as_ref()
    }

    /// Marks this node as draining for `jobid` by `until`, unless it is
    /// already draining for a job with an equal or higher score (§4.5:
    /// "overwriting earlier weaker drains only when j has higher score").
    pub fn mark_drain(&mut self, until: i64, jobid: JobId, score: i64) {
        let stronger = match self.drain_score {
            None => true,
            Some(existing) => score > existing,
        };

        if stronger {
            self.drain_until = Some(until);
            self.drain_jobid = Some(jobid);
            self.drain_score = Some(score);
        }
    }

    pub fn clear_drain(&mut self) {
        self.drain_until = None;
        self.drain_jobid = None;
        self.drain_score = None;
    }

    /// Clears the hold (ownership enforced unless `force` is set) and
    /// unconditionally sets status to `CleanupPending`, whether or not a
    /// hold was actually cleared. Returns `false` (and logs) if the
    /// resource was not reserved, or if release was denied for a
    /// mismatched owner.
    pub fn release(&mut self, user: &User, jobid: &JobId, force: bool) -> bool {
        let released = match &self.hold {
            None => {
                log::info!("release() called on unreserved resource {:?}; ignoring", self.name);
                false
            }
            Some(existing) => {
                if !force && (&existing.owner_user != user || &existing.owner_jobid != jobid) {
                    log::warn!(
                        "release() denied: {:?} is held by user={:?} jobid={:?}, not user={:?} jobid={:?}",
                        self.name,
                        existing.owner_user,
                        existing.owner_jobid,
                        user,
                        jobid
                    );
                    false
                } else {
                    self.hold = None;
                    self.clear_drain();
                    true
                }
            }
        };

        // The original system forces a cleanup transition on every call to
        // release(), whether or not a hold actually existed or was owned
        // by the caller — a resource is swept into cleanup regardless.
        self.status = ResourceStatus::CleanupPending;
        released
    }

    /// Sets status, rejecting anything outside the enumerated set and
    /// refusing to install `Down` (administrative action only, see
    /// [`Resource::admin_set_status`]).
    pub fn set_status(&mut self, status: ResourceStatus) -> Result<()> {
        if status == ResourceStatus::Down {
            return Err(Error::InvalidStatus { attempted: "down (requires admin_set_status)".to_string() });
        }
        self.status = status;
        Ok(())
    }

    /// Administrative status setter, the only path by which a resource may
    /// enter or leave `Down`. Used by the state-refresh loop and any
    /// operator-facing `update_node_state` call, never by the placement
    /// engine.
    pub fn admin_set_status(&mut self, status: ResourceStatus) {
        self.status = status;
    }

    /// Copies reservation fields from a prior instance, used on
    /// restart-from-persisted-state paths (§6.3) so a freshly constructed
    /// resource does not forget an in-flight hold.
    pub fn reset_info(&mut self, other: &Resource) {
        self.hold = other.hold.clone();
        self.status = other.status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Resource {
        Resource::new(NodeName::new("vs1"), NodeId(1), true)
    }

    #[test]
    fn release_forces_cleanup_pending_even_when_nothing_was_reserved() {
        let mut r = resource();
        assert!(!r.is_reserved());

        let released = r.release(&User::new("u"), &JobId::new("1"), false);

        assert!(!released);
        assert_eq!(r.status(), ResourceStatus::CleanupPending);
    }

    #[test]
    fn release_forces_cleanup_pending_when_denied_for_wrong_owner() {
        let mut r = resource();
        r.reserve(1000, &User::new("owner"), &JobId::new("1")).unwrap();

        let released = r.release(&User::new("someone-else"), &JobId::new("2"), false);

        assert!(!released);
        assert!(r.is_reserved(), "denied release must not clear the hold");
        assert_eq!(r.status(), ResourceStatus::CleanupPending);
    }

    #[test]
    fn release_succeeds_for_matching_owner() {
        let mut r = resource();
        r.reserve(1000, &User::new("owner"), &JobId::new("1")).unwrap();

        let released = r.release(&User::new("owner"), &JobId::new("1"), false);

        assert!(released);
        assert!(!r.is_reserved());
        assert_eq!(r.status(), ResourceStatus::CleanupPending);
    }
}
