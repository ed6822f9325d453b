//! Tagged newtype identifiers.
//!
//! Mirrors the `Id<T>` phantom-tag pattern used throughout this family of
//! scheduling crates: a single generic wrapper carries the display/debug/
//! hashing behavior, and each identifier space gets its own zero-sized tag
//! so the compiler rejects mixing e.g. a `JobId` with a `NodeId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T> {
    pub id: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Id { id: id.into(), _marker: PhantomData }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_name = std::any::type_name::<T>();
        let clean_name = full_name.split("::").last().unwrap_or(full_name);
        write!(f, "{}({:?})", clean_name.trim_end_matches("Tag"), self.id)
    }
}

impl<T> From<Id<T>> for String {
    fn from(wrapper: Id<T>) -> Self {
        wrapper.id
    }
}

impl<T> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Id::new(value)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct NodeNameTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct JobTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct UserTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct QueueTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ReservationNameTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ProcessGroupTag;

pub type NodeName = Id<NodeNameTag>;
pub type JobId = Id<JobTag>;
pub type User = Id<UserTag>;
pub type Queue = Id<QueueTag>;
pub type AdminReservationName = Id<ReservationNameTag>;
pub type ProcessGroupId = Id<ProcessGroupTag>;

/// Stable integer id for a [`crate::domain::resource::Resource`], distinct
/// from its human-readable [`NodeName`]. `ResourceSet` keeps both in
/// lock-step (see the resolved open question in SPEC_FULL.md §9).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
