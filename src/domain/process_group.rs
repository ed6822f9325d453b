use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::domain::ids::{JobId, NodeName, ProcessGroupId};

/// Lifecycle of a process-group record. The process-group *manager* only
/// ever observes these transitions through callbacks from the (external,
/// out of scope) forker; it never drives the underlying process itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessGroupState {
    Starting,
    Running,
    Signalled,
    Exited,
}

impl ProcessGroupState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessGroupState::Exited)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessGroupRecord {
    pub id: ProcessGroupId,
    pub jobid: JobId,
    pub nodes: Vec<NodeName>,
    /// The external process-group handle, set once the forker confirms a
    /// successful launch. A `Reservation` is only ever confirmed once this
    /// is `Some` (testable property 2).
    pub pgid: Option<String>,
    pub state: ProcessGroupState,
    pub pending_signal: Option<String>,
}

#[derive(Default)]
struct ManagerInner {
    records: HashMap<ProcessGroupId, ProcessGroupRecord>,
    next_id: u64,
}

/// Owns the table of process-group records. This replaces a global
/// mutable `process_groups` map: the table lives here, behind its own
/// lock, and is reached only through this component's methods — never the
/// fleet lock, since process-group bookkeeping and fleet/resource
/// bookkeeping have independent lifecycles.
#[derive(Clone)]
pub struct ProcessGroupManager {
    inner: Arc<Mutex<ManagerInner>>,
    notify: Arc<Notify>,
}

impl ProcessGroupManager {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(ManagerInner::default())), notify: Arc::new(Notify::new()) }
    }

    /// Creates a new record in `Starting` state for a confirmed placement's
    /// node list, returning the id the caller should track.
    pub fn add_process_group(&self, jobid: JobId, nodes: Vec<NodeName>) -> ProcessGroupId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = ProcessGroupId::new(format!("pg-{}", inner.next_id));

        inner.records.insert(
            id.clone(),
            ProcessGroupRecord { id: id.clone(), jobid, nodes, pgid: None, state: ProcessGroupState::Starting, pending_signal: None },
        );

        id
    }

    pub fn get_process_groups(&self, jobid: Option<&JobId>) -> Vec<ProcessGroupRecord> {
        let inner = self.inner.lock().unwrap();
        inner.records.values().filter(|r| jobid.is_none_or(|j| &r.jobid == j)).cloned().collect()
    }

    /// Called back by the forker once the user process group is actually
    /// running. Transitions `Starting -> Running` and stamps the external
    /// pgid; the caller is responsible for then calling
    /// [`crate::domain::reservation::Reservation::confirm`] on the matching
    /// reservation.
    pub fn confirm(&self, id: &ProcessGroupId, pgid: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(id) {
            Some(record) => {
                record.pgid = Some(pgid.into());
                record.state = ProcessGroupState::Running;
                true
            }
            None => false,
        }
    }

    /// Records the requested signal against the entry. Actually delivering
    /// it is the forker's responsibility; this just makes the intent
    /// observable through `get_process_groups`.
    pub fn signal_process_groups(&self, ids: &[ProcessGroupId], signal: impl Into<String>) -> usize {
        let signal = signal.into();
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;

        for id in ids {
            if let Some(record) = inner.records.get_mut(id) {
                record.pending_signal = Some(signal.clone());
                record.state = ProcessGroupState::Signalled;
                count += 1;
            }
        }

        count
    }

    pub fn mark_exited(&self, id: &ProcessGroupId) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(record) = inner.records.get_mut(id) {
                record.state = ProcessGroupState::Exited;
            }
        }
        self.notify.notify_waiters();
    }

    fn all_terminal(&self, ids: &[ProcessGroupId]) -> bool {
        let inner = self.inner.lock().unwrap();
        ids.iter().all(|id| inner.records.get(id).is_none_or(|r| r.state.is_terminal()))
    }

    /// Waits until every process group in `ids` has reached a terminal
    /// state. Cooperative: callers that need to give up early should race
    /// this future against a cancellation signal.
    pub async fn wait_process_groups(&self, ids: &[ProcessGroupId]) {
        while !self.all_terminal(ids) {
            let notified = self.notify.notified();
            if self.all_terminal(ids) {
                break;
            }
            notified.await;
        }
    }
}

impl Default for ProcessGroupManager {
    fn default() -> Self {
        Self::new()
    }
}
