use std::collections::HashMap;

use crate::domain::ids::{JobId, Queue, User};

/// A queued job description, consumed but never mutated by this core (§3).
/// Ordering by priority/score is the queue manager's responsibility; the
/// core only ever consumes the list in the order it is given.
#[derive(Debug, Clone)]
pub struct Job {
    pub jobid: JobId,
    pub user: User,
    pub queue: Queue,
    pub nodecount: usize,
    /// Requested walltime, in minutes.
    pub walltime_minutes: i64,
    pub score: i64,
    pub attrs: HashMap<String, String>,
}

impl Job {
    pub fn new(jobid: JobId, user: User, queue: Queue, nodecount: usize, walltime_minutes: i64, score: i64) -> Self {
        Self { jobid, user, queue, nodecount, walltime_minutes, score, attrs: HashMap::new() }
    }

    pub fn walltime_seconds(&self) -> i64 {
        self.walltime_minutes * 60
    }
}

/// Orders jobs score-descending, then jobid-ascending for equal scores
/// (§4.5 tie-break rule). Equal score *and* equal jobid is an invariant
/// violation the facade rejects before the placement engine ever sees it
/// (`Error::DataCreation`).
pub fn score_order(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.jobid.cmp(&b.jobid)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, score: i64) -> Job {
        Job::new(JobId::new(id), User::new("u"), Queue::new("default"), 1, 10, score)
    }

    #[test]
    fn higher_score_first_ties_broken_by_jobid() {
        let mut jobs = vec![job("3", 5), job("1", 10), job("2", 10)];
        score_order(&mut jobs);

        let ids: Vec<&str> = jobs.iter().map(|j| j.jobid.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
