//! Candidate solutions proposed during a negotiation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::objective::Objective;
use crate::schedule::{OperationSchedule, ScheduleId};
use crate::sysconf::SystemConfig;

/// An immutable proposed joint solution: one schedule per known agent plus
/// the performance of the whole proposal.
///
/// Shares the identity discipline of [`SystemConfig`]: merges that change
/// nothing return the untouched left-hand `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    agent: String,
    idx: BTreeMap<String, usize>,
    cs: Array2<f64>,
    sids: Vec<ScheduleId>,
    perf: f64,
}

/// Row view for one agent of a candidate.
#[derive(Debug, Clone, Copy)]
pub struct CandidateRow<'a> {
    pub os: ArrayView1<'a, f64>,
    pub sid: ScheduleId,
}

impl Candidate {
    /// Build a candidate mirroring a system configuration, authored by
    /// `author`, scored with `objective`.
    pub fn from_sysconf(author: &str, sysconf: &SystemConfig, objective: &Objective) -> Arc<Self> {
        let cs = sysconf.cs().clone();
        let perf = objective.perf(&cs);
        Arc::new(Self {
            agent: author.to_owned(),
            idx: sysconf.idx().clone(),
            cs,
            sids: sysconf.sids().to_vec(),
            perf,
        })
    }

    /// Name of the agent that authored this candidate.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn idx(&self) -> &BTreeMap<String, usize> {
        &self.idx
    }

    pub fn cs(&self) -> &Array2<f64> {
        &self.cs
    }

    pub fn sids(&self) -> &[ScheduleId] {
        &self.sids
    }

    /// Performance score; higher is better.
    pub fn perf(&self) -> f64 {
        self.perf
    }

    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    /// Row data for `agent`, if this candidate covers it.
    pub fn data(&self, agent: &str) -> Option<CandidateRow<'_>> {
        let &row = self.idx.get(agent)?;
        Some(CandidateRow {
            os: self.cs.row(row),
            sid: self.sids[row],
        })
    }

    /// The schedule id assigned to `agent` by this candidate.
    pub fn sid_for(&self, agent: &str) -> Option<ScheduleId> {
        self.data(agent).map(|row| row.sid)
    }

    /// Merge `other` into `own` on behalf of `me`.
    ///
    /// - If `own`'s key set is a strict subset of `other`'s, `other` wins.
    /// - On equal key sets the better performance wins; an exact tie goes
    ///   to the lexicographically smaller author name.
    /// - If `other` knows agents `own` does not (and vice versa), a fresh
    ///   candidate authored by `me` covers the union, rows taken from
    ///   `own` where present, and is re-scored with `objective`.
    /// - Otherwise `own` is kept, untouched.
    pub fn merge(
        own: &Arc<Self>,
        other: &Arc<Self>,
        me: &str,
        objective: &Objective,
    ) -> Arc<Self> {
        let keys_own: BTreeSet<&str> = own.idx.keys().map(String::as_str).collect();
        let keys_other: BTreeSet<&str> = other.idx.keys().map(String::as_str).collect();

        let merged = if keys_own.is_subset(&keys_other) && keys_own.len() < keys_other.len() {
            Arc::clone(other)
        } else if keys_own == keys_other {
            if other.perf > own.perf || (other.perf == own.perf && other.agent < own.agent) {
                Arc::clone(other)
            } else {
                Arc::clone(own)
            }
        } else if keys_other.difference(&keys_own).next().is_some() {
            let names: Vec<&str> = keys_own.union(&keys_other).copied().collect();
            let intervals = own.cs.ncols();
            let mut idx = BTreeMap::new();
            let mut cs = Array2::zeros((names.len(), intervals));
            let mut sids = Vec::with_capacity(names.len());
            for (row, name) in names.iter().enumerate() {
                let data = own
                    .data(name)
                    .or_else(|| other.data(name))
                    .expect("agent present in neither merge side");
                idx.insert((*name).to_owned(), row);
                cs.row_mut(row).assign(&data.os);
                sids.push(data.sid);
            }
            let perf = objective.perf(&cs);
            Arc::new(Self {
                agent: me.to_owned(),
                idx,
                cs,
                sids,
                perf,
            })
        } else {
            Arc::clone(own)
        };

        // Equality with the left input must coincide with identity.
        debug_assert_eq!(*merged == **own, Arc::ptr_eq(&merged, own));
        merged
    }

    /// Clone with a new schedule for `agent` and the performance
    /// re-evaluated.
    pub fn update(
        &self,
        agent: &str,
        os: &OperationSchedule,
        sid: ScheduleId,
        objective: &Objective,
    ) -> Arc<Self> {
        let row = self.idx[agent];
        let mut next = self.clone();
        next.cs.row_mut(row).assign(os);
        next.sids[row] = sid;
        next.perf = objective.perf(&next.cs);
        Arc::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn objective() -> Objective {
        Objective::new(array![2.0, 2.0], array![1.0, 1.0])
    }

    fn candidate(author: &str, values: Vec<f64>, sid: u32) -> Arc<Candidate> {
        let sysconf =
            SystemConfig::seed(author, &ndarray::Array1::from(values), ScheduleId(sid));
        Candidate::from_sysconf(author, &sysconf, &objective())
    }

    #[test]
    fn self_merge_returns_the_same_instance() {
        let c = candidate("a", vec![1.0, 1.0], 0);
        let merged = Candidate::merge(&c, &c, "a", &objective());
        assert!(Arc::ptr_eq(&merged, &c));
    }

    #[test]
    fn strict_subset_adopts_the_larger_candidate() {
        let obj = objective();
        let small = candidate("a", vec![1.0, 1.0], 0);
        let big = Candidate::merge(&small, &candidate("b", vec![0.0, 0.0], 0), "b", &obj);
        assert_eq!(big.len(), 2);
        let merged = Candidate::merge(&small, &big, "a", &obj);
        assert!(Arc::ptr_eq(&merged, &big));
    }

    #[test]
    fn equal_keys_prefer_the_better_performance() {
        let obj = objective();
        let weak = candidate("a", vec![0.0, 0.0], 0);
        let strong_sysconf = SystemConfig::seed("a", &array![2.0, 2.0], ScheduleId(1));
        let strong = Candidate::from_sysconf("b", &strong_sysconf, &obj);
        let merged = Candidate::merge(&weak, &strong, "a", &obj);
        assert!(Arc::ptr_eq(&merged, &strong));
    }

    #[test]
    fn exact_ties_go_to_the_smaller_author_name() {
        let obj = objective();
        let sysconf = SystemConfig::seed("x", &array![1.0, 1.0], ScheduleId(0));
        let from_b = Candidate::from_sysconf("b", &sysconf, &obj);
        let from_a = Candidate::from_sysconf("a", &sysconf, &obj);
        assert_eq!(from_a.perf(), from_b.perf());

        let merged = Candidate::merge(&from_b, &from_a, "me", &obj);
        assert_eq!(merged.agent(), "a");
        let merged = Candidate::merge(&from_a, &from_b, "me", &obj);
        assert!(Arc::ptr_eq(&merged, &from_a));
    }

    #[test]
    fn partial_overlap_builds_a_union_authored_by_me() {
        let obj = objective();
        // "a"+"b" on one side, "b"+"c" on the other.
        let ab = Candidate::merge(
            &candidate("a", vec![1.0, 0.0], 0),
            &candidate("b", vec![0.0, 1.0], 0),
            "a",
            &obj,
        );
        let bc = Candidate::merge(
            &candidate("b", vec![0.5, 0.5], 1),
            &candidate("c", vec![1.0, 1.0], 0),
            "c",
            &obj,
        );
        let merged = Candidate::merge(&ab, &bc, "me", &obj);
        assert_eq!(merged.agent(), "me");
        let keys: Vec<&str> = merged.idx().keys().map(String::as_str).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        // Own rows take precedence over the other side's.
        assert_eq!(merged.data("b").unwrap().sid, ScheduleId(0));
        assert_eq!(merged.data("b").unwrap().os.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn update_rescores_the_candidate() {
        let obj = objective();
        let c = candidate("a", vec![0.0, 0.0], 0);
        let updated = c.update("a", &array![2.0, 2.0], ScheduleId(1), &obj);
        assert_eq!(updated.perf(), 0.0);
        assert_eq!(updated.sid_for("a"), Some(ScheduleId(1)));
        // The original is untouched.
        assert_eq!(c.sid_for("a"), Some(ScheduleId(0)));
    }
}
