//! The shared system configuration: who selected what, and when.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::schedule::{OperationSchedule, ScheduleId};

/// An immutable snapshot of the operation schedule every known agent is
/// believed to have selected, with a per-agent selection counter.
///
/// The counter is the only merge tie-breaker: a row may only be replaced
/// by a row carrying a strictly larger counter, and [`SystemConfig::update`]
/// increments it by exactly one. Instances are shared behind `Arc`s;
/// [`SystemConfig::merge`] hands back the untouched left-hand `Arc` when
/// the right-hand side contributes nothing, which makes `Arc::ptr_eq` a
/// reliable "unchanged" signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    idx: BTreeMap<String, usize>,
    cs: Array2<f64>,
    sids: Vec<ScheduleId>,
    cnt: Vec<u64>,
}

/// Row view for one agent: its schedule, the schedule's id and the
/// selection counter.
#[derive(Debug, Clone, Copy)]
pub struct SysconfRow<'a> {
    pub os: ArrayView1<'a, f64>,
    pub sid: ScheduleId,
    pub count: u64,
}

impl SystemConfig {
    /// Seed configuration containing only `agent` with the given schedule
    /// and a zero counter.
    pub fn seed(agent: &str, os: &OperationSchedule, sid: ScheduleId) -> Arc<Self> {
        let mut idx = BTreeMap::new();
        idx.insert(agent.to_owned(), 0);
        let cs = os.clone().insert_axis(Axis(0));
        Arc::new(Self {
            idx,
            cs,
            sids: vec![sid],
            cnt: vec![0],
        })
    }

    /// Mapping from agent name to row index. Keys iterate in the
    /// lexicographic order the merge uses to lay out rows.
    pub fn idx(&self) -> &BTreeMap<String, usize> {
        &self.idx
    }

    /// Cluster schedule: one row per known agent.
    pub fn cs(&self) -> &Array2<f64> {
        &self.cs
    }

    /// Schedule id per row.
    pub fn sids(&self) -> &[ScheduleId] {
        &self.sids
    }

    /// Selection counter per row.
    pub fn cnt(&self) -> &[u64] {
        &self.cnt
    }

    /// Number of agents in this snapshot.
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    pub fn intervals(&self) -> usize {
        self.cs.ncols()
    }

    /// Row data for `agent`, if this snapshot knows it.
    pub fn data(&self, agent: &str) -> Option<SysconfRow<'_>> {
        let &row = self.idx.get(agent)?;
        Some(SysconfRow {
            os: self.cs.row(row),
            sid: self.sids[row],
            count: self.cnt[row],
        })
    }

    /// Merge two snapshots.
    ///
    /// The result covers the union of both key sets, rows laid out in
    /// lexicographic agent order so every agent builds the same index map.
    /// A row from `other` wins only if its counter is strictly larger than
    /// the one `own` carries. When `other` contributes nothing the original
    /// `own` handle is returned unchanged.
    pub fn merge(own: &Arc<Self>, other: &Arc<Self>) -> Arc<Self> {
        debug_assert_eq!(own.intervals(), other.intervals());

        let mut names: Vec<&str> = own.idx.keys().map(String::as_str).collect();
        names.extend(other.idx.keys().map(String::as_str));
        names.sort_unstable();
        names.dedup();

        let mut modified = false;
        let mut idx = BTreeMap::new();
        let mut cs = Array2::zeros((names.len(), own.intervals()));
        let mut sids = Vec::with_capacity(names.len());
        let mut cnt = Vec::with_capacity(names.len());

        for (row, name) in names.iter().enumerate() {
            let mut data = own.data(name);
            if let Some(theirs) = other.data(name) {
                let newer = match data {
                    Some(ref ours) => theirs.count > ours.count,
                    None => true,
                };
                if newer {
                    modified = true;
                    data = Some(theirs);
                }
            }
            let data = data.expect("agent present in neither merge side");
            idx.insert((*name).to_owned(), row);
            cs.row_mut(row).assign(&data.os);
            sids.push(data.sid);
            cnt.push(data.count);
        }

        let merged = if modified {
            Arc::new(Self {
                idx,
                cs,
                sids,
                cnt,
            })
        } else {
            Arc::clone(own)
        };

        // Equality with the left input must coincide with identity.
        debug_assert_eq!(*merged == **own, Arc::ptr_eq(&merged, own));
        merged
    }

    /// Clone with a new schedule for `agent` and its counter bumped by one.
    ///
    /// `agent` must already be part of this snapshot; an unknown name is a
    /// programming error.
    pub fn update(&self, agent: &str, os: &OperationSchedule, sid: ScheduleId) -> Arc<Self> {
        let row = self.idx[agent];
        let mut next = self.clone();
        next.cs.row_mut(row).assign(os);
        next.sids[row] = sid;
        next.cnt[row] += 1;
        Arc::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sc(agent: &str, values: Vec<f64>, sid: u32) -> Arc<SystemConfig> {
        SystemConfig::seed(agent, &ndarray::Array1::from(values), ScheduleId(sid))
    }

    #[test]
    fn self_merge_returns_the_same_instance() {
        let a = sc("a", vec![1.0, 2.0], 0);
        let merged = SystemConfig::merge(&a, &a);
        assert!(Arc::ptr_eq(&merged, &a));
    }

    #[test]
    fn merge_unions_the_key_sets_in_order() {
        let a = sc("a", vec![1.0], 0);
        let b = sc("b", vec![2.0], 3);
        let merged = SystemConfig::merge(&a, &b);
        let keys: Vec<&str> = merged.idx().keys().map(String::as_str).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(merged.idx()["a"], 0);
        assert_eq!(merged.idx()["b"], 1);
        assert_eq!(merged.sids(), [ScheduleId(0), ScheduleId(3)]);
    }

    #[test]
    fn merge_keeps_own_rows_against_stale_counters() {
        let a = sc("a", vec![1.0], 0);
        let newer = a.update("a", &array![5.0], ScheduleId(1));
        // Merging the stale seed into the newer snapshot changes nothing.
        let merged = SystemConfig::merge(&newer, &a);
        assert!(Arc::ptr_eq(&merged, &newer));
        // The other direction adopts the newer row.
        let merged = SystemConfig::merge(&a, &newer);
        assert!(!Arc::ptr_eq(&merged, &a));
        assert_eq!(merged.data("a").unwrap().sid, ScheduleId(1));
        assert_eq!(merged.data("a").unwrap().count, 1);
    }

    #[test]
    fn merge_counters_never_decrease() {
        let a = sc("a", vec![1.0], 0);
        let a2 = a.update("a", &array![2.0], ScheduleId(1));
        let b = sc("b", vec![0.0], 0);
        let left = SystemConfig::merge(&a2, &b);
        let right = SystemConfig::merge(&a, &left);
        for agent in ["a", "b"] {
            let before = a.data(agent).map(|d| d.count).unwrap_or(0);
            let after = right.data(agent).unwrap().count;
            assert!(after >= before);
        }
        assert_eq!(right.data("a").unwrap().count, 1);
    }

    #[test]
    fn update_bumps_exactly_one_counter() {
        let a = sc("a", vec![1.0], 0);
        let b = sc("b", vec![2.0], 0);
        let merged = SystemConfig::merge(&a, &b);
        let updated = merged.update("a", &array![9.0], ScheduleId(7));
        assert_eq!(updated.data("a").unwrap().count, 1);
        assert_eq!(updated.data("b").unwrap().count, 0);
        assert_eq!(updated.data("a").unwrap().sid, ScheduleId(7));
        assert_eq!(updated.data("a").unwrap().os.to_vec(), vec![9.0]);
        // The source snapshot is untouched.
        assert_eq!(merged.data("a").unwrap().count, 0);
    }
}
