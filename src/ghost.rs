//! Ghost machinery: which remote vector entries this rank's rows touch, the
//! reusable exchange plan negotiated with the peers, the per-iteration
//! two-phase value exchange, and the branch-free column classification the
//! kernel indexes with.
//!
//! The plan is built exactly once per run. Its `ghost_cols` ordering
//! (grouped by owning rank, ascending inside each group) is the contract
//! that lets every later exchange be addressed positionally with no
//! re-sorting: peers learn each iteration exactly which entries are wanted,
//! in an order both sides already agree on.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::comm::RankComm;
use crate::distribute::{local_offset, owner_of};
use crate::error::{Error, Result};
use crate::Vector;

/// Reusable communication plan for one rank: the flattened remote columns
/// this rank needs, a reverse map from column to its slot, and the
/// count/displacement tables for the two variable-length collectives.
/// Immutable after construction; the matrix topology is static.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostPlan {
    /// Remote columns, grouped by owning rank, ascending within each group,
    /// duplicate-free.
    pub ghost_cols: Vec<usize>,
    ghost_pos: HashMap<usize, usize>,
    /// Requests we send: `send_counts[p]` columns go to rank `p`.
    send_counts: Vec<usize>,
    send_displs: Vec<usize>,
    /// Requests that arrive: `recv_counts[p]` columns come from rank `p`.
    recv_counts: Vec<usize>,
    recv_displs: Vec<usize>,
}

impl GhostPlan {
    pub fn ghost_count(&self) -> usize {
        self.ghost_cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghost_cols.is_empty()
    }

    /// Slot of `col` in `ghost_cols`, if it is a ghost of this rank.
    pub fn position(&self, col: usize) -> Option<usize> {
        self.ghost_pos.get(&col).copied()
    }
}

fn prefix_sums(counts: &[usize]) -> Vec<usize> {
    let mut displs = Vec::with_capacity(counts.len() + 1);
    displs.push(0);
    for &c in counts {
        displs.push(displs.last().unwrap() + c);
    }
    displs
}

/// Scan this rank's nonzero columns and negotiate the exchange plan with
/// every peer. One all-to-all of scalar counts tells each rank how many
/// requests to expect from whom; the displacement tables for both
/// directions fall out as prefix sums. Construction is paid once and
/// amortized over every iteration.
///
/// A column outside `[0, n)` means the shards no longer agree on the
/// problem shape, which poisons every collective's sizing; it is reported
/// as unrecoverable corruption.
pub fn build_ghost_plan(comm: &RankComm, n: usize, col_idx: &[usize]) -> Result<GhostPlan> {
    let rank = comm.rank();
    let nprocs = comm.nprocs();

    let mut needed: Vec<IndexSet<usize>> = vec![IndexSet::new(); nprocs];
    for &j in col_idx {
        if j >= n {
            return Err(Error::DataCorruption {
                rank,
                detail: format!("column {j} is outside the declared bounds [0, {n})"),
            });
        }
        let owner = owner_of(j, nprocs);
        if owner != rank {
            needed[owner].insert(j);
        }
    }
    for set in needed.iter_mut() {
        set.sort();
    }

    let send_counts: Vec<usize> = needed.iter().map(|set| set.len()).collect();
    let recv_counts = comm.all_to_all(&send_counts)?;
    let send_displs = prefix_sums(&send_counts);
    let recv_displs = prefix_sums(&recv_counts);

    let ghost_cols: Vec<usize> = needed.into_iter().flatten().collect();
    let ghost_pos: HashMap<usize, usize> =
        ghost_cols.iter().enumerate().map(|(pos, &col)| (col, pos)).collect();
    trace!(
        "rank {rank}: ghost plan with {} columns from {} peers",
        ghost_cols.len(),
        send_counts.iter().filter(|&&c| c > 0).count()
    );

    Ok(GhostPlan {
        ghost_cols,
        ghost_pos,
        send_counts,
        send_displs,
        recv_counts,
        recv_displs,
    })
}

/// Fetch the current values of every ghost column. Two collectives per
/// call, both sized by the plan:
///
/// 1. request phase: `ghost_cols` segments travel to their owning ranks,
///    so each peer learns which of its entries are wanted this iteration
///    without recomputing any grouping;
/// 2. response phase: each received column resolves arithmetically to a
///    local offset, the values are packed in request order, and the same
///    collective runs with the send/receive tables swapped.
///
/// The result is always aligned index-for-index with `plan.ghost_cols`, so
/// the compute kernel never performs a lookup at run time. Every rank must
/// participate in both phases; the call blocks until the group is done.
pub fn exchange_ghost_values(
    comm: &RankComm,
    plan: &GhostPlan,
    local_x: &Vector,
) -> Result<Vec<f64>> {
    let rank = comm.rank();
    let nprocs = comm.nprocs();

    let requests = comm.all_to_allv(
        &plan.ghost_cols,
        &plan.send_counts,
        &plan.send_displs,
        &plan.recv_counts,
        &plan.recv_displs,
    )?;

    let mut reply = Vec::with_capacity(requests.len());
    for &j in &requests {
        if owner_of(j, nprocs) != rank {
            return Err(Error::DataCorruption {
                rank,
                detail: format!("asked for column {j}, which this rank does not own"),
            });
        }
        let offset = local_offset(j, rank, nprocs);
        if offset >= local_x.len() {
            return Err(Error::DataCorruption {
                rank,
                detail: format!(
                    "column {j} resolves to offset {offset} in a vector of length {}",
                    local_x.len()
                ),
            });
        }
        reply.push(local_x[offset]);
    }

    let ghost_values = comm.all_to_allv(
        &reply,
        &plan.recv_counts,
        &plan.recv_displs,
        &plan.send_counts,
        &plan.send_displs,
    )?;
    debug_assert_eq!(ghost_values.len(), plan.ghost_count());
    Ok(ghost_values)
}

/// Per-nonzero access metadata: a local/ghost flag and the offset to read,
/// either into the local vector slice or into the ghost value buffer.
/// Computed once from the plan's reverse map so the hot loop carries no
/// ownership arithmetic at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnClassification {
    pub is_local: Vec<bool>,
    pub access_idx: Vec<usize>,
}

pub fn classify_columns(
    rank: usize,
    nprocs: usize,
    col_idx: &[usize],
    plan: &GhostPlan,
) -> Result<ColumnClassification> {
    let mut is_local = Vec::with_capacity(col_idx.len());
    let mut access_idx = Vec::with_capacity(col_idx.len());
    for &j in col_idx {
        if owner_of(j, nprocs) == rank {
            is_local.push(true);
            access_idx.push(local_offset(j, rank, nprocs));
        } else {
            let pos = plan.position(j).ok_or_else(|| Error::DataCorruption {
                rank,
                detail: format!("column {j} is remote but absent from the ghost plan"),
            })?;
            is_local.push(false);
            access_idx.push(pos);
        }
    }
    Ok(ColumnClassification {
        is_local,
        access_idx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_group;
    use crate::distribute::{owned_len, owner_of};

    // The shard columns of the 6x6 scenario with rows {0,3} on rank 0,
    // {1,4} on rank 1 and {2,5} on rank 2.
    fn scenario_cols(rank: usize) -> Vec<usize> {
        match rank {
            0 => vec![1, 4, 2],
            1 => vec![0, 5],
            _ => vec![2],
        }
    }

    #[test]
    fn plan_groups_by_owner_in_ascending_order() {
        let plans = run_group(3, |comm| build_ghost_plan(&comm, 6, &scenario_cols(comm.rank())))
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>();
        // Rank 0 needs columns 1 and 4 from rank 1, then 2 from rank 2.
        assert_eq!(plans[0].ghost_cols, vec![1, 4, 2]);
        assert_eq!(plans[0].position(4), Some(1));
        assert_eq!(plans[1].ghost_cols, vec![0, 5]);
        assert_eq!(plans[2].ghost_cols, vec![]);
        assert!(plans[2].is_empty());
    }

    #[test]
    fn duplicate_references_request_a_column_once() {
        let plans = run_group(2, |comm| {
            let cols = if comm.rank() == 0 { vec![1, 3, 1, 1, 3] } else { vec![] };
            build_ghost_plan(&comm, 4, &cols)
        })
        .unwrap();
        let plan = plans[0].as_ref().unwrap();
        assert_eq!(plan.ghost_cols, vec![1, 3]);
    }

    #[test]
    fn plan_construction_is_deterministic() {
        let pairs = run_group(3, |comm| {
            let cols = scenario_cols(comm.rank());
            let first = build_ghost_plan(&comm, 6, &cols)?;
            let second = build_ghost_plan(&comm, 6, &cols)?;
            Ok((first, second))
        })
        .unwrap();
        for pair in pairs {
            let (first, second) = pair.unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn every_ghost_has_a_reachable_owner() {
        let nprocs = 3;
        let n = 6;
        let plans = run_group(nprocs, |comm| {
            build_ghost_plan(&comm, n, &scenario_cols(comm.rank()))
        })
        .unwrap();
        for (rank, plan) in plans.iter().enumerate() {
            for &col in &plan.as_ref().unwrap().ghost_cols {
                let owner = owner_of(col, nprocs);
                assert_ne!(owner, rank);
                assert!(local_offset(col, owner, nprocs) < owned_len(n, owner, nprocs));
            }
        }
    }

    #[test]
    fn exchange_returns_values_aligned_with_ghost_cols() {
        let results = run_group(3, |comm| {
            let plan = build_ghost_plan(&comm, 6, &scenario_cols(comm.rank()))?;
            // Global entry j holds the value j.
            let local_x = Vector::from_iter(
                (0..owned_len(6, comm.rank(), comm.nprocs()))
                    .map(|i| (comm.rank() + i * comm.nprocs()) as f64),
            );
            let ghost_values = exchange_ghost_values(&comm, &plan, &local_x)?;
            Ok((plan.ghost_cols.clone(), ghost_values))
        })
        .unwrap();
        for result in results {
            let (cols, values) = result.unwrap();
            let expected: Vec<f64> = cols.iter().map(|&j| j as f64).collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn out_of_bounds_column_is_fatal_for_the_group() {
        let results = run_group(2, |comm| {
            let cols = if comm.rank() == 0 { vec![9] } else { vec![1] };
            build_ghost_plan(&comm, 4, &cols)
        })
        .unwrap();
        assert!(matches!(results[0], Err(Error::DataCorruption { rank: 0, .. })));
        assert!(matches!(results[1], Err(Error::Communication { .. })));
    }

    #[test]
    fn classification_splits_local_and_ghost_accesses() {
        let results = run_group(3, |comm| {
            let cols = scenario_cols(comm.rank());
            let plan = build_ghost_plan(&comm, 6, &cols)?;
            classify_columns(comm.rank(), comm.nprocs(), &cols, &plan)
        })
        .unwrap();
        let class = results[0].as_ref().unwrap();
        // Rank 0 owns no referenced column, so every access is a ghost slot.
        assert_eq!(class.is_local, vec![false, false, false]);
        assert_eq!(class.access_idx, vec![0, 1, 2]);

        let class = results[2].as_ref().unwrap();
        // Rank 2 references its own column 2 at local offset 0.
        assert_eq!(class.is_local, vec![true]);
        assert_eq!(class.access_idx, vec![0]);
    }

    #[test]
    fn single_rank_plan_is_empty() {
        let results = run_group(1, |comm| build_ghost_plan(&comm, 5, &[0, 2, 4])).unwrap();
        let plan = results[0].as_ref().unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.ghost_count(), 0);
    }
}
