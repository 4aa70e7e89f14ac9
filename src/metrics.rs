//! Cross-rank aggregation of the counters the benchmark loop emits. The
//! core stays agnostic to the report format: it hands over raw per-rank
//! numbers and this module folds them into the group-wide summary on
//! rank 0.

use std::time::Duration;

use serde::Serialize;

use crate::comm::RankComm;
use crate::distribute::Shape;
use crate::error::Result;

/// Static per-rank load counters, fixed after setup.
#[derive(Debug, Clone, Copy)]
pub struct RankCounters {
    pub local_rows: usize,
    pub local_nnz: usize,
    pub ghost_count: usize,
    /// Resident bytes for the shard, the local vector slice and the ghost
    /// structure on this rank.
    pub local_bytes: usize,
}

/// Wall-clock samples for one timed iteration: the two-phase ghost exchange
/// and the local kernel, measured separately.
#[derive(Debug, Clone, Copy)]
pub struct IterationTiming {
    pub comm: Duration,
    pub compute: Duration,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LoadSummary {
    pub min: usize,
    pub max: usize,
    pub sum: usize,
}

impl LoadSummary {
    fn of(per_rank: &[usize]) -> Self {
        LoadSummary {
            min: per_rank.iter().copied().min().unwrap_or(0),
            max: per_rank.iter().copied().max().unwrap_or(0),
            sum: per_rank.iter().sum(),
        }
    }

    pub fn avg(&self, nprocs: usize) -> usize {
        self.sum / nprocs
    }
}

/// Group-wide benchmark summary, produced at rank 0 only.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub matrix: String,
    pub rows: usize,
    pub cols: usize,
    pub nnz: usize,
    pub nprocs: usize,
    pub iterations: usize,
    /// Best and average per-iteration time, taking the slowest rank of each
    /// iteration as that iteration's time (the group moves at the pace of
    /// its bottleneck).
    pub best_time_s: f64,
    pub avg_time_s: f64,
    pub avg_comm_s: f64,
    pub comm_fraction: f64,
    pub gflops_best: f64,
    pub gflops_avg: f64,
    pub rows_per_rank: LoadSummary,
    pub nnz_per_rank: LoadSummary,
    pub ghosts_per_rank: LoadSummary,
    /// Bytes crossing rank boundaries per product: requests out plus values
    /// back, eight bytes per ghost entry each way.
    pub comm_volume_mb: f64,
    /// Per-rank resident footprint, the lightest and heaviest rank.
    pub mem_min_mb: f64,
    pub mem_max_mb: f64,
}

impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Distributed CSR SpMV ===")?;
        writeln!(f, "matrix       : {}", self.matrix)?;
        writeln!(
            f,
            "dimensions   : {} x {} (nnz = {})",
            self.rows, self.cols, self.nnz
        )?;
        writeln!(f, "ranks        : {}", self.nprocs)?;
        writeln!(
            f,
            "time/spmv    : best {:.3} ms, avg {:.3} ms",
            self.best_time_s * 1e3,
            self.avg_time_s * 1e3
        )?;
        writeln!(
            f,
            "gflops       : best {:.3}, avg {:.3}",
            self.gflops_best, self.gflops_avg
        )?;
        writeln!(
            f,
            "rows/rank    : min={} avg={} max={}",
            self.rows_per_rank.min,
            self.rows_per_rank.avg(self.nprocs),
            self.rows_per_rank.max
        )?;
        writeln!(
            f,
            "nnz/rank     : min={} avg={} max={}",
            self.nnz_per_rank.min,
            self.nnz_per_rank.avg(self.nprocs),
            self.nnz_per_rank.max
        )?;
        writeln!(
            f,
            "ghosts/rank  : min={} avg={} max={}",
            self.ghosts_per_rank.min,
            self.ghosts_per_rank.avg(self.nprocs),
            self.ghosts_per_rank.max
        )?;
        writeln!(
            f,
            "comm         : {:.3} MB per spmv, {:.1}% of time",
            self.comm_volume_mb, self.comm_fraction
        )?;
        writeln!(
            f,
            "memory/rank  : min={:.3} MB max={:.3} MB",
            self.mem_min_mb, self.mem_max_mb
        )
    }
}

fn gather_usize(comm: &RankComm, value: usize) -> Result<Option<Vec<usize>>> {
    comm.gather(0, value)
}

/// Fold every rank's counters and timings into a [`BenchReport`] at rank 0.
/// Every rank must call this (it is a sequence of gathers); non-root ranks
/// get `None` back.
pub fn collect(
    comm: &RankComm,
    matrix: &str,
    shape: Shape,
    counters: RankCounters,
    timings: &[IterationTiming],
) -> Result<Option<BenchReport>> {
    let iterations = timings.len().max(1);

    // Per-iteration bottleneck: the group-wide time of an iteration is its
    // slowest rank. Gather each iteration's pair and reduce at the root.
    let mut max_total_per_iter = Vec::with_capacity(timings.len());
    let mut max_comm_per_iter = Vec::with_capacity(timings.len());
    for timing in timings {
        let total = (timing.comm + timing.compute).as_secs_f64();
        if let Some(all) = comm.gather(0, total)? {
            max_total_per_iter.push(all.into_iter().fold(0.0, f64::max));
        }
        if let Some(all) = comm.gather(0, timing.comm.as_secs_f64())? {
            max_comm_per_iter.push(all.into_iter().fold(0.0, f64::max));
        }
    }

    let rows = gather_usize(comm, counters.local_rows)?;
    let nnz = gather_usize(comm, counters.local_nnz)?;
    let ghosts = gather_usize(comm, counters.ghost_count)?;
    let bytes = gather_usize(comm, counters.local_bytes)?;

    let (Some(rows), Some(nnz), Some(ghosts), Some(bytes)) = (rows, nnz, ghosts, bytes) else {
        return Ok(None);
    };

    let best_time_s = max_total_per_iter.iter().copied().fold(f64::INFINITY, f64::min);
    let avg_time_s = max_total_per_iter.iter().sum::<f64>() / iterations as f64;
    let avg_comm_s = max_comm_per_iter.iter().sum::<f64>() / iterations as f64;
    let flops = 2.0 * shape.nnz as f64;
    let ghost_sum: usize = ghosts.iter().sum();

    Ok(Some(BenchReport {
        matrix: matrix.to_string(),
        rows: shape.rows,
        cols: shape.cols,
        nnz: shape.nnz,
        nprocs: comm.nprocs(),
        iterations: timings.len(),
        best_time_s,
        avg_time_s,
        avg_comm_s,
        comm_fraction: if avg_time_s > 0.0 {
            100.0 * avg_comm_s / avg_time_s
        } else {
            0.0
        },
        gflops_best: if best_time_s.is_finite() && best_time_s > 0.0 {
            flops / best_time_s / 1e9
        } else {
            0.0
        },
        gflops_avg: if avg_time_s > 0.0 {
            flops / avg_time_s / 1e9
        } else {
            0.0
        },
        rows_per_rank: LoadSummary::of(&rows),
        nnz_per_rank: LoadSummary::of(&nnz),
        ghosts_per_rank: LoadSummary::of(&ghosts),
        comm_volume_mb: 2.0 * ghost_sum as f64 * 8.0 / 1e6,
        mem_min_mb: bytes.iter().copied().min().unwrap_or(0) as f64 / (1024.0 * 1024.0),
        mem_max_mb: bytes.iter().copied().max().unwrap_or(0) as f64 / (1024.0 * 1024.0),
    }))
}
