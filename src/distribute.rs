//! Cyclic partitioning of the global CSR matrix and the dense vector across
//! the rank group. Rows go to `row % P`, vector entries to `entry % P`, so
//! ownership never needs a lookup table. Column indices keep their global
//! numbering inside every shard; that is what keeps ghost resolution purely
//! arithmetic later on.

use crate::comm::RankComm;
use crate::error::{Error, Result};
use crate::{CsrMatrix, Vector};

/// The owning rank of global row or column `j`.
pub fn owner_of(j: usize, nprocs: usize) -> usize {
    j % nprocs
}

/// Local offset of global index `j` inside its owner's storage.
pub fn local_offset(j: usize, owner: usize, nprocs: usize) -> usize {
    (j - owner) / nprocs
}

/// How many of `n` cyclically distributed entries land on `rank`.
pub fn owned_len(n: usize, rank: usize, nprocs: usize) -> usize {
    (n + nprocs - 1 - rank) / nprocs
}

/// One rank's slice of the matrix: `row_ptr` is row-relative (starts at 0,
/// `local_rows + 1` entries), `col_idx` keeps global column numbers, and
/// `values` is parallel to `col_idx`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixShard {
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl MatrixShard {
    pub fn rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }
}

/// Global problem shape, known to the coordinator and broadcast to the
/// group before anything else happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
    pub nnz: usize,
}

/// Broadcast the problem shape from rank 0. The coordinator passes
/// `Some(shape)`; everyone else passes `None` and receives it.
pub fn broadcast_shape(comm: &RankComm, shape: Option<Shape>) -> Result<Shape> {
    if (comm.rank() == 0) != shape.is_some() {
        return Err(Error::Config(
            "the problem shape must be supplied at rank 0 and only there".into(),
        ));
    }
    let buf: Vec<usize> = match shape {
        Some(s) => vec![s.rows, s.cols, s.nnz],
        None => vec![],
    };
    let dims = comm.broadcast(0, &buf)?;
    if dims.len() != 3 {
        return Err(Error::DataCorruption {
            rank: comm.rank(),
            detail: format!("shape broadcast carried {} values instead of 3", dims.len()),
        });
    }
    Ok(Shape {
        rows: dims[0],
        cols: dims[1],
        nnz: dims[2],
    })
}

/// Scatter the coordinator's global matrix into per-rank shards.
///
/// Rank 0 passes the full matrix; every other rank passes `None` and gets
/// its shard through the collectives: a broadcast of per-rank row and nnz
/// counts, then one variable-length scatter each for the row-relative
/// `row_ptr`, the globally-numbered `col_idx`, and `values`. Ranks that own
/// zero rows (possible whenever `M < P`) still join every collective and
/// come out with `row_ptr == [0]`.
pub fn distribute_matrix(comm: &RankComm, global: Option<&CsrMatrix>) -> Result<MatrixShard> {
    let rank = comm.rank();
    let nprocs = comm.nprocs();
    if (rank == 0) != global.is_some() {
        return Err(Error::Config(
            "the global matrix must be supplied at rank 0 and only there".into(),
        ));
    }

    // Coordinator walks its rows once per destination rank, packing the
    // row-relative offsets and the nonzero payloads in rank order.
    let mut row_counts = vec![];
    let mut nnz_counts = vec![];
    let mut send_row_ptr: Vec<usize> = vec![];
    let mut send_col_idx: Vec<usize> = vec![];
    let mut send_values: Vec<f64> = vec![];
    if let Some(mat) = global {
        if !mat.is_csr() {
            return Err(Error::Config("the global matrix must be in CSR form".into()));
        }
        let m = mat.rows();
        row_counts = vec![0usize; nprocs];
        nnz_counts = vec![0usize; nprocs];
        for dest in 0..nprocs {
            let mut rel_nnz = 0;
            for gi in (dest..m).step_by(nprocs) {
                let row = mat.outer_view(gi).ok_or_else(|| Error::DataCorruption {
                    rank,
                    detail: format!("global row {gi} is missing from the CSR storage"),
                })?;
                send_row_ptr.push(rel_nnz);
                send_col_idx.extend_from_slice(row.indices());
                send_values.extend_from_slice(row.data());
                rel_nnz += row.nnz();
                row_counts[dest] += 1;
            }
            send_row_ptr.push(rel_nnz);
            nnz_counts[dest] += rel_nnz;
        }
    }

    let row_counts = comm.broadcast(0, &row_counts)?;
    let nnz_counts = comm.broadcast(0, &nnz_counts)?;
    if row_counts.len() != nprocs || nnz_counts.len() != nprocs {
        return Err(Error::DataCorruption {
            rank,
            detail: "count tables do not cover every rank".into(),
        });
    }
    let local_rows = row_counts[rank];
    let local_nnz = nnz_counts[rank];
    debug!("rank {rank}: {local_rows} rows, {local_nnz} nonzeros");

    // Each rank's row_ptr segment carries one extra closing entry.
    let row_ptr_counts: Vec<usize> = row_counts.iter().map(|&c| c + 1).collect();
    let row_ptr = comm.scatterv(0, &send_row_ptr, &row_ptr_counts, local_rows + 1)?;
    let col_idx = comm.scatterv(0, &send_col_idx, &nnz_counts, local_nnz)?;
    let values = comm.scatterv(0, &send_values, &nnz_counts, local_nnz)?;

    if row_ptr.last() != Some(&local_nnz) {
        return Err(Error::DataCorruption {
            rank,
            detail: format!(
                "shard row offsets end at {:?} but {local_nnz} nonzeros were delivered",
                row_ptr.last()
            ),
        });
    }
    Ok(MatrixShard {
        row_ptr,
        col_idx,
        values,
    })
}

/// This rank's slice of the distributed vector, filled with ones (the
/// benchmark input; no catastrophic cancellation in the checked result).
pub fn ones_vector(n: usize, rank: usize, nprocs: usize) -> Vector {
    Vector::from_elem(owned_len(n, rank, nprocs), 1.0)
}
