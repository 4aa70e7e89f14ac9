//! The local row kernels. These need to be fast: the distributed product is
//! communication plus exactly this loop.

use rayon::prelude::*;

use crate::distribute::MatrixShard;
use crate::ghost::ColumnClassification;
use crate::{CsrMatrix, Vector};

/// One rank's share of `y = A * x`, over its shard's rows.
///
/// Rows are independent and run across the rayon pool; inside a row the
/// accumulation stays serial and left-to-right over that row's nonzeros, so
/// the result is bit-identical for any thread count. Each nonzero reads
/// either the local vector slice or the ghost buffer through the
/// precomputed classification; no ownership arithmetic survives into this
/// loop. A row with no nonzeros contributes an exact 0.0. Never blocks.
pub fn local_spmv(
    shard: &MatrixShard,
    local_x: &Vector,
    ghost_values: &[f64],
    class: &ColumnClassification,
) -> Vector {
    debug_assert_eq!(class.is_local.len(), shard.nnz());
    let y: Vec<f64> = (0..shard.rows())
        .into_par_iter()
        .map(|i| {
            let mut sum = 0.0;
            for k in shard.row_ptr[i]..shard.row_ptr[i + 1] {
                let x = if class.is_local[k] {
                    local_x[class.access_idx[k]]
                } else {
                    ghost_values[class.access_idx[k]]
                };
                sum += shard.values[k] * x;
            }
            sum
        })
        .collect();
    Vector::from(y)
}

/// Single-rank reference product, the baseline every distributed result is
/// checked against.
pub fn spmv(a: &CsrMatrix, b: &Vector) -> Vector {
    assert!(a.is_csr());
    assert_eq!(a.cols(), b.len());
    let c: Vec<f64> = a
        .outer_iterator()
        .map(|row| {
            let mut sum = 0.0;
            for (j, val) in row.iter() {
                sum += val * b[j];
            }
            sum
        })
        .collect();
    Vector::from(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::generate_matrix;
    use approx::assert_relative_eq;

    #[test]
    fn reference_spmv_on_a_small_matrix() {
        // [[2, 0, 1], [0, 0, 0], [0, 3, 0]] * [1, 2, 3]
        let mat = crate::io::csr_from_parts(
            3,
            3,
            vec![0, 2, 2, 3],
            vec![0, 2, 1],
            vec![2.0, 1.0, 3.0],
        )
        .unwrap();
        let x = Vector::from(vec![1.0, 2.0, 3.0]);
        let y = spmv(&mat, &x);
        assert_eq!(y.to_vec(), vec![5.0, 0.0, 6.0]);
    }

    #[test]
    fn local_kernel_matches_reference_when_everything_is_local() {
        let mat = generate_matrix(30, 0.2, 5).unwrap();
        let x = Vector::from_elem(30, 1.0);
        let mut row_ptr = vec![0];
        for row in mat.outer_iterator() {
            row_ptr.push(row_ptr.last().unwrap() + row.nnz());
        }
        let shard = MatrixShard {
            row_ptr,
            col_idx: mat.indices().to_vec(),
            values: mat.data().to_vec(),
        };
        // With one rank the cyclic offset map is the identity.
        let class = ColumnClassification {
            is_local: vec![true; shard.nnz()],
            access_idx: shard.col_idx.clone(),
        };
        let y = local_spmv(&shard, &x, &[], &class);
        let expected = spmv(&mat, &x);
        for (a, b) in y.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-12);
        }
    }

    #[test]
    fn empty_rows_produce_exact_zeros() {
        let shard = MatrixShard {
            row_ptr: vec![0, 0, 1, 1],
            col_idx: vec![0],
            values: vec![4.0],
        };
        let class = ColumnClassification {
            is_local: vec![true],
            access_idx: vec![0],
        };
        let x = Vector::from(vec![2.5]);
        let y = local_spmv(&shard, &x, &[], &class);
        assert_eq!(y.to_vec(), vec![0.0, 10.0, 0.0]);
    }
}
