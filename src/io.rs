//! Loading the coordinator's global matrix. The distributed core only ever
//! sees well-formed in-memory CSR data; this module is where that data
//! comes from when it lives in a Matrix Market file.

use std::path::Path;

use crate::error::{Error, Result};
use crate::CsrMatrix;

/// Read a Matrix Market file into CSR form. Only square real matrices are
/// accepted; the distributed vector layout assumes N == M.
pub fn load_matrix_market<P: AsRef<Path>>(path: P) -> Result<CsrMatrix> {
    let path = path.as_ref();
    let tri = sprs::io::read_matrix_market::<f64, usize, _>(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let mat = tri.to_csr::<usize>();
    if mat.rows() != mat.cols() {
        return Err(Error::Config(format!(
            "{} is {}x{}; only square matrices are supported",
            path.display(),
            mat.rows(),
            mat.cols()
        )));
    }
    info!(
        "loaded {}: {}x{} with {} nonzeros",
        path.display(),
        mat.rows(),
        mat.cols(),
        mat.nnz()
    );
    Ok(mat)
}

/// Assemble a CSR matrix from raw arrays, validating the shape contract
/// instead of panicking on malformed input.
pub fn csr_from_parts(
    rows: usize,
    cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
) -> Result<CsrMatrix> {
    if row_ptr.len() != rows + 1 || row_ptr[0] != 0 || *row_ptr.last().unwrap() != col_idx.len() {
        return Err(Error::Config(format!(
            "row offsets must run from 0 to {} over {} entries",
            col_idx.len(),
            rows + 1
        )));
    }
    if col_idx.len() != values.len() {
        return Err(Error::Config(
            "column indices and values must have the same length".into(),
        ));
    }
    if row_ptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::Config("row offsets must be nondecreasing".into()));
    }
    for window in row_ptr.windows(2) {
        let row = &col_idx[window[0]..window[1]];
        if row.iter().any(|&c| c >= cols) {
            return Err(Error::Config(format!(
                "column index outside [0, {cols})"
            )));
        }
        if row.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(
                "columns within a row must be strictly increasing".into(),
            ));
        }
    }
    Ok(CsrMatrix::new((rows, cols), row_ptr, col_idx, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csr_from_parts_accepts_valid_input() {
        let mat = csr_from_parts(2, 3, vec![0, 1, 3], vec![2, 0, 1], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(mat.rows(), 2);
        assert_eq!(mat.nnz(), 3);
    }

    #[test]
    fn csr_from_parts_rejects_bad_shapes() {
        assert!(csr_from_parts(2, 2, vec![0, 1], vec![0], vec![1.0]).is_err());
        assert!(csr_from_parts(1, 2, vec![0, 1], vec![5], vec![1.0]).is_err());
        assert!(csr_from_parts(1, 3, vec![0, 2], vec![1, 1], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn load_rejects_missing_files() {
        assert!(matches!(
            load_matrix_market("no/such/file.mtx"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn loads_a_matrix_market_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("dist_spmv_io_test.mtx");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "%%MatrixMarket matrix coordinate real general").unwrap();
        writeln!(f, "3 3 2").unwrap();
        writeln!(f, "1 2 5.0").unwrap();
        writeln!(f, "3 1 -1.5").unwrap();
        drop(f);

        let mat = load_matrix_market(&path).unwrap();
        assert_eq!(mat.rows(), 3);
        assert_eq!(mat.nnz(), 2);
        assert_eq!(mat.get(0, 1), Some(&5.0));
        assert_eq!(mat.get(2, 0), Some(&-1.5));
        std::fs::remove_file(&path).ok();
    }
}
