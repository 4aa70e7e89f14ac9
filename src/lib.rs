//! Distributed sparse matrix-vector product (SpMV) over a group of
//! cooperating ranks, for studying the scaling behavior of the CSR kernel.
//!
//! The matrix is partitioned cyclically by row and the vector cyclically by
//! entry, so ownership of any global index is pure arithmetic: index `j`
//! lives on rank `j % P` at local offset `(j - owner) / P`. Each rank scans
//! its shard once to learn which remote vector entries ("ghosts") its rows
//! touch, negotiates a reusable exchange plan with its peers, and then every
//! iteration runs a two-phase collective exchange followed by a
//! thread-parallel local row kernel.
//!
//! Ranks are worker threads wired together with channels and exchanging data
//! only through the collective operations in [`comm`]. That keeps the group
//! semantics of a message-passing program (every rank must show up for every
//! collective) while letting a whole group run inside one test process.

use ndarray::Array1;
use sprs::CsMatBase;

#[macro_use]
extern crate log;

pub mod comm;
pub mod distribute;
pub mod error;
pub mod gen;
pub mod ghost;
pub mod io;
pub mod metrics;
pub mod spmv;

pub type CsrMatrix = CsMatBase<f64, usize, Vec<usize>, Vec<usize>, Vec<f64>, usize>;
pub type Vector = Array1<f64>;

pub use error::{Error, Result};
