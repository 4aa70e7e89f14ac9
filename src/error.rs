//! Error taxonomy for the distributed kernel. Everything internal returns
//! `Result`; only the benchmark driver turns an error into a process exit,
//! so a whole rank group can fail inside a test without killing it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any collective begins: bad rank count, bad thread
    /// count, missing or malformed input.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A shape contract was violated: a column index outside the declared
    /// bounds, or a payload whose size disagrees with the negotiated counts.
    /// Continuing would desynchronize every collective in the group.
    #[error("rank {rank}: data corruption: {detail}")]
    DataCorruption { rank: usize, detail: String },

    /// A collective could not complete. These exchanges are all-or-nothing,
    /// so there is no partial state to recover and no retry.
    #[error("rank {rank}: exchange with rank {peer} failed: {detail}")]
    Communication {
        rank: usize,
        peer: usize,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
