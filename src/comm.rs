//! Rank group plumbing and the collective operations the kernel is built
//! on. Every rank holds a [`RankComm`] wired to each peer by a dedicated
//! channel pair, and all data crosses rank boundaries through collectives:
//! broadcast, variable-length scatter, all-to-all of scalars,
//! variable-length all-to-all, and a scalar gather for reductions.
//!
//! Collectives are blocking and all-or-nothing: every rank in the group
//! must make the same call in the same order. Because every ordered rank
//! pair has its own FIFO channel and all ranks execute the same collective
//! sequence, no message tagging is needed. A peer that disappears (its
//! thread returned or panicked) closes its channels, which surfaces at the
//! survivors as [`Error::Communication`] instead of a hang.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::{Error, Result};

/// Wire payload between ranks. The protocol moves either index data or
/// value data; receiving the wrong kind means the group has desynchronized.
#[derive(Debug, Clone)]
pub enum Payload {
    Indices(Vec<usize>),
    Values(Vec<f64>),
}

/// Element types that can travel through a collective.
pub trait Transferable: Copy + Send + 'static {
    fn pack(buf: Vec<Self>) -> Payload;
    fn unpack(payload: Payload) -> Option<Vec<Self>>;
}

impl Transferable for usize {
    fn pack(buf: Vec<Self>) -> Payload {
        Payload::Indices(buf)
    }

    fn unpack(payload: Payload) -> Option<Vec<Self>> {
        match payload {
            Payload::Indices(buf) => Some(buf),
            _ => None,
        }
    }
}

impl Transferable for f64 {
    fn pack(buf: Vec<Self>) -> Payload {
        Payload::Values(buf)
    }

    fn unpack(payload: Payload) -> Option<Vec<Self>> {
        match payload {
            Payload::Values(buf) => Some(buf),
            _ => None,
        }
    }
}

/// One rank's endpoint into the group. Rank identity and group size are
/// carried here and passed explicitly into every component; nothing reads
/// them from ambient global state.
pub struct RankComm {
    rank: usize,
    nprocs: usize,
    txs: Vec<Sender<Payload>>,
    rxs: Vec<Receiver<Payload>>,
}

impl RankComm {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    fn send<T: Transferable>(&self, to: usize, buf: Vec<T>) -> Result<()> {
        self.txs[to].send(T::pack(buf)).map_err(|_| Error::Communication {
            rank: self.rank,
            peer: to,
            detail: "peer left the group before the exchange completed".into(),
        })
    }

    fn recv<T: Transferable>(&self, from: usize) -> Result<Vec<T>> {
        let payload = self.rxs[from].recv().map_err(|_| Error::Communication {
            rank: self.rank,
            peer: from,
            detail: "peer left the group before the exchange completed".into(),
        })?;
        T::unpack(payload).ok_or_else(|| Error::Communication {
            rank: self.rank,
            peer: from,
            detail: "payload kind does not match the collective in progress".into(),
        })
    }

    fn check_len<T>(&self, from: usize, buf: &[T], expected: usize) -> Result<()> {
        if buf.len() != expected {
            return Err(Error::DataCorruption {
                rank: self.rank,
                detail: format!(
                    "expected {expected} items from rank {from}, received {}",
                    buf.len()
                ),
            });
        }
        Ok(())
    }

    /// Replicate the root's buffer to every rank. Non-root callers pass an
    /// empty slice; every rank returns the root's data.
    pub fn broadcast<T: Transferable>(&self, root: usize, buf: &[T]) -> Result<Vec<T>> {
        if self.rank == root {
            for peer in 0..self.nprocs {
                if peer != root {
                    self.send(peer, buf.to_vec())?;
                }
            }
            Ok(buf.to_vec())
        } else {
            self.recv(root)
        }
    }

    /// Variable-length scatter from the root, governed by a per-rank counts
    /// table. Each rank states how many items it expects and the received
    /// length is validated against that.
    pub fn scatterv<T: Transferable>(
        &self,
        root: usize,
        sendbuf: &[T],
        counts: &[usize],
        recv_count: usize,
    ) -> Result<Vec<T>> {
        if self.rank == root {
            let total: usize = counts.iter().sum();
            if counts.len() != self.nprocs || total != sendbuf.len() {
                return Err(Error::DataCorruption {
                    rank: self.rank,
                    detail: format!(
                        "scatter counts describe {total} items over {} ranks but the buffer holds {}",
                        counts.len(),
                        sendbuf.len()
                    ),
                });
            }
            let mut offset = 0;
            let mut own = Vec::new();
            for (peer, &count) in counts.iter().enumerate() {
                let segment = &sendbuf[offset..offset + count];
                if peer == root {
                    own = segment.to_vec();
                } else {
                    self.send(peer, segment.to_vec())?;
                }
                offset += count;
            }
            self.check_len(root, &own, recv_count)?;
            Ok(own)
        } else {
            let buf = self.recv(root)?;
            self.check_len(root, &buf, recv_count)?;
            Ok(buf)
        }
    }

    /// Exchange one scalar with every peer (self included). `sends[p]` goes
    /// to rank `p`; the returned vector holds one scalar per rank, in rank
    /// order. This is the count-negotiation primitive.
    pub fn all_to_all<T: Transferable>(&self, sends: &[T]) -> Result<Vec<T>> {
        assert_eq!(sends.len(), self.nprocs);
        for (peer, &item) in sends.iter().enumerate() {
            self.send(peer, vec![item])?;
        }
        let mut received = Vec::with_capacity(self.nprocs);
        for peer in 0..self.nprocs {
            let buf = self.recv::<T>(peer)?;
            self.check_len(peer, &buf, 1)?;
            received.push(buf[0]);
        }
        Ok(received)
    }

    /// Variable-length all-to-all governed by precomputed count and
    /// prefix-sum displacement tables (both sides sized `nprocs + 1` for the
    /// displacements). Rank `p` receives `sendbuf[send_displs[p]..
    /// send_displs[p + 1]]`; the result holds each peer's segment at
    /// `recv_displs[p]`. Every received segment length is validated against
    /// the negotiated counts.
    pub fn all_to_allv<T: Transferable>(
        &self,
        sendbuf: &[T],
        send_counts: &[usize],
        send_displs: &[usize],
        recv_counts: &[usize],
        recv_displs: &[usize],
    ) -> Result<Vec<T>> {
        assert_eq!(send_displs.len(), self.nprocs + 1);
        assert_eq!(recv_displs.len(), self.nprocs + 1);
        if send_displs[self.nprocs] != sendbuf.len() {
            return Err(Error::DataCorruption {
                rank: self.rank,
                detail: format!(
                    "displacement table covers {} items but the send buffer holds {}",
                    send_displs[self.nprocs],
                    sendbuf.len()
                ),
            });
        }
        for peer in 0..self.nprocs {
            debug_assert_eq!(send_displs[peer + 1] - send_displs[peer], send_counts[peer]);
            self.send(peer, sendbuf[send_displs[peer]..send_displs[peer + 1]].to_vec())?;
        }
        let mut received = Vec::with_capacity(recv_displs[self.nprocs]);
        for peer in 0..self.nprocs {
            let segment = self.recv::<T>(peer)?;
            self.check_len(peer, &segment, recv_counts[peer])?;
            debug_assert_eq!(received.len(), recv_displs[peer]);
            received.extend_from_slice(&segment);
        }
        Ok(received)
    }

    /// Gather one scalar per rank at the root, in rank order. Non-root
    /// ranks return `None`. The metrics reductions are folds over this.
    pub fn gather<T: Transferable>(&self, root: usize, value: T) -> Result<Option<Vec<T>>> {
        self.send(root, vec![value])?;
        if self.rank != root {
            return Ok(None);
        }
        let mut gathered = Vec::with_capacity(self.nprocs);
        for peer in 0..self.nprocs {
            let buf = self.recv::<T>(peer)?;
            self.check_len(peer, &buf, 1)?;
            gathered.push(buf[0]);
        }
        Ok(Some(gathered))
    }
}

/// Build the fully-connected channel mesh for a group of `nprocs` ranks.
/// The returned endpoints are in rank order and each is meant to move into
/// its own worker thread.
pub fn rank_group(nprocs: usize) -> Result<Vec<RankComm>> {
    if nprocs == 0 {
        return Err(Error::Config("rank count must be at least 1".into()));
    }
    let mut tx_grid: Vec<Vec<Sender<Payload>>> = (0..nprocs).map(|_| Vec::new()).collect();
    let mut rx_grid: Vec<Vec<Receiver<Payload>>> = Vec::with_capacity(nprocs);
    for _dst in 0..nprocs {
        let mut inbound = Vec::with_capacity(nprocs);
        for src in 0..nprocs {
            let (tx, rx) = channel();
            tx_grid[src].push(tx);
            inbound.push(rx);
        }
        rx_grid.push(inbound);
    }
    Ok(tx_grid
        .into_iter()
        .zip(rx_grid)
        .enumerate()
        .map(|(rank, (txs, rxs))| RankComm {
            rank,
            nprocs,
            txs,
            rxs,
        })
        .collect())
}

/// Spawn one worker thread per rank, run `f` on each, and hand back the
/// per-rank outcomes in rank order. A rank that fails leaves its peers with
/// `Communication` errors rather than a deadlock, so a group-wide failure
/// stays observable from the calling thread.
pub fn run_group<T, F>(nprocs: usize, f: F) -> Result<Vec<Result<T>>>
where
    T: Send,
    F: Fn(RankComm) -> Result<T> + Send + Sync,
{
    let comms = rank_group(nprocs)?;
    Ok(std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(Error::Communication {
                        rank,
                        peer: rank,
                        detail: "rank panicked".into(),
                    })
                })
            })
            .collect()
    }))
}
