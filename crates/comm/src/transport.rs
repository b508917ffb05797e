//! Message-passing substrate.
//!
//! The engine talks to peers through the [`Transport`] trait: blocking
//! word-payload send and receive plus a count round-trip, with per-pair
//! FIFO ordering. The shipped implementation runs every rank as a thread
//! in one process, wired with `std::sync::mpsc` channels; a network or
//! MPI transport can replace it behind the same trait without touching
//! the engine.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use crate::error::CommError;

/// Reliable pairwise-ordered messaging between ranks.
///
/// All payloads are `f64` word slices. Sends never block on the peer;
/// receives block until the matching message arrives. A vanished peer is
/// a fatal [`CommError::Transport`].
pub trait Transport: Send {
    /// This worker's rank in `[0, nprocs)`.
    fn rank(&self) -> usize;

    /// Total number of workers.
    fn nprocs(&self) -> usize;

    /// Name of the node hosting this rank (NUMA placement groups by it).
    fn node_name(&self) -> &str;

    /// Node names of every rank, indexed by rank.
    fn node_names(&self) -> Vec<String>;

    /// Send `buf` to `dest`.
    fn send(&self, dest: usize, buf: &[f64]) -> Result<(), CommError>;

    /// Receive the next message from `src` into `buf`; returns the word
    /// count. The message must fit.
    fn recv_into(&self, src: usize, buf: &mut [f64]) -> Result<usize, CommError>;

    /// Exchange word counts with a pair of peers: send `count` to `dest`,
    /// receive the peer count from `src`.
    fn sendrecv_count(&self, dest: usize, count: usize, src: usize) -> Result<usize, CommError> {
        self.send(dest, &[count as f64])?;
        let mut one = [0.0];
        self.recv_into(src, &mut one)?;
        Ok(one[0] as usize)
    }
}

/// In-process rank endpoint: one per worker thread.
#[derive(Debug)]
pub struct LocalTransport {
    rank: usize,
    names: Arc<Vec<String>>,
    senders: Vec<Sender<Vec<f64>>>,
    receivers: Vec<Receiver<Vec<f64>>>,
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nprocs(&self) -> usize {
        self.senders.len()
    }

    fn node_name(&self) -> &str {
        &self.names[self.rank]
    }

    fn node_names(&self) -> Vec<String> {
        self.names.as_ref().clone()
    }

    fn send(&self, dest: usize, buf: &[f64]) -> Result<(), CommError> {
        self.senders[dest]
            .send(buf.to_vec())
            .map_err(|_| CommError::Transport(format!("rank {dest} is gone")))
    }

    fn recv_into(&self, src: usize, buf: &mut [f64]) -> Result<usize, CommError> {
        let msg = self.receivers[src]
            .recv()
            .map_err(|_| CommError::Transport(format!("rank {src} is gone")))?;
        if msg.len() > buf.len() {
            return Err(CommError::Transport(format!(
                "message of {} words from rank {src} exceeds buffer of {}",
                msg.len(),
                buf.len()
            )));
        }
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }
}

/// Build the endpoints of an in-process cluster, all on one node.
pub fn local_cluster(nprocs: usize) -> Vec<LocalTransport> {
    local_cluster_with_nodes(&vec!["local"; nprocs])
}

/// Build an in-process cluster with an explicit node name per rank, for
/// exercising NUMA-aware placement.
pub fn local_cluster_with_nodes(node_names: &[&str]) -> Vec<LocalTransport> {
    let nprocs = node_names.len();
    let names = Arc::new(node_names.iter().map(|s| s.to_string()).collect::<Vec<_>>());

    // one channel per ordered (src, dest) pair keeps messages FIFO per pair
    let mut senders: Vec<Vec<Sender<Vec<f64>>>> = (0..nprocs).map(|_| Vec::new()).collect();
    let mut receivers: Vec<Vec<Receiver<Vec<f64>>>> = (0..nprocs).map(|_| Vec::new()).collect();
    for src in 0..nprocs {
        for _dest in 0..nprocs {
            let (tx, rx) = channel();
            senders[src].push(tx);
            receivers[src].push(rx);
        }
    }
    // receivers were built as [src][dest]; endpoint `dest` needs them
    // regrouped as [dest][src]
    let mut by_dest: Vec<Vec<Receiver<Vec<f64>>>> = (0..nprocs).map(|_| Vec::new()).collect();
    for row in receivers {
        for (dest, rx) in row.into_iter().enumerate() {
            by_dest[dest].push(rx);
        }
    }

    senders
        .into_iter()
        .zip(by_dest)
        .enumerate()
        .map(|(rank, (tx_row, rx_row))| LocalTransport {
            rank,
            names: Arc::clone(&names),
            senders: tx_row,
            receivers: rx_row,
        })
        .collect()
}

/// Spawn one worker thread per endpoint, run `f` on each, and collect the
/// per-rank results in rank order. Panics if a worker thread panics.
pub fn run_cluster<R, F>(endpoints: Vec<LocalTransport>, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(LocalTransport) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = endpoints
        .into_iter()
        .map(|ep| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(ep))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("worker thread panicked"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong() {
        let results = run_cluster(local_cluster(2), |t| {
            if t.rank() == 0 {
                t.send(1, &[1.0, 2.0, 3.0]).unwrap();
                let mut buf = [0.0; 4];
                let n = t.recv_into(1, &mut buf).unwrap();
                (n, buf[0])
            } else {
                let mut buf = [0.0; 4];
                let n = t.recv_into(0, &mut buf).unwrap();
                t.send(0, &[buf[0] + buf[1] + buf[2]]).unwrap();
                (n, 0.0)
            }
        });
        assert_eq!(results[0], (1, 6.0));
        assert_eq!(results[1], (3, 0.0));
    }

    #[test]
    fn count_round_trip() {
        let results = run_cluster(local_cluster(2), |t| {
            let peer = 1 - t.rank();
            let mine = 10 + t.rank();
            t.sendrecv_count(peer, mine, peer).unwrap()
        });
        assert_eq!(results, vec![11, 10]);
    }

    #[test]
    fn per_pair_fifo_order() {
        let results = run_cluster(local_cluster(2), |t| {
            if t.rank() == 0 {
                t.send(1, &[1.0]).unwrap();
                t.send(1, &[2.0]).unwrap();
                t.send(1, &[3.0]).unwrap();
                Vec::new()
            } else {
                let mut got = Vec::new();
                for _ in 0..3 {
                    let mut buf = [0.0];
                    t.recv_into(0, &mut buf).unwrap();
                    got.push(buf[0]);
                }
                got
            }
        });
        assert_eq!(results[1], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn oversized_message_is_fatal() {
        let results = run_cluster(local_cluster(2), |t| {
            if t.rank() == 0 {
                t.send(1, &[0.0; 8]).unwrap();
                Ok(0)
            } else {
                let mut buf = [0.0; 4];
                t.recv_into(0, &mut buf).map(|_| 0)
            }
        });
        assert!(matches!(results[1], Err(CommError::Transport(_))));
    }

    #[test]
    fn node_names_table() {
        let endpoints = local_cluster_with_nodes(&["n0", "n0", "n1", "n1"]);
        assert_eq!(endpoints[2].node_name(), "n1");
        assert_eq!(
            endpoints[0].node_names(),
            vec!["n0", "n0", "n1", "n1"]
        );
    }

    #[test]
    fn self_send_delivers() {
        let t = local_cluster(1).pop().unwrap();
        t.send(0, &[9.0]).unwrap();
        let mut buf = [0.0];
        t.recv_into(0, &mut buf).unwrap();
        assert_eq!(buf[0], 9.0);
    }
}
