//! An in-process software switch. `SoftSwitch::endpoints(n)` wires n
//! endpoints through a full mesh of channels; each endpoint is moved onto
//! its own thread and behaves like one rank of the process group. Delivery
//! is synchronous from the receiver's point of view: `recv` blocks until a
//! message with the requested (src, tag) arrives.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Barrier};
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver, Sender};
use lazy_static::lazy_static;
use log::trace;

use crate::{CommError, Communicator, Tag};

lazy_static! {
    static ref SWITCH_ID: AtomicUsize = AtomicUsize::new(0);
}

#[derive(Debug)]
struct Packet {
    tag: Tag,
    payload: Vec<u8>,
}

/// Builder for a mesh of connected endpoints.
pub struct SoftSwitch;

impl SoftSwitch {
    /// Create the endpoints of an n-rank group. Endpoint i is rank i.
    pub fn endpoints(n: usize) -> Vec<SwitchComm> {
        assert!(n > 0, "a process group needs at least one rank");

        let switch_id = SWITCH_ID.fetch_add(1, SeqCst);

        // mat_tx[src][dst] sends into the receiver owned by dst.
        let mut mat_tx: Vec<Vec<Sender<Packet>>> = Vec::with_capacity(n);
        let mut mat_rx: Vec<Vec<Receiver<Packet>>> = Vec::with_capacity(n);
        for _src in 0..n {
            let mut row_tx = Vec::with_capacity(n);
            let mut row_rx = Vec::with_capacity(n);
            for _dst in 0..n {
                let (tx, rx) = unbounded();
                row_tx.push(tx);
                row_rx.push(rx);
            }
            mat_tx.push(row_tx);
            mat_rx.push(row_rx);
        }

        let barrier = Arc::new(Barrier::new(n));
        let epoch = Instant::now();

        mat_tx
            .into_iter()
            .enumerate()
            .map(|(rank, tx)| SwitchComm {
                switch_id,
                rank,
                size: n,
                tx,
                rx: (0..n).map(|src| mat_rx[src][rank].clone()).collect(),
                stash: RefCell::new((0..n).map(|_| Vec::new()).collect()),
                barrier: Arc::clone(&barrier),
                epoch,
            })
            .collect()
    }
}

/// One rank's endpoint of a software switch. Owned by a single thread;
/// the unmatched-message stash makes it deliberately !Sync.
#[derive(Debug)]
pub struct SwitchComm {
    switch_id: usize,
    rank: usize,
    size: usize,
    tx: Vec<Sender<Packet>>,
    rx: Vec<Receiver<Packet>>,
    // messages that arrived ahead of the tag being asked for
    stash: RefCell<Vec<Vec<Packet>>>,
    barrier: Arc<Barrier>,
    epoch: Instant,
}

impl SwitchComm {
    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size {
            return Err(CommError::RankOutOfRange {
                rank: peer,
                size: self.size,
            });
        }
        Ok(())
    }
}

impl Communicator for SwitchComm {
    #[inline]
    fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, buf: &[u8], dst: usize, tag: Tag) -> Result<(), CommError> {
        self.check_peer(dst)?;
        trace!(
            "switch {}: {} -> {} tag {:#x} ({} bytes)",
            self.switch_id,
            self.rank,
            dst,
            tag,
            buf.len()
        );
        self.tx[dst]
            .send(Packet {
                tag,
                payload: buf.to_vec(),
            })
            .map_err(|_| CommError::Disconnected(dst))
    }

    fn recv(&self, buf: &mut [u8], src: usize, tag: Tag) -> Result<(), CommError> {
        self.check_peer(src)?;

        let mut stash = self.stash.borrow_mut();
        let pkt = if let Some(i) = stash[src].iter().position(|p| p.tag == tag) {
            stash[src].remove(i)
        } else {
            loop {
                let pkt = self.rx[src]
                    .recv()
                    .map_err(|_| CommError::Disconnected(src))?;
                if pkt.tag == tag {
                    break pkt;
                }
                stash[src].push(pkt);
            }
        };

        if pkt.payload.len() != buf.len() {
            return Err(CommError::TruncatedMessage {
                want: buf.len(),
                got: pkt.payload.len(),
            });
        }
        buf.copy_from_slice(&pkt.payload);
        Ok(())
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    #[inline]
    fn wtime(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pack_f64, unpack_f64};

    #[test]
    fn ping_pong() {
        let mut eps = SoftSwitch::endpoints(2);
        let c1 = eps.pop().unwrap();
        let c0 = eps.pop().unwrap();

        let h = std::thread::spawn(move || {
            let mut buf = vec![0u8; 16];
            c1.recv(&mut buf, 0, 7).unwrap();
            c1.send(&buf, 0, 8).unwrap();
            unpack_f64(&buf)
        });

        let msg = pack_f64(&[1.25, -2.0]);
        c0.send(&msg, 1, 7).unwrap();
        let mut back = vec![0u8; 16];
        c0.recv(&mut back, 1, 8).unwrap();

        assert_eq!(h.join().unwrap(), vec![1.25, -2.0]);
        assert_eq!(back, msg);
    }

    #[test]
    fn recv_matches_tag_out_of_order() {
        let mut eps = SoftSwitch::endpoints(2);
        let c1 = eps.pop().unwrap();
        let c0 = eps.pop().unwrap();

        c0.send(&[1], 1, 10).unwrap();
        c0.send(&[2], 1, 20).unwrap();

        let mut b = [0u8; 1];
        c1.recv(&mut b, 0, 20).unwrap();
        assert_eq!(b, [2]);
        c1.recv(&mut b, 0, 10).unwrap();
        assert_eq!(b, [1]);
    }

    #[test]
    fn same_tag_is_fifo() {
        let mut eps = SoftSwitch::endpoints(2);
        let c1 = eps.pop().unwrap();
        let c0 = eps.pop().unwrap();

        for i in 0..4u8 {
            c0.send(&[i], 1, 5).unwrap();
        }
        for i in 0..4u8 {
            let mut b = [9u8; 1];
            c1.recv(&mut b, 0, 5).unwrap();
            assert_eq!(b, [i]);
        }
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut eps = SoftSwitch::endpoints(2);
        let c1 = eps.pop().unwrap();
        let c0 = eps.pop().unwrap();

        c0.send(&[0u8; 4], 1, 1).unwrap();
        let mut b = [0u8; 8];
        match c1.recv(&mut b, 0, 1) {
            Err(CommError::TruncatedMessage { want: 8, got: 4 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn disconnected_peer_is_an_error() {
        let mut eps = SoftSwitch::endpoints(2);
        let c1 = eps.pop().unwrap();
        let c0 = eps.pop().unwrap();
        drop(c1);

        let mut b = [0u8; 1];
        match c0.recv(&mut b, 1, 0) {
            Err(CommError::Disconnected(1)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rank_bounds_checked() {
        let eps = SoftSwitch::endpoints(2);
        match eps[0].send(&[0], 5, 0) {
            Err(CommError::RankOutOfRange { rank: 5, size: 2 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn barrier_releases_all() {
        let eps = SoftSwitch::endpoints(4);
        let handles: Vec<_> = eps
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    c.barrier();
                    c.wtime()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap() >= 0.0);
        }
    }
}
