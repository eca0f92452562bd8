use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::comm::Communicator;

/// A tagged point-to-point message. The mesh engine runs several distinct
/// point-to-point phases (ghost requests, ghost payloads, grid-transfer
/// payloads); the tag keeps a late message from one phase from being
/// consumed by another, and `from` identifies the sender, which a bare
/// `Communicator::recv` does not.
#[derive(Serialize, Deserialize)]
pub struct Envelope {
    pub from: usize,
    pub tag: u32,
    pub bytes: Vec<u8>,
}

/// Serialize `payload` into an envelope and send it to `to`.
pub fn post<C, T>(comm: &C, to: usize, tag: u32, payload: &T)
where
    C: Communicator + ?Sized,
    T: Serialize,
{
    let envelope = Envelope {
        from: comm.rank(),
        tag,
        bytes: rmp_serde::encode::to_vec(payload).unwrap(),
    };
    comm.send(to, rmp_serde::encode::to_vec(&envelope).unwrap());
}

/// Selective receiver for one point-to-point phase. Envelopes with the
/// wrong tag are parked rather than dropped; `release` hands anything still
/// parked back to the communicator when the phase ends.
pub struct Mailbox {
    pending: Vec<Envelope>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Block until an envelope with the given tag arrives, and decode its
    /// payload. Returns the sender rank alongside.
    pub fn recv<C, T>(&mut self, comm: &C, tag: u32) -> (usize, T)
    where
        C: Communicator + ?Sized,
        T: DeserializeOwned,
    {
        if let Some(at) = self.pending.iter().position(|e| e.tag == tag) {
            // Plain remove keeps parked envelopes in arrival order, so two
            // same-tag messages from one peer are never consumed out of
            // order.
            let envelope = self.pending.remove(at);
            return (
                envelope.from,
                rmp_serde::decode::from_slice(&envelope.bytes).unwrap(),
            );
        }
        loop {
            let bytes = comm.recv();
            let envelope: Envelope = rmp_serde::decode::from_slice(&bytes).unwrap();
            if envelope.tag == tag {
                return (
                    envelope.from,
                    rmp_serde::decode::from_slice(&envelope.bytes).unwrap(),
                );
            }
            self.pending.push(envelope);
        }
    }

    /// Return parked envelopes to the communicator for a later phase.
    pub fn release<C>(self, comm: &C)
    where
        C: Communicator + ?Sized,
    {
        for envelope in self.pending {
            comm.requeue_recv(rmp_serde::encode::to_vec(&envelope).unwrap());
        }
    }
}

/// All-to-all exchange of per-peer message counts: every rank supplies how
/// many point-to-point messages it is about to send to each peer, and
/// learns how many it should expect from each. Built on the elementwise sum
/// of an `npes x npes` matrix in which each rank fills its own row, so
/// inactive ranks participate with a zero row.
pub fn exchange_counts<C>(comm: &C, sends: &[u64]) -> Vec<u64>
where
    C: Communicator + ?Sized,
{
    let p = comm.size();
    let r = comm.rank();
    assert_eq!(sends.len(), p);

    let mut matrix = vec![0u64; p * p];
    matrix[r * p..(r + 1) * p].copy_from_slice(sends);

    let folded = comm.all_reduce(
        |a, b| {
            let mut av: Vec<u64> = rmp_serde::decode::from_slice(&a).unwrap();
            let bv: Vec<u64> = rmp_serde::decode::from_slice(&b).unwrap();
            for (x, y) in av.iter_mut().zip(bv) {
                *x += y;
            }
            rmp_serde::encode::to_vec(&av).unwrap()
        },
        rmp_serde::encode::to_vec(&matrix).unwrap(),
    );
    let matrix: Vec<u64> = rmp_serde::decode::from_slice(&folded).unwrap();

    (0..p).map(|peer| matrix[peer * p + r]).collect()
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{exchange_counts, post, Mailbox};
    use crate::message::comm::Communicator;
    use crate::message::local::channel_group;
    use std::thread;

    #[test]
    fn tags_separate_interleaved_phases() {
        let comms = channel_group(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let peer = 1 - comm.rank();
                    post(&comm, peer, 7, &vec![comm.rank() as u64]);
                    post(&comm, peer, 9, &vec![100 + comm.rank() as u64]);

                    // Drain the later phase first; the earlier message must
                    // survive parked and be delivered afterwards.
                    let mut mailbox = Mailbox::new();
                    let (from, late): (usize, Vec<u64>) = mailbox.recv(&comm, 9);
                    assert_eq!(from, peer);
                    assert_eq!(late, vec![100 + peer as u64]);
                    let (_, early): (usize, Vec<u64>) = mailbox.recv(&comm, 7);
                    assert_eq!(early, vec![peer as u64]);
                    mailbox.release(&comm);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap()
        }
    }

    #[test]
    fn count_matrix_reports_expected_receives() {
        let comms = channel_group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    // Rank r sends r messages to every other peer.
                    let mut sends = vec![comm.rank() as u64; comm.size()];
                    sends[comm.rank()] = 0;
                    let expect = exchange_counts(&comm, &sends);
                    for peer in 0..comm.size() {
                        let want = if peer == comm.rank() { 0 } else { peer as u64 };
                        assert_eq!(expect[peer], want);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap()
        }
    }
}
