use crossbeam_channel::{Receiver, Sender};

use super::comm::Communicator;

/// A group of in-process communicators connected by crossbeam channels: one
/// unbounded channel per rank, every peer holding a sender clone. This is
/// the transport used by the unit tests and the multi-rank demo, where each
/// rank runs on its own thread inside one process. Requeued messages go
/// back through the rank's own sender, so they reappear on a later `recv`.
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
}

/// Wire up a fully connected group of `size` communicators. Hand one to
/// each rank thread.
pub fn channel_group(size: usize) -> Vec<ChannelCommunicator> {
    let mut senders = Vec::with_capacity(size);
    let mut inboxes = Vec::with_capacity(size);
    for _ in 0..size {
        let (tx, rx) = crossbeam_channel::unbounded();
        senders.push(tx);
        inboxes.push(rx);
    }
    inboxes
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| ChannelCommunicator {
            rank,
            peers: senders.clone(),
            inbox,
        })
        .collect()
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.peers[rank].send(message).unwrap()
    }

    fn recv(&self) -> Vec<u8> {
        self.inbox.recv().unwrap()
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.peers[self.rank].send(bytes).unwrap()
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::channel_group;
    use crate::message::comm::{self, Communicator};
    use std::thread;

    #[test]
    fn ring_passes_messages() {
        let comms = channel_group(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let dest = (comm.rank() + 1) % comm.size();
                    comm.send(dest, vec![comm.rank() as u8]);
                    let got = comm.recv();
                    assert_eq!(got[0] as usize, (comm.rank() + comm.size() - 1) % comm.size());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap()
        }
    }

    #[test]
    fn typed_collectives_agree_on_all_ranks() {
        let comms = channel_group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let sum = comm::all_sum_f64(&comm, comm.rank() as f64 + 1.0);
                    assert_eq!(sum, 6.0);
                    let max = comm::all_max_f64(&comm, comm.rank() as f64);
                    assert_eq!(max, 2.0);
                    let stats = comm::stat_f64(&comm, comm.rank() as f64);
                    assert_eq!(stats, [0.0, 1.0, 2.0]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap()
        }
    }
}
