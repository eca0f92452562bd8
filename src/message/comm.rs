use super::mail::Envelope;
use super::util;

/// Tag reserved for collective traffic; the mesh engine's point-to-point
/// phases use nonzero tags.
pub const TAG_COLLECTIVE: u32 = 0;

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, UDP, shared
/// channels, or a higher level abstraction like MPI.
///
/// All engine traffic, collectives included, travels inside tagged
/// envelopes. A rank that runs ahead into its next phase can therefore
/// never confuse a peer: receives filter by tag and requeue whatever
/// belongs to another phase.
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately; it is not allowed to block until a matching
    /// receive is posted.
    fn send(&self, rank: usize, message: Vec<u8>);

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received.
    fn recv(&self) -> Vec<u8>;

    /// Requeue a received message which is not yet needed, so a later
    /// `recv` returns it again.
    fn requeue_recv(&self, bytes: Vec<u8>);

    /// Implements a binomial tree broadcast from rank 0. The message buffer
    /// must be `Some` on the root and `None` everywhere else.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => recv_collective(self),
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                send_collective(self, r + one, value.clone())
            }
        }
        value
    }

    /// Implements a binomial tree reduce over a commutative binary
    /// operator. All ranks return `None` except for rank 0. Correct for
    /// any group size, power of two or not.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Option<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, recv_collective(self))
                }
            } else {
                send_collective(self, r - one, value);
                return None;
            }
        }
        Some(value)
    }

    /// Implements an all-reduce (symmetric fold) over a commutative binary
    /// operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Vec<u8>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        self.broadcast(self.reduce(f, value))
    }
}

fn send_collective<C: Communicator + ?Sized>(comm: &C, to: usize, bytes: Vec<u8>) {
    let envelope = Envelope {
        from: comm.rank(),
        tag: TAG_COLLECTIVE,
        bytes,
    };
    comm.send(to, rmp_serde::encode::to_vec(&envelope).unwrap());
}

/// Receive the next collective payload, requeuing any point-to-point
/// envelope that arrives early for a phase this rank has not entered yet.
fn recv_collective<C: Communicator + ?Sized>(comm: &C) -> Vec<u8> {
    loop {
        let raw = comm.recv();
        let envelope: Envelope = rmp_serde::decode::from_slice(&raw).unwrap();
        if envelope.tag == TAG_COLLECTIVE {
            return envelope.bytes;
        }
        comm.requeue_recv(raw);
    }
}

// ============================================================================
// Typed reductions over the byte-level collectives. Inactive ranks call
// these with an identity contribution, which keeps every rank inside the
// collective and avoids deadlock.

fn fold_f64<C, F>(comm: &C, x: f64, f: F) -> f64
where
    C: Communicator + ?Sized,
    F: Fn(f64, f64) -> f64,
{
    let bytes = comm.all_reduce(
        |a, b| {
            let a = util::f64_from_le(&a);
            let b = util::f64_from_le(&b);
            f(a, b).to_le_bytes().to_vec()
        },
        x.to_le_bytes().to_vec(),
    );
    util::f64_from_le(&bytes)
}

pub fn all_sum_f64<C: Communicator + ?Sized>(comm: &C, x: f64) -> f64 {
    fold_f64(comm, x, |a, b| a + b)
}

pub fn all_min_f64<C: Communicator + ?Sized>(comm: &C, x: f64) -> f64 {
    fold_f64(comm, x, f64::min)
}

pub fn all_max_f64<C: Communicator + ?Sized>(comm: &C, x: f64) -> f64 {
    fold_f64(comm, x, f64::max)
}

pub fn all_sum_u64<C: Communicator + ?Sized>(comm: &C, x: u64) -> u64 {
    let bytes = comm.all_reduce(
        |a, b| {
            let a = util::u64_from_le(&a);
            let b = util::u64_from_le(&b);
            (a + b).to_le_bytes().to_vec()
        },
        x.to_le_bytes().to_vec(),
    );
    util::u64_from_le(&bytes)
}

/// Min, mean and max of a per-rank scalar, available on every rank. The
/// building block of the profile output.
pub fn stat_f64<C: Communicator + ?Sized>(comm: &C, x: f64) -> [f64; 3] {
    let min = all_min_f64(comm, x);
    let sum = all_sum_f64(comm, x);
    let max = all_max_f64(comm, x);
    [min, sum / comm.size() as f64, max]
}
