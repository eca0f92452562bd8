//! Ghost-layer synchronization. Each step, every rank ships the node values
//! of the local octants its peers replicated, and fills its own ghost node
//! slots from the matching payloads. The asynchronous form returns after
//! issuing sends so the caller can overlap the local half of the unzip with
//! the in-flight messages; `finish` is the explicit wait barrier, and no
//! ghost-dependent halo may be read before it returns.

use log::trace;

use crate::field::{Field, FieldSet};
use crate::mesh::{Mesh, TAG_GHOST_DATA};
use crate::message::comm::Communicator;
use crate::message::mail::{self, Mailbox};

/// Handle for an exchange in flight: the number of peer payloads that have
/// not arrived yet. Dropping it without calling `finish` would leave stale
/// ghost values, so the driver treats it as linear.
#[must_use]
pub struct Pending {
    outstanding: usize,
}

/// Issue all outbound ghost payloads and return immediately. A no-op with
/// nothing outstanding on an inactive rank.
pub fn begin<C: Communicator>(comm: &C, mesh: &Mesh, state: &FieldSet) -> Pending {
    let npe = mesh.nodes_per_element();

    for (peer, positions) in mesh.send_map() {
        let mut payload = Vec::with_capacity(Field::COUNT * positions.len() * npe);
        for &f in Field::ALL.iter() {
            let buf = state.field(f);
            for &pos in positions {
                let at = mesh.node_offset(pos);
                payload.extend_from_slice(&buf[at..at + npe]);
            }
        }
        trace!(
            "rank {}: ghost payload of {} octants to rank {}",
            mesh.rank(),
            positions.len(),
            peer
        );
        mail::post(comm, *peer, TAG_GHOST_DATA, &payload);
    }

    Pending {
        outstanding: mesh.recv_map().len(),
    }
}

/// Block until every contributing payload for this step has arrived, and
/// scatter each into the ghost node slots its octants occupy. Payload
/// order is the ascending global order both sides derived from the mesh
/// build, so no index list travels with the data.
pub fn finish<C: Communicator>(comm: &C, mesh: &Mesh, pending: Pending, state: &mut FieldSet) {
    let npe = mesh.nodes_per_element();
    let mut mailbox = Mailbox::new();

    for _ in 0..pending.outstanding {
        let (from, payload): (usize, Vec<f64>) = mailbox.recv(comm, TAG_GHOST_DATA);
        let positions = mesh
            .recv_map()
            .iter()
            .find(|(peer, _)| *peer == from)
            .map(|(_, list)| list)
            .expect("ghost payload from a rank not in the receive map");

        let mut at = 0;
        for &f in Field::ALL.iter() {
            let buf = state.field_mut(f);
            for &pos in positions {
                let dst = mesh.node_offset(pos);
                buf[dst..dst + npe].copy_from_slice(&payload[at..at + npe]);
                at += npe;
            }
        }
        assert_eq!(at, payload.len());
    }
    mailbox.release(comm);
}

/// The synchronous exchange: issue, then immediately wait.
pub fn ghost_exchange<C: Communicator>(comm: &C, mesh: &Mesh, state: &mut FieldSet) {
    let pending = begin(comm, mesh, state);
    finish(comm, mesh, pending, state);
}
