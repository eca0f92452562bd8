//! Remeshing: evaluate the wavelet refinement criterion against the
//! position/time tolerance, rebuild and rebalance the octree, repartition,
//! reconstruct the mesh, and carry the solution across. Octants that
//! survive unchanged are copied verbatim; refined regions are prolonged
//! from the old lattice and coarsened regions restricted from their
//! children, with payloads crossing ranks when ownership moves. Every
//! remesh ends by force-reallocating the derivative workspace: a stale
//! workspace under new block sizes is a correctness bug.

use log::info;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::exchange;
use crate::field::{Field, FieldSet};
use crate::mesh::{self, Mesh, TAG_TRANSFER};
use crate::message::comm::Communicator;
use crate::message::mail::{self, Mailbox};
use crate::octant::Octant;
use crate::octree::{self, RefineFlag};
use crate::physics::PhysicsModel;
use crate::rhs::Evolution;
use crate::transfer;
use crate::wavelet;

/// A full target lattice for one new octant.
const MODE_COPY: u8 = 0;
/// A child lattice to be restricted into one sub-region of a new parent.
const MODE_RESTRICT: u8 = 1;

#[derive(Serialize, Deserialize)]
struct TransferPayload {
    /// Index of the target octant in the new global list.
    target: u64,
    mode: u8,
    /// Child number, for the restrict mode.
    child: u8,
    /// Field-major node data.
    data: Vec<f64>,
}

impl<P: PhysicsModel> Evolution<P> {
    /// Evaluate the refinement criterion and rebuild the mesh if any octant
    /// changes. Returns whether the mesh changed. Collective.
    pub fn remesh<C: Communicator>(&mut self, comm: &C, diag: &mut Diagnostics) -> bool {
        let flags = self.wavelet_flags();
        self.remesh_with_flags(comm, diag, flags)
    }

    /// Remesh with caller-supplied flags, one per local octant. This is
    /// also the driver-forced path (refine everything, rebuild after a
    /// restart, and the unit tests).
    pub fn remesh_with_flags<C: Communicator>(
        &mut self,
        comm: &C,
        diag: &mut Diagnostics,
        flags: Vec<RefineFlag>,
    ) -> bool {
        assert_eq!(flags.len(), self.mesh.num_local_elements());
        let domain = *self.mesh.domain();

        diag.remesh.start();

        // Assemble the global flag vector: every rank contributes the flags
        // of its own range, keyed by global octant index.
        let my_start = self.parts[comm.rank()].start;
        let pairs: Vec<(u64, u8)> = flags
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let code = match f {
                    RefineFlag::Refine => 1u8,
                    RefineFlag::Coarsen => 2,
                    RefineFlag::Keep => 0,
                };
                ((my_start + i) as u64, code)
            })
            .collect();
        let mine = rmp_serde::encode::to_vec(&pairs).unwrap();
        let folded = comm.all_reduce(
            |a, b| {
                let mut av: Vec<(u64, u8)> = rmp_serde::decode::from_slice(&a).unwrap();
                let bv: Vec<(u64, u8)> = rmp_serde::decode::from_slice(&b).unwrap();
                av.extend(bv);
                rmp_serde::encode::to_vec(&av).unwrap()
            },
            mine,
        );
        let pairs: Vec<(u64, u8)> = rmp_serde::decode::from_slice(&folded).unwrap();

        let mut global_flags = vec![RefineFlag::Keep; self.octants.len()];
        for (at, code) in pairs {
            global_flags[at as usize] = match code {
                1 => RefineFlag::Refine,
                2 => RefineFlag::Coarsen,
                _ => RefineFlag::Keep,
            };
        }

        let mut next = octree::apply_flags(&self.octants, &global_flags, domain.max_depth);
        octree::sort_and_unique(&mut next);
        let next = octree::balance_2to1(next, domain.max_depth);

        if next == self.octants {
            diag.remesh.stop();
            return false;
        }
        let next_parts = octree::partition(&next, comm.size());
        diag.remesh.stop();

        diag.mesh_build.start();
        let next_mesh = Mesh::build(
            comm,
            domain,
            &next,
            &next_parts,
            self.config.elems_per_dim,
            self.config.padding,
        );
        diag.mesh_build.stop();

        diag.transfer.start();
        let mut next_state = FieldSet::zeros(next_mesh.num_total_nodes());
        self.transfer_state(comm, &next, &next_parts, &next_mesh, &mut next_state);
        diag.transfer.stop();

        info!(
            "rank {}: remesh {} -> {} global elements at step {}",
            comm.rank(),
            self.octants.len(),
            next.len(),
            self.step
        );

        self.octants = next;
        self.parts = next_parts;
        self.mesh = next_mesh;
        self.state = next_state;
        self.unzipped = FieldSet::zeros(self.mesh.unzip_len());
        self.unzipped_rhs = FieldSet::zeros(self.mesh.unzip_len());

        // Block footprints may have changed; the workspace is invalid until
        // re-allocated, unconditionally.
        self.workspace.allocate(&self.mesh, self.config.safety_factor);

        exchange::ghost_exchange(comm, &self.mesh, &mut self.state);
        true
    }

    /// One refine/coarsen/keep flag per local octant: the max wavelet
    /// detail over all variables against the tolerance at the octant
    /// center. Coarsening stops at the base tiling level.
    pub fn wavelet_flags(&self) -> Vec<RefineFlag> {
        let e = self.mesh.elems();
        let npe = self.mesh.nodes_per_element();
        let domain = self.mesh.domain();
        let max_depth = domain.max_depth;

        self.mesh
            .local_range()
            .map(|pos| {
                let o = &self.mesh.all_octants()[pos];
                let node0 = self.mesh.node_offset(pos);

                let mut detail = 0f64;
                for &f in Field::ALL.iter() {
                    let nodes = &self.state.field(f)[node0..node0 + npe];
                    detail = detail.max(wavelet::wavelet_error(nodes, e));
                }
                let tol = self.policy.tolerance(domain, o.center(max_depth), self.time);

                if detail > tol && o.level() < max_depth {
                    RefineFlag::Refine
                } else if detail < self.config.coarsen_factor * tol
                    && o.level() > self.config.reg_lev
                {
                    RefineFlag::Coarsen
                } else {
                    RefineFlag::Keep
                }
            })
            .collect()
    }

    /// Move the zipped state from the current mesh onto a new one. Each
    /// rank walks its old local octants, resolves the new leaves covering
    /// each region, computes the target lattices (copy, prolong, or a
    /// child's restriction quota), and delivers them locally or by message
    /// to the new owner.
    fn transfer_state<C: Communicator>(
        &self,
        comm: &C,
        next: &[Octant],
        next_parts: &[std::ops::Range<usize>],
        next_mesh: &Mesh,
        out: &mut FieldSet,
    ) {
        let e = self.mesh.elems();
        let npe = self.mesh.nodes_per_element();
        let max_depth = self.mesh.domain().max_depth;
        let rank = comm.rank();
        let npes = comm.size();

        let owner_of = |global: usize| {
            next_parts
                .iter()
                .position(|r| r.contains(&global))
                .unwrap()
        };

        let mut counts = vec![0u64; npes];
        let mut outbound: Vec<(usize, TransferPayload)> = Vec::new();
        let mut inbox_local: Vec<TransferPayload> = Vec::new();

        let mut deliver = |payload: TransferPayload| {
            let owner = owner_of(payload.target as usize);
            if owner == rank {
                inbox_local.push(payload);
            } else {
                counts[owner] += 1;
                outbound.push((owner, payload));
            }
        };

        for pos in self.mesh.local_range() {
            let o = self.mesh.all_octants()[pos];
            let node0 = self.mesh.node_offset(pos);
            let old_data = |f: Field| &self.state.field(f)[node0..node0 + npe];

            let hits = mesh::overlapping_leaves(next, &o, max_depth);
            if hits.len() == 1 {
                let target = hits.start;
                let t = &next[target];
                if t.level() == o.level() {
                    // Unchanged octant: identity copy, no DOF dropped or
                    // duplicated.
                    let mut data = Vec::with_capacity(Field::COUNT * npe);
                    for &f in Field::ALL.iter() {
                        data.extend_from_slice(old_data(f));
                    }
                    deliver(TransferPayload {
                        target: target as u64,
                        mode: MODE_COPY,
                        child: 0,
                        data,
                    });
                } else {
                    // Coarsened: this octant owes one eighth of the new
                    // parent's lattice.
                    debug_assert_eq!(t.level() + 1, o.level());
                    let mut data = Vec::with_capacity(Field::COUNT * npe);
                    for &f in Field::ALL.iter() {
                        data.extend_from_slice(old_data(f));
                    }
                    deliver(TransferPayload {
                        target: target as u64,
                        mode: MODE_RESTRICT,
                        child: o.child_number(max_depth) as u8,
                        data,
                    });
                }
            } else {
                // Refined (possibly by more than one level once balancing
                // has rippled): prolong a full lattice for every new leaf
                // inside this octant.
                for target in hits {
                    let t = &next[target];
                    let ratio = (1u32 << (t.level() - o.level())) as f64;
                    let cs_old = o.edge_len(max_depth) as f64 / e as f64;
                    let rel = [
                        (t.x() - o.x()) as f64 / cs_old,
                        (t.y() - o.y()) as f64 / cs_old,
                        (t.z() - o.z()) as f64 / cs_old,
                    ];
                    let mut data = Vec::with_capacity(Field::COUNT * npe);
                    for &f in Field::ALL.iter() {
                        let mut fine = vec![0.0; npe];
                        transfer::resample_descendant(old_data(f), e, rel, ratio, &mut fine);
                        data.extend_from_slice(&fine);
                    }
                    deliver(TransferPayload {
                        target: target as u64,
                        mode: MODE_COPY,
                        child: 0,
                        data,
                    });
                }
            }
        }

        let expect = mail::exchange_counts(comm, &counts);
        for (peer, payload) in outbound {
            mail::post(comm, peer, TAG_TRANSFER, &payload);
        }

        for payload in inbox_local {
            apply_payload(next_mesh, next_parts, rank, &payload, out);
        }

        let total: u64 = expect.iter().sum();
        let mut mailbox = Mailbox::new();
        for _ in 0..total {
            let (_, payload): (usize, TransferPayload) = mailbox.recv(comm, TAG_TRANSFER);
            apply_payload(next_mesh, next_parts, rank, &payload, out);
        }
        mailbox.release(comm);
    }
}

/// Place one received lattice into the new zipped state.
fn apply_payload(
    next_mesh: &Mesh,
    next_parts: &[std::ops::Range<usize>],
    rank: usize,
    payload: &TransferPayload,
    out: &mut FieldSet,
) {
    let e = next_mesh.elems();
    let npe = next_mesh.nodes_per_element();
    let pos = next_mesh.local_range().start + (payload.target as usize - next_parts[rank].start);
    let node0 = next_mesh.node_offset(pos);

    for (fi, &f) in Field::ALL.iter().enumerate() {
        let data = &payload.data[fi * npe..(fi + 1) * npe];
        let dst = &mut out.field_mut(f)[node0..node0 + npe];
        match payload.mode {
            MODE_RESTRICT => transfer::restrict_child(data, e, payload.child as u32, dst),
            _ => dst.copy_from_slice(data),
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::diagnostics::Diagnostics;
    use crate::message::local::channel_group;
    use crate::physics;
    use std::thread;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.domain_min = [-4.0; 3];
        config.domain_max = [4.0; 3];
        config.max_depth = 4;
        config.reg_lev = 1;
        config.elems_per_dim = 4;
        config
    }

    #[test]
    fn keep_flags_leave_the_mesh_untouched() {
        let config = small_config();
        let comm = channel_group(1).pop().unwrap();
        let physics = physics::from_config(&config).unwrap();
        let mut diag = Diagnostics::new();
        let mut ev = Evolution::new(&comm, config, physics, &mut diag).unwrap();

        let before = ev.state().clone();
        let flags = vec![RefineFlag::Keep; ev.mesh().num_local_elements()];
        assert!(!ev.remesh_with_flags(&comm, &mut diag, flags));
        for &f in Field::ALL.iter() {
            assert_eq!(ev.state().field(f), before.field(f));
        }
    }

    #[test]
    fn refine_then_coarsen_round_trips_a_constant() {
        let config = small_config();
        let comm = channel_group(1).pop().unwrap();
        let physics = physics::from_config(&config).unwrap();
        let mut diag = Diagnostics::new();
        let mut ev = Evolution::new(&comm, config, physics, &mut diag).unwrap();

        // Overwrite the state with a constant; it transfers exactly in
        // both directions.
        ev.state.fill(2.5);
        let elements = ev.mesh().num_global_elements();

        let flags = vec![RefineFlag::Refine; ev.mesh().num_local_elements()];
        assert!(ev.remesh_with_flags(&comm, &mut diag, flags));
        assert_eq!(ev.mesh().num_global_elements(), elements * 8);
        for &f in Field::ALL.iter() {
            assert!(ev.state().field(f).iter().all(|&v| v == 2.5));
        }

        let flags = vec![RefineFlag::Coarsen; ev.mesh().num_local_elements()];
        assert!(ev.remesh_with_flags(&comm, &mut diag, flags));
        assert_eq!(ev.mesh().num_global_elements(), elements);
        for &f in Field::ALL.iter() {
            assert!(ev.state().field(f).iter().all(|&v| v == 2.5));
        }
    }

    #[test]
    fn transfer_crosses_ranks_when_ownership_moves() {
        let config = small_config();
        let handles: Vec<_> = channel_group(2)
            .into_iter()
            .map(|comm| {
                let config = config.clone();
                thread::spawn(move || {
                    let physics = physics::from_config(&config).unwrap();
                    let mut diag = Diagnostics::new();
                    let mut ev = Evolution::new(&comm, config, physics, &mut diag).unwrap();
                    ev.state.fill(-1.5);
                    // Refining only rank 0's half skews the weights, so the
                    // repartition moves octants across the rank boundary
                    // and some payloads must travel.
                    let flag = if comm.rank() == 0 {
                        RefineFlag::Refine
                    } else {
                        RefineFlag::Keep
                    };
                    let flags = vec![flag; ev.mesh().num_local_elements()];
                    assert!(ev.remesh_with_flags(&comm, &mut diag, flags));
                    for &f in Field::ALL.iter() {
                        assert!(ev.state().field(f).iter().all(|&v| v == -1.5));
                    }
                    ev.mesh().num_local_elements()
                })
            })
            .collect();
        let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Four octants refined into eight children each, four kept.
        assert_eq!(counts.iter().sum::<usize>(), 4 * 8 + 4);
    }

    #[test]
    fn wavelet_criterion_refines_the_pulse_region() {
        let mut config = small_config();
        config.elems_per_dim = 8;
        config.wavelet_tol = 1e-4;
        let comm = channel_group(1).pop().unwrap();
        let physics = physics::from_config(&config).unwrap();
        let mut diag = Diagnostics::new();
        let mut ev = Evolution::new(&comm, config, physics, &mut diag).unwrap();

        // The dipole pulse is centered at the origin; the criterion must
        // refine there before it refines the far field.
        let flags = ev.wavelet_flags();
        let refined: Vec<_> = ev
            .mesh()
            .local_octants()
            .iter()
            .zip(&flags)
            .filter(|(_, f)| **f == RefineFlag::Refine)
            .map(|(o, _)| *o)
            .collect();
        assert!(!refined.is_empty());

        let domain = *ev.mesh().domain();
        for o in &refined {
            let c = domain.position(o.center(domain.max_depth));
            let r = (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
            assert!(r < 4.0, "far-field octant refined at r = {}", r);
        }

        assert!(ev.remesh(&comm, &mut diag));
        assert!(ev.mesh().num_global_elements() > 8);
    }
}
