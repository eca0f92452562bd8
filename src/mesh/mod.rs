//! The distributed mesh over a partitioned linear octree: every rank owns a
//! contiguous SFC range of octants, replicates the neighboring octants of
//! other ranks as a read-only ghost layer, numbers the degrees of freedom of
//! the compact ("zipped") vector, and lays out one padded block per local
//! octant for the dense ("unzipped") stencil representation.

pub mod block;
pub mod unzip;

use std::collections::BTreeSet;
use std::ops::Range;

use log::debug;

use crate::message::comm::Communicator;
use crate::message::mail::{self, Mailbox};
use crate::octant::{Domain, Octant};
use crate::octree;

pub use block::Block;

/// Tag of the ghost-map request round run during mesh construction.
pub const TAG_GHOST_REQUEST: u32 = 1;
/// Tag of per-step ghost node payloads.
pub const TAG_GHOST_DATA: u32 = 2;
/// Tag of grid-transfer payloads during remeshing.
pub const TAG_TRANSFER: u32 = 3;

pub struct Mesh {
    domain: Domain,
    elems: usize,
    padding: usize,
    rank: usize,
    npes: usize,
    /// Pre-ghost, local and post-ghost octants in one sorted list.
    all: Vec<Octant>,
    /// Positions of the locally owned range within `all`.
    local: Range<usize>,
    /// One padded block per local octant, offsets cumulative.
    blocks: Vec<Block>,
    unzip_len: usize,
    /// For each peer we owe data: the positions (into `all`) of the local
    /// octants it asked for, in the order it asked for them.
    send_map: Vec<(usize, Vec<usize>)>,
    /// For each peer that owes us data: the positions (into `all`) of the
    /// ghost octants we asked for, ascending.
    recv_map: Vec<(usize, Vec<usize>)>,
    num_global_elements: usize,
}

impl Mesh {
    /// Build the rank-local view of a globally sorted, balanced, complete
    /// linear octree split by `parts`. Collective: every rank (including
    /// ranks assigned an empty range) must call this, because the ghost
    /// send maps are established by a request round over the communicator.
    pub fn build<C: Communicator>(
        comm: &C,
        domain: Domain,
        octants: &[Octant],
        parts: &[Range<usize>],
        elems: usize,
        padding: usize,
    ) -> Mesh {
        let rank = comm.rank();
        let npes = comm.size();
        let mine = parts[rank].clone();

        // Every leaf overlapping the 26-neighborhood of a local octant and
        // owned elsewhere becomes a ghost.
        let mut ghost: BTreeSet<usize> = BTreeSet::new();
        for g in mine.clone() {
            let o = &octants[g];
            for n in o.all_neighbors(domain.max_depth) {
                for idx in overlapping_leaves(octants, &n, domain.max_depth) {
                    if !mine.contains(&idx) {
                        ghost.insert(idx);
                    }
                }
            }
        }

        let pre: Vec<usize> = ghost.iter().copied().filter(|&i| i < mine.start).collect();
        let post: Vec<usize> = ghost.iter().copied().filter(|&i| i >= mine.end).collect();

        let mut global_of: Vec<usize> = Vec::with_capacity(pre.len() + mine.len() + post.len());
        global_of.extend(&pre);
        global_of.extend(mine.clone());
        global_of.extend(&post);

        let all: Vec<Octant> = global_of.iter().map(|&i| octants[i]).collect();
        let local = pre.len()..pre.len() + mine.len();

        // Group ghosts by owner; the ascending global order within each
        // peer is the payload order both sides agree on.
        let owner_of = |global: usize| parts.iter().position(|r| r.contains(&global)).unwrap();
        let mut recv_map: Vec<(usize, Vec<usize>)> = Vec::new();
        for (pos, &global) in global_of
            .iter()
            .enumerate()
            .filter(|(pos, _)| !local.contains(pos))
        {
            let owner = owner_of(global);
            match recv_map.iter_mut().find(|(peer, _)| *peer == owner) {
                Some((_, list)) => list.push(pos),
                None => recv_map.push((owner, vec![pos])),
            }
        }
        recv_map.sort_by_key(|(peer, _)| *peer);

        // Request round: tell each owner which of its octants we need, and
        // learn which of ours the peers need. The count matrix keeps the
        // number of receives deterministic on every rank.
        let mut sends = vec![0u64; npes];
        for (peer, _) in &recv_map {
            sends[*peer] = 1;
        }
        let expect = mail::exchange_counts(comm, &sends);

        for (peer, positions) in &recv_map {
            let globals: Vec<u64> = positions.iter().map(|&p| global_of[p] as u64).collect();
            mail::post(comm, *peer, TAG_GHOST_REQUEST, &globals);
        }

        let mut mailbox = Mailbox::new();
        let total_requests: u64 = expect.iter().sum();
        let mut send_map: Vec<(usize, Vec<usize>)> = Vec::new();
        for _ in 0..total_requests {
            let (from, globals): (usize, Vec<u64>) = mailbox.recv(comm, TAG_GHOST_REQUEST);
            let positions = globals
                .iter()
                .map(|&g| local.start + (g as usize - mine.start))
                .collect();
            send_map.push((from, positions));
        }
        mailbox.release(comm);
        send_map.sort_by_key(|(peer, _)| *peer);

        // Lay out one block per local octant.
        let mut blocks = Vec::with_capacity(local.len());
        let mut offset = 0;
        for pos in local.clone() {
            let b = Block::new(all[pos], elems, padding, offset, &domain);
            offset += b.alloc_len();
            blocks.push(b);
        }

        debug!(
            "rank {}: {} local, {} pre-ghost, {} post-ghost octants, {} unzip dof",
            rank,
            local.len(),
            pre.len(),
            post.len(),
            offset
        );

        Mesh {
            domain,
            elems,
            padding,
            rank,
            npes,
            all,
            local,
            blocks,
            unzip_len: offset,
            send_map,
            recv_map,
            num_global_elements: octants.len(),
        }
    }

    /// Whether this rank owns any octants. Inactive ranks skip all local
    /// work but still enter collective calls with identity contributions.
    pub fn is_active(&self) -> bool {
        !self.local.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn npes(&self) -> usize {
        self.npes
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn elems(&self) -> usize {
        self.elems
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Nodes carried by each octant.
    pub fn nodes_per_element(&self) -> usize {
        self.elems * self.elems * self.elems
    }

    pub fn num_local_elements(&self) -> usize {
        self.local.len()
    }

    pub fn num_ghost_elements(&self) -> usize {
        self.all.len() - self.local.len()
    }

    pub fn num_global_elements(&self) -> usize {
        self.num_global_elements
    }

    /// Length of a zipped vector: local plus ghost nodes.
    pub fn num_total_nodes(&self) -> usize {
        self.all.len() * self.nodes_per_element()
    }

    pub fn num_local_nodes(&self) -> usize {
        self.local.len() * self.nodes_per_element()
    }

    /// Length of an unzipped vector.
    pub fn unzip_len(&self) -> usize {
        self.unzip_len
    }

    /// All octants visible to this rank, ghosts included, SFC sorted.
    pub fn all_octants(&self) -> &[Octant] {
        &self.all
    }

    pub fn local_octants(&self) -> &[Octant] {
        &self.all[self.local.clone()]
    }

    /// Position range of the local octants within `all_octants`.
    pub fn local_range(&self) -> Range<usize> {
        self.local.clone()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// First zipped node slot of the octant at `pos` in `all_octants`.
    pub fn node_offset(&self, pos: usize) -> usize {
        pos * self.nodes_per_element()
    }

    /// Largest padded block footprint, which sizes the derivative
    /// workspace. Zero on an inactive rank.
    pub fn max_block_len(&self) -> usize {
        self.blocks.iter().map(Block::alloc_len).max().unwrap_or(0)
    }

    /// The leaf (by position in `all_octants`) containing a grid point, if
    /// it is visible to this rank.
    pub fn leaf_containing(&self, p: [u32; 3]) -> Option<usize> {
        octree::leaf_index_containing(&self.all, p, self.domain.max_depth)
    }

    pub fn send_map(&self) -> &[(usize, Vec<usize>)] {
        &self.send_map
    }

    pub fn recv_map(&self) -> &[(usize, Vec<usize>)] {
        &self.recv_map
    }
}

/// The leaves of a sorted complete linear octree overlapping the region of
/// `probe` (an octant-shaped region, not necessarily a leaf). Either one
/// coarser-or-equal leaf contains the whole region, or the region is tiled
/// by a contiguous key range of finer leaves.
pub fn overlapping_leaves(octants: &[Octant], probe: &Octant, max_depth: u32) -> Range<usize> {
    if let Some(at) = octree::leaf_index_containing(octants, probe.anchor(), max_depth) {
        let leaf = &octants[at];
        if leaf.level() <= probe.level() {
            return at..at + 1;
        }
    }
    let (lo, hi) = probe.descendant_key_range(max_depth);
    let start = octants.partition_point(|o| o.key() < lo);
    let end = octants.partition_point(|o| o.key() <= hi);
    start..end
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::message::local::channel_group;
    use crate::octant::Domain;
    use crate::octree::{self, RefineFlag};
    use std::thread;

    fn domain(max_depth: u32) -> Domain {
        Domain {
            max_depth,
            min: [-1.0; 3],
            max: [1.0; 3],
        }
    }

    fn uniform_octree(domain: &Domain, lev: u32) -> Vec<Octant> {
        let mut o = octree::block_adaptive_octree(domain, [-1.0; 3], [1.0; 3], lev);
        octree::sort_and_unique(&mut o);
        o
    }

    #[test]
    fn single_rank_mesh_has_no_ghosts() {
        let domain = domain(4);
        let octants = uniform_octree(&domain, 2);
        let parts = octree::partition(&octants, 1);
        let comm = channel_group(1).pop().unwrap();

        let mesh = Mesh::build(&comm, domain, &octants, &parts, 4, 3);
        assert!(mesh.is_active());
        assert_eq!(mesh.num_local_elements(), 64);
        assert_eq!(mesh.num_ghost_elements(), 0);
        assert_eq!(mesh.num_total_nodes(), 64 * 64);
        assert_eq!(mesh.unzip_len(), 64 * 10 * 10 * 10);
        assert!(mesh.send_map().is_empty() && mesh.recv_map().is_empty());
    }

    #[test]
    fn block_offsets_are_cumulative() {
        let domain = domain(4);
        let octants = uniform_octree(&domain, 1);
        let parts = octree::partition(&octants, 1);
        let comm = channel_group(1).pop().unwrap();

        let mesh = Mesh::build(&comm, domain, &octants, &parts, 4, 3);
        let mut expect = 0;
        for b in mesh.blocks() {
            assert_eq!(b.offset(), expect);
            expect += b.alloc_len();
        }
        assert_eq!(mesh.unzip_len(), expect);
    }

    #[test]
    fn two_ranks_agree_on_ghost_maps() {
        let domain = domain(4);
        let octants = uniform_octree(&domain, 2);
        let parts = octree::partition(&octants, 2);

        let handles: Vec<_> = channel_group(2)
            .into_iter()
            .map(|comm| {
                let octants = octants.clone();
                let parts = parts.clone();
                let domain = domain.clone();
                thread::spawn(move || Mesh::build(&comm, domain, &octants, &parts, 4, 3))
            })
            .collect();
        let meshes: Vec<Mesh> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Each rank's receive list must match the peer's send list length.
        let recv0: usize = meshes[0].recv_map().iter().map(|(_, l)| l.len()).sum();
        let send1: usize = meshes[1].send_map().iter().map(|(_, l)| l.len()).sum();
        assert_eq!(recv0, send1);
        assert!(recv0 > 0);

        let recv1: usize = meshes[1].recv_map().iter().map(|(_, l)| l.len()).sum();
        let send0: usize = meshes[0].send_map().iter().map(|(_, l)| l.len()).sum();
        assert_eq!(recv1, send0);

        // Both ranks cover the full octree between local and ghost parts.
        for mesh in &meshes {
            assert_eq!(
                mesh.num_local_elements() + mesh.num_ghost_elements(),
                mesh.all_octants().len()
            );
        }
        assert_eq!(
            meshes[0].num_local_elements() + meshes[1].num_local_elements(),
            64
        );
    }

    #[test]
    fn overlapping_leaves_handles_both_directions() {
        let domain = domain(3);
        let octants = uniform_octree(&domain, 1);
        let flags: Vec<_> = octants
            .iter()
            .map(|o| {
                if o.anchor() == [0, 0, 0] {
                    RefineFlag::Refine
                } else {
                    RefineFlag::Keep
                }
            })
            .collect();
        let mut octants = octree::apply_flags(&octants, &flags, 3);
        octree::sort_and_unique(&mut octants);
        assert_eq!(octants.len(), 15);

        // Probing the refined corner at the coarse level returns all eight
        // children; probing a coarse region from a child returns one leaf.
        let coarse_probe = Octant::new(0, 0, 0, 1, 3);
        assert_eq!(overlapping_leaves(&octants, &coarse_probe, 3).len(), 8);

        let fine_probe = Octant::new(4, 0, 0, 2, 3);
        let hits = overlapping_leaves(&octants, &fine_probe, 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(octants[hits.start].level(), 1);
    }

    #[test]
    fn inactive_rank_participates_without_octants() {
        let domain = domain(3);
        let octants = uniform_octree(&domain, 0);
        assert_eq!(octants.len(), 1);
        let parts = octree::partition(&octants, 3);

        let handles: Vec<_> = channel_group(3)
            .into_iter()
            .map(|comm| {
                let octants = octants.clone();
                let parts = parts.clone();
                let domain = domain.clone();
                thread::spawn(move || {
                    let mesh = Mesh::build(&comm, domain, &octants, &parts, 4, 3);
                    (comm.rank(), mesh.is_active())
                })
            })
            .collect();
        let states: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(states.iter().filter(|(_, active)| *active).count(), 1);
    }
}
