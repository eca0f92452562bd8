//! Construction and maintenance of complete, sorted, 2:1-balanced linear
//! octrees. A linear octree is a flat, SFC-sorted list of leaf octants whose
//! regions tile the domain exactly. These are the generic sort / balance /
//! partition primitives the mesh layer is built on.

use std::collections::HashSet;

use crate::message::comm::Communicator;
use crate::octant::{Domain, Octant};

/// Flag produced by the refinement criterion for each local octant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RefineFlag {
    Refine,
    Coarsen,
    Keep,
}

/// Tile the bounding box `[pt_min, pt_max]` with octants at level `reg_lev`.
/// Physical corners are mapped onto the integer grid through the domain's
/// affine transform. A corner landing exactly on the far side of the grid is
/// clamped back to the last aligned anchor so every produced octant stays
/// in-bounds. The output is unsorted; feed it through `sort_and_unique`.
pub fn block_adaptive_octree(
    domain: &Domain,
    pt_min: [f64; 3],
    pt_max: [f64; 3],
    reg_lev: u32,
) -> Vec<Octant> {
    let side = domain.grid_side();
    let step = 1u32 << (domain.max_depth - reg_lev);

    let mut g_min = [0u32; 3];
    let mut g_max = [0u32; 3];
    for axis in 0..3 {
        let lo = domain.phys_to_grid(axis, pt_min[axis]);
        let hi = domain.phys_to_grid(axis, pt_max[axis]);
        assert!(lo >= 0.0 && lo <= side as f64);
        assert!(hi >= 0.0 && hi <= side as f64);
        g_min[axis] = lo.round() as u32;
        g_max[axis] = hi.round() as u32;
    }

    let mut octants = Vec::new();
    let mut x = g_min[0];
    while x < g_max[0] {
        let mut y = g_min[1];
        while y < g_max[1] {
            let mut z = g_min[2];
            while z < g_max[2] {
                let cx = if x >= side { side - step } else { x };
                let cy = if y >= side { side - step } else { y };
                let cz = if z >= side { side - step } else { z };
                octants.push(Octant::new(cx, cy, cz, reg_lev, domain.max_depth));
                z += step;
            }
            y += step;
        }
        x += step;
    }
    octants
}

/// Global SFC sort with duplicate removal.
pub fn sort_and_unique(octants: &mut Vec<Octant>) {
    octants.sort_by_key(|o| o.key());
    octants.dedup();
}

/// Index of the leaf containing the grid point `p`, in a sorted complete
/// linear octree. Returns `None` only if the list does not cover `p`.
pub fn leaf_index_containing(octants: &[Octant], p: [u32; 3], max_depth: u32) -> Option<usize> {
    let key = Octant::point_key(p);
    let at = match octants.binary_search_by_key(&key, |o| o.key()) {
        Ok(i) => i,
        Err(0) => return None,
        Err(i) => i - 1,
    };
    if octants[at].contains_point(p, max_depth) {
        Some(at)
    } else {
        None
    }
}

/// Enforce the 2:1 balance constraint: adjacent leaves may differ by at most
/// one level. Works by ripple propagation, splitting any leaf found more
/// than one level coarser than a neighbor until a fixed point is reached.
/// Input must be a sorted complete linear octree; the output is too.
pub fn balance_2to1(mut octants: Vec<Octant>, max_depth: u32) -> Vec<Octant> {
    loop {
        let mut to_split: HashSet<usize> = HashSet::new();

        for o in &octants {
            for n in o.all_neighbors(max_depth) {
                let at = leaf_index_containing(&octants, n.anchor(), max_depth)
                    .expect("balance input octree is not complete");
                // A leaf overlapping a same-level neighbor region either
                // contains it entirely or is contained by it, so one anchor
                // probe per neighbor is enough to detect a violation.
                if octants[at].level() + 1 < o.level() {
                    to_split.insert(at);
                }
            }
        }

        if to_split.is_empty() {
            return octants;
        }

        let mut next = Vec::with_capacity(octants.len() + 7 * to_split.len());
        for (i, o) in octants.iter().enumerate() {
            if to_split.contains(&i) {
                next.extend_from_slice(&o.children(max_depth));
            } else {
                next.push(*o);
            }
        }
        sort_and_unique(&mut next);
        octants = next;
    }
}

/// Check the 2:1 constraint. Test and debug helper.
pub fn is_balanced(octants: &[Octant], max_depth: u32) -> bool {
    octants.iter().all(|o| {
        o.all_neighbors(max_depth).iter().all(|n| {
            leaf_index_containing(octants, n.anchor(), max_depth)
                .map(|at| octants[at].level() + 1 >= o.level())
                .unwrap_or(false)
        })
    })
}

/// Apply refine/coarsen flags to a sorted linear octree. A flagged octant is
/// replaced by its eight children; a coarsen group collapses to the parent
/// only when all eight siblings are present, consecutive, and all flagged
/// (otherwise the flags downgrade to keep). The result is sorted and
/// complete but not rebalanced.
pub fn apply_flags(octants: &[Octant], flags: &[RefineFlag], max_depth: u32) -> Vec<Octant> {
    assert_eq!(octants.len(), flags.len());
    let mut out = Vec::with_capacity(octants.len());

    let mut i = 0;
    while i < octants.len() {
        let o = &octants[i];

        if flags[i] == RefineFlag::Coarsen && o.level() > 0 && o.child_number(max_depth) == 0 {
            let parent = o.parent(max_depth).unwrap();
            let group_ok = i + 8 <= octants.len()
                && (0..8).all(|k| {
                    flags[i + k] == RefineFlag::Coarsen
                        && octants[i + k].parent(max_depth) == Some(parent)
                });
            if group_ok {
                out.push(parent);
                i += 8;
                continue;
            }
        }

        match flags[i] {
            RefineFlag::Refine if o.level() < max_depth => {
                out.extend_from_slice(&o.children(max_depth))
            }
            _ => out.push(*o),
        }
        i += 1;
    }
    out
}

/// Load weight of one octant: finer octants carry exponentially more work
/// per unit volume.
pub fn octant_weight(o: &Octant) -> u64 {
    1u64 << (3 * o.level())
}

/// Split a sorted octant list into `num_ranks` contiguous SFC chunks with
/// approximately equal total weight. Ranks past the available work receive
/// empty ranges (the inactive-rank state).
pub fn partition(octants: &[Octant], num_ranks: usize) -> Vec<std::ops::Range<usize>> {
    let total: u64 = octants.iter().map(octant_weight).sum();
    let mut ranges = Vec::with_capacity(num_ranks);

    let mut begin = 0usize;
    let mut acc = 0u64;
    for r in 0..num_ranks {
        let target = total * (r as u64 + 1) / num_ranks as u64;
        let mut end = begin;
        while end < octants.len() && acc < target {
            acc += octant_weight(&octants[end]);
            end += 1;
        }
        ranges.push(begin..end);
        begin = end;
    }
    // Round-off may leave a tail; it belongs to the last rank.
    if begin < octants.len() {
        ranges.last_mut().unwrap().end = octants.len();
    }
    ranges
}

/// Gather every rank's local octants into one globally sorted list, present
/// identically on all ranks. Implemented over the communicator's byte-level
/// concat-reduce and broadcast, so inactive ranks participate with an empty
/// contribution. A deliberate simplification of a distributed sample sort;
/// see DESIGN.md.
pub fn gather_sorted<C: Communicator>(comm: &C, local: &[Octant]) -> Vec<Octant> {
    let mine = rmp_serde::encode::to_vec(&local.to_vec()).unwrap();
    let concat = |a: Vec<u8>, b: Vec<u8>| {
        let mut av: Vec<Octant> = rmp_serde::decode::from_slice(&a).unwrap();
        let bv: Vec<Octant> = rmp_serde::decode::from_slice(&b).unwrap();
        av.extend(bv);
        rmp_serde::encode::to_vec(&av).unwrap()
    };
    let all = comm.all_reduce(concat, mine);
    let mut octants: Vec<Octant> = rmp_serde::decode::from_slice(&all).unwrap();
    sort_and_unique(&mut octants);
    octants
}
