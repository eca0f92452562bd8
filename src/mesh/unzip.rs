//! The zip/unzip transform between the compact per-node vector and the
//! padded per-block stencil arrays, together with the halo-fill rules at
//! refinement boundaries: a same-level source is copied exactly, a finer
//! source is restricted by an 8-point average (cell centers nest), and a
//! coarser source is interpolated trilinearly (the hanging-node rule).
//! Halo cells beyond the physical domain are filled by constant
//! extrapolation of the block's own nearest interior value; the boundary
//! kernel owns the outermost interior shell, so extrapolated cells only
//! ever feed one-sided regions.

use rayon::prelude::*;

use crate::field::{Field, FieldSet};
use crate::mesh::{Block, Mesh};
use crate::octant::Octant;
use crate::wavelet;

/// Which halo sources a fill pass is allowed to read. The asynchronous
/// exchange fills from local octants while ghost payloads are in flight,
/// then finishes with a ghost-only pass once they have arrived.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HaloSource {
    Any,
    LocalOnly,
    GhostOnly,
}

impl Mesh {
    /// Scatter a zipped vector into the padded block arrays, halos
    /// included. Ghost node slots must be synchronized first.
    pub fn unzip(&self, zipped: &FieldSet, unzipped: &mut FieldSet) {
        self.unzip_with(zipped, unzipped, HaloSource::Any)
    }

    /// The overlap half of the asynchronous exchange: block interiors plus
    /// every halo cell whose source octant is local.
    pub fn unzip_internal(&self, zipped: &FieldSet, unzipped: &mut FieldSet) {
        self.unzip_with(zipped, unzipped, HaloSource::LocalOnly)
    }

    /// The completion half: halo cells sourced from ghost octants. Must not
    /// run before the exchange for this step has been waited on.
    pub fn unzip_external(&self, zipped: &FieldSet, unzipped: &mut FieldSet) {
        self.unzip_with(zipped, unzipped, HaloSource::GhostOnly)
    }

    fn unzip_with(&self, zipped: &FieldSet, unzipped: &mut FieldSet, phase: HaloSource) {
        if !self.is_active() {
            return;
        }
        assert_eq!(zipped.len(), self.num_total_nodes());
        assert_eq!(unzipped.len(), self.unzip_len());

        for &f in Field::ALL.iter() {
            let src = zipped.field(f);
            let mut rest = unzipped.field_mut(f);
            let mut slices: Vec<&mut [f64]> = Vec::with_capacity(self.blocks().len());
            for b in self.blocks() {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(b.alloc_len());
                slices.push(head);
                rest = tail;
            }
            self.blocks()
                .par_iter()
                .zip(slices.into_par_iter())
                .enumerate()
                .for_each(|(bi, (block, dst))| {
                    self.fill_block(block, self.local_range().start + bi, src, dst, phase)
                });
        }
    }

    /// Gather block interiors back into the local slots of a zipped vector.
    /// The exact inverse of the interior scatter: no interpolation, so a
    /// zip directly after an unzip reproduces the local input bitwise.
    pub fn zip(&self, unzipped: &FieldSet, zipped: &mut FieldSet) {
        if !self.is_active() {
            return;
        }
        assert_eq!(zipped.len(), self.num_total_nodes());
        assert_eq!(unzipped.len(), self.unzip_len());

        let e = self.elems();
        for &f in Field::ALL.iter() {
            for (bi, block) in self.blocks().iter().enumerate() {
                let node0 = self.node_offset(self.local_range().start + bi);
                let interior = block.interior();
                let pw = block.padding();
                let src = unzipped.field(f);
                let dst = zipped.field_mut(f);
                for k in interior.clone() {
                    for j in interior.clone() {
                        for i in interior.clone() {
                            let node = ((k - pw) * e + (j - pw)) * e + (i - pw);
                            dst[node0 + node] = src[block.offset() + block.cell(i, j, k)];
                        }
                    }
                }
            }
        }
    }

    /// Fill one block's slice for one variable. Interior first, then the
    /// halo cells, which decompose by source topology into face, edge and
    /// vertex regions; all three resolve through the same leaf lookup, so
    /// they share one loop over the padded lattice.
    fn fill_block(&self, block: &Block, pos: usize, src: &[f64], dst: &mut [f64], phase: HaloSource) {
        let o = block.octant();
        let max_depth = self.domain().max_depth;
        let side = self.domain().grid_side() as f64;
        let e = self.elems();
        let pw = block.padding();
        let n = block.alloc_per_axis();
        let cs = o.edge_len(max_depth) as f64 / e as f64;
        let node0 = self.node_offset(pos);

        if phase != HaloSource::GhostOnly {
            for k in 0..e {
                for j in 0..e {
                    for i in 0..e {
                        dst[block.cell(i + pw, j + pw, k + pw)] = src[node0 + (k * e + j) * e + i];
                    }
                }
            }
        }

        let interior = block.interior();
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    if interior.contains(&i) && interior.contains(&j) && interior.contains(&k) {
                        continue;
                    }
                    let g = [
                        o.x() as f64 + (i as f64 - pw as f64 + 0.5) * cs,
                        o.y() as f64 + (j as f64 - pw as f64 + 0.5) * cs,
                        o.z() as f64 + (k as f64 - pw as f64 + 0.5) * cs,
                    ];

                    if g.iter().any(|&c| c < 0.0 || c >= side) {
                        // Physical boundary: constant extrapolation of the
                        // block's nearest interior value, laid down in the
                        // local pass.
                        if phase != HaloSource::GhostOnly {
                            let ci = i.max(interior.start).min(interior.end - 1);
                            let cj = j.max(interior.start).min(interior.end - 1);
                            let ck = k.max(interior.start).min(interior.end - 1);
                            dst[block.cell(i, j, k)] = dst[block.cell(ci, cj, ck)];
                        }
                        continue;
                    }

                    let p = [g[0] as u32, g[1] as u32, g[2] as u32];
                    let lp = self
                        .leaf_containing(p)
                        .expect("halo source leaf missing from the ghost layer");

                    let local = self.local_range().contains(&lp);
                    match phase {
                        HaloSource::LocalOnly if !local => continue,
                        HaloSource::GhostOnly if local => continue,
                        _ => {}
                    }
                    dst[block.cell(i, j, k)] = self.sample_leaf(src, lp, g, o.level());
                }
            }
        }
    }

    /// Sample the node lattice of the leaf at position `lp` at the grid
    /// point `g`, on behalf of a block at refinement level `level`. The 2:1
    /// balance constraint limits the level offset to one in either
    /// direction.
    fn sample_leaf(&self, src: &[f64], lp: usize, g: [f64; 3], level: u32) -> f64 {
        let e = self.elems();
        let npe = self.nodes_per_element();
        let leaf: &Octant = &self.all_octants()[lp];
        let max_depth = self.domain().max_depth;
        let cs = leaf.edge_len(max_depth) as f64 / e as f64;
        let anchor = leaf.anchor();
        let node0 = self.node_offset(lp);

        let s = [
            (g[0] - anchor[0] as f64) / cs - 0.5,
            (g[1] - anchor[1] as f64) / cs - 0.5,
            (g[2] - anchor[2] as f64) / cs - 0.5,
        ];

        if leaf.level() == level {
            // Lattices at equal level coincide: exact copy.
            let i = s[0].round() as usize;
            let j = s[1].round() as usize;
            let k = s[2].round() as usize;
            debug_assert!(i < e && j < e && k < e);
            src[node0 + (k * e + j) * e + i]
        } else if leaf.level() > level {
            // Finer source: the requested point is the center of a 2x2x2
            // cube of the leaf's nodes.
            debug_assert_eq!(leaf.level(), level + 1);
            let base = [
                s[0].floor() as usize,
                s[1].floor() as usize,
                s[2].floor() as usize,
            ];
            let mut sum = 0.0;
            for dk in 0..2 {
                for dj in 0..2 {
                    for di in 0..2 {
                        let idx = ((base[2] + dk) * e + base[1] + dj) * e + base[0] + di;
                        sum += src[node0 + idx];
                    }
                }
            }
            0.125 * sum
        } else {
            // Coarser source: trilinear interpolation, clamped at the
            // leaf's lattice edge.
            debug_assert_eq!(leaf.level() + 1, level);
            wavelet::trilinear(&src[node0..node0 + npe], e, s)
        }
    }
}
