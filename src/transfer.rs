//! Inter-grid transfer of one octant's node lattice across one refinement
//! level. Cell-centered lattices nest: a parent node is the exact center of
//! a 2x2x2 cube of child nodes, so restriction is a plain average and is
//! exact for it; prolongation samples the parent lattice trilinearly,
//! clamped at its edge. An octant that survives a remesh unchanged is
//! copied verbatim, which is what keeps the identity-transfer guarantee at
//! unchanged regions.

use crate::wavelet;

/// Fill the `e^3` lattice of a descendant octant from an ancestor's. `rel`
/// is the descendant's anchor offset in ancestor-lattice cells and `ratio`
/// the edge ratio (2 for a direct child, 4 for a grandchild once balancing
/// has rippled, ...).
pub fn resample_descendant(src: &[f64], e: usize, rel: [f64; 3], ratio: f64, out: &mut [f64]) {
    assert!(src.len() == e * e * e && out.len() == e * e * e);
    for k in 0..e {
        for j in 0..e {
            for i in 0..e {
                let s = [
                    rel[0] + (i as f64 + 0.5) / ratio - 0.5,
                    rel[1] + (j as f64 + 0.5) / ratio - 0.5,
                    rel[2] + (k as f64 + 0.5) / ratio - 0.5,
                ];
                out[(k * e + j) * e + i] = wavelet::trilinear(src, e, s);
            }
        }
    }
}

/// Fill a child octant's `e^3` lattice from its parent's. `child` is the
/// SFC child number selecting which octant of the parent region the child
/// covers.
pub fn prolong_child(parent: &[f64], e: usize, child: u32, out: &mut [f64]) {
    let rel = [
        (child & 1) as f64 * e as f64 / 2.0,
        (child >> 1 & 1) as f64 * e as f64 / 2.0,
        (child >> 2 & 1) as f64 * e as f64 / 2.0,
    ];
    resample_descendant(parent, e, rel, 2.0, out)
}

/// Restrict a child octant's `e^3` lattice into the `(e/2)^3` sub-region of
/// its parent selected by the child number. Each parent node is the average
/// of the eight child nodes it centers; the eight siblings fill disjoint
/// regions, so a full coarsening writes every parent node exactly once.
pub fn restrict_child(child_data: &[f64], e: usize, child: u32, parent: &mut [f64]) {
    assert!(child_data.len() == e * e * e && parent.len() == e * e * e);
    let half = e / 2;
    let off = [
        (child & 1) as usize * half,
        (child >> 1 & 1) as usize * half,
        (child >> 2 & 1) as usize * half,
    ];
    for k in 0..half {
        for j in 0..half {
            for i in 0..half {
                let mut sum = 0.0;
                for dk in 0..2 {
                    for dj in 0..2 {
                        for di in 0..2 {
                            sum += child_data[((2 * k + dk) * e + 2 * j + dj) * e + 2 * i + di];
                        }
                    }
                }
                let p = ((k + off[2]) * e + j + off[1]) * e + i + off[0];
                parent[p] = 0.125 * sum;
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{prolong_child, restrict_child};

    fn lattice<F: Fn(usize, usize, usize) -> f64>(e: usize, f: F) -> Vec<f64> {
        let mut v = vec![0.0; e * e * e];
        for k in 0..e {
            for j in 0..e {
                for i in 0..e {
                    v[(k * e + j) * e + i] = f(i, j, k);
                }
            }
        }
        v
    }

    #[test]
    fn constants_transfer_exactly_both_ways() {
        let e = 4;
        let parent = lattice(e, |_, _, _| 7.25);
        let mut assembled = vec![0.0; e * e * e];
        for child in 0..8 {
            let mut fine = vec![0.0; e * e * e];
            prolong_child(&parent, e, child, &mut fine);
            assert!(fine.iter().all(|&v| v == 7.25));
            restrict_child(&fine, e, child, &mut assembled);
        }
        assert_eq!(assembled, parent);
    }

    #[test]
    fn linear_data_prolongs_exactly_away_from_the_lattice_edge() {
        let e = 8;
        let parent = lattice(e, |i, j, k| i as f64 + 2.0 * j as f64 - k as f64);
        let mut fine = vec![0.0; e * e * e];
        prolong_child(&parent, e, 0, &mut fine);

        // Child node (i,j,k) sits at parent coordinate (i+0.5)/2 - 0.5;
        // wherever that stays inside [0, e-1] the trilinear sample of a
        // linear field is exact.
        for k in 1..e {
            for j in 1..e {
                for i in 1..e {
                    let s = [
                        (i as f64 + 0.5) / 2.0 - 0.5,
                        (j as f64 + 0.5) / 2.0 - 0.5,
                        (k as f64 + 0.5) / 2.0 - 0.5,
                    ];
                    let want = s[0] + 2.0 * s[1] - s[2];
                    let got = fine[(k * e + j) * e + i];
                    assert!((got - want).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn restriction_averages_sibling_regions_disjointly() {
        let e = 4;
        let mut parent = vec![f64::NAN; e * e * e];
        for child in 0..8 {
            let fine = lattice(e, |_, _, _| child as f64);
            restrict_child(&fine, e, child, &mut parent);
        }
        // Every parent node was written exactly once, by the sibling whose
        // region it belongs to.
        assert!(parent.iter().all(|v| v.is_finite()));
        assert_eq!(parent[0], 0.0);
        let last = (e - 1) * (e * e + e + 1);
        assert_eq!(parent[last], 7.0);
    }
}
