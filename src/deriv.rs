//! Finite-difference kernels on padded blocks, and the per-rank scratch
//! workspace they write into. The kernels are 4th-order centered first and
//! second derivatives plus 6th-difference Kreiss-Oliger dissipation; the
//! dissipation stencil reaches three points, which is what fixes the
//! mesh-wide padding width.

use log::debug;

use crate::mesh::{Block, Mesh};

/// Halo layers the widest stencil reads.
pub const STENCIL_REACH: usize = 3;

/// Scratch slots the workspace provides per block: one per axis of the
/// gradient plus one for the dissipation accumulator.
pub const NUM_DERIVATIVES: usize = 4;

/// Process-wide scratch for stencil evaluation, sized to the largest local
/// block and reused serially across all blocks of one rank. The evolution
/// driver owns exactly one and must re-allocate it whenever the mesh is
/// rebuilt: block footprints change under remeshing, and writing stencils
/// through a stale size is a correctness bug, not a performance one.
pub struct DerivWorkspace {
    buf: Vec<f64>,
    max_block: usize,
    s_fac: usize,
}

impl DerivWorkspace {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            max_block: 0,
            s_fac: 0,
        }
    }

    /// Drop any existing buffer, scan the mesh's local blocks for the
    /// largest padded footprint, and allocate
    /// `s_fac * max_block * NUM_DERIVATIVES` doubles. On an inactive rank
    /// the workspace stays empty.
    pub fn allocate(&mut self, mesh: &Mesh, s_fac: usize) {
        self.deallocate();

        if !mesh.is_active() {
            return;
        }

        let max_block = mesh.max_block_len();
        self.buf = vec![0.0; s_fac * max_block * NUM_DERIVATIVES];
        self.max_block = max_block;
        self.s_fac = s_fac;
        debug!(
            "rank {}: derivative workspace of {} doubles (max block {})",
            mesh.rank(),
            self.buf.len(),
            max_block
        );
    }

    /// Idempotent: freeing an empty workspace is a no-op.
    pub fn deallocate(&mut self) {
        self.buf = Vec::new();
        self.max_block = 0;
        self.s_fac = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Contract check before any stencil write: a block that does not fit
    /// means the workspace survived a remesh it should not have.
    pub fn require(&self, block: &Block) {
        assert!(
            block.alloc_len() <= self.max_block,
            "derivative workspace is stale: block of {} exceeds allocation for {}",
            block.alloc_len(),
            self.max_block
        );
    }

    /// The four per-block scratch slots, each `len` doubles, disjoint.
    pub fn slots(&mut self, len: usize) -> (&mut [f64], &mut [f64], &mut [f64], &mut [f64]) {
        assert!(len <= self.max_block);
        let m = self.max_block;
        let (dx, rest) = self.buf.split_at_mut(m);
        let (dy, rest) = rest.split_at_mut(m);
        let (dz, rest) = rest.split_at_mut(m);
        (
            &mut dx[..len],
            &mut dy[..len],
            &mut dz[..len],
            &mut rest[..len],
        )
    }
}

// ============================================================================
// The stencil kernels. `src` and `dst` are one block's padded lattice of
// `n` points per axis; only the interior `[pw, n-pw)` of `dst` is written.

/// 4th-order centered first derivative along x.
pub fn deriv_x(dst: &mut [f64], src: &[f64], n: usize, pw: usize, h: f64) {
    let idel = 1.0 / (12.0 * h);
    for k in pw..n - pw {
        for j in pw..n - pw {
            for i in pw..n - pw {
                let c = (k * n + j) * n + i;
                dst[c] = (src[c - 2] - 8.0 * src[c - 1] + 8.0 * src[c + 1] - src[c + 2]) * idel;
            }
        }
    }
}

/// 4th-order centered first derivative along y.
pub fn deriv_y(dst: &mut [f64], src: &[f64], n: usize, pw: usize, h: f64) {
    let idel = 1.0 / (12.0 * h);
    for k in pw..n - pw {
        for j in pw..n - pw {
            for i in pw..n - pw {
                let c = (k * n + j) * n + i;
                dst[c] = (src[c - 2 * n] - 8.0 * src[c - n] + 8.0 * src[c + n] - src[c + 2 * n])
                    * idel;
            }
        }
    }
}

/// 4th-order centered first derivative along z.
pub fn deriv_z(dst: &mut [f64], src: &[f64], n: usize, pw: usize, h: f64) {
    let nn = n * n;
    let idel = 1.0 / (12.0 * h);
    for k in pw..n - pw {
        for j in pw..n - pw {
            for i in pw..n - pw {
                let c = (k * n + j) * n + i;
                dst[c] = (src[c - 2 * nn] - 8.0 * src[c - nn] + 8.0 * src[c + nn]
                    - src[c + 2 * nn])
                    * idel;
            }
        }
    }
}

/// 4th-order centered second derivative along one axis, selected by the
/// lattice stride (`1`, `n`, or `n*n`).
pub fn deriv2_axis(dst: &mut [f64], src: &[f64], n: usize, pw: usize, stride: usize, h: f64) {
    let idel = 1.0 / (12.0 * h * h);
    for k in pw..n - pw {
        for j in pw..n - pw {
            for i in pw..n - pw {
                let c = (k * n + j) * n + i;
                dst[c] = (-src[c - 2 * stride] + 16.0 * src[c - stride] - 30.0 * src[c]
                    + 16.0 * src[c + stride]
                    - src[c + 2 * stride])
                    * idel;
            }
        }
    }
}

/// Kreiss-Oliger dissipation: the three per-axis 6th differences summed
/// into `dst` (overwritten). Damps the grid-frequency modes a 4th-order
/// scheme leaves undamped.
pub fn ko_dissipation(dst: &mut [f64], src: &[f64], n: usize, pw: usize, h: [f64; 3], sigma: f64) {
    let strides = [1, n, n * n];
    for k in pw..n - pw {
        for j in pw..n - pw {
            for i in pw..n - pw {
                let c = (k * n + j) * n + i;
                let mut acc = 0.0;
                for (axis, &s) in strides.iter().enumerate() {
                    let d6 = src[c - 3 * s] - 6.0 * src[c - 2 * s] + 15.0 * src[c - s]
                        - 20.0 * src[c]
                        + 15.0 * src[c + s]
                        - 6.0 * src[c + 2 * s]
                        + src[c + 3 * s];
                    acc += sigma / (64.0 * h[axis]) * d6;
                }
                dst[c] = acc;
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::message::local::channel_group;
    use crate::mesh::Mesh;
    use crate::octant::Domain;
    use crate::octree;

    fn build_mesh(lev: u32, elems: usize) -> Mesh {
        let domain = Domain {
            max_depth: 4,
            min: [-1.0; 3],
            max: [1.0; 3],
        };
        let mut octants = octree::block_adaptive_octree(&domain, [-1.0; 3], [1.0; 3], lev);
        octree::sort_and_unique(&mut octants);
        let parts = octree::partition(&octants, 1);
        let comm = channel_group(1).pop().unwrap();
        Mesh::build(&comm, domain, &octants, &parts, elems, 3)
    }

    #[test]
    fn workspace_size_matches_contract() {
        let mesh = build_mesh(1, 4);
        let mut ws = DerivWorkspace::new();
        ws.allocate(&mesh, 2);
        assert_eq!(ws.len(), 2 * mesh.max_block_len() * NUM_DERIVATIVES);
    }

    #[test]
    fn reallocate_on_unchanged_mesh_is_size_stable() {
        let mesh = build_mesh(1, 4);
        let mut ws = DerivWorkspace::new();
        ws.allocate(&mesh, 3);
        let first = ws.len();
        ws.allocate(&mesh, 3);
        assert_eq!(ws.len(), first);
    }

    #[test]
    fn double_deallocate_is_a_noop() {
        let mesh = build_mesh(1, 4);
        let mut ws = DerivWorkspace::new();
        ws.allocate(&mesh, 1);
        ws.deallocate();
        ws.deallocate();
        assert_eq!(ws.len(), 0);
        // And a never-allocated workspace tolerates freeing too.
        let mut fresh = DerivWorkspace::new();
        fresh.deallocate();
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn stale_workspace_is_caught_before_stencil_writes() {
        let mesh = build_mesh(1, 4);
        let mut ws = DerivWorkspace::new();
        ws.allocate(&mesh, 1);
        ws.deallocate();
        ws.require(&mesh.blocks()[0]);
    }

    #[test]
    fn first_derivative_is_exact_for_cubics() {
        let n = 12;
        let pw = 3;
        let h = 0.1;
        let mut src = vec![0.0; n * n * n];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let x = i as f64 * h;
                    src[(k * n + j) * n + i] = x * x * x - 2.0 * x;
                }
            }
        }
        let mut dst = vec![0.0; n * n * n];
        deriv_x(&mut dst, &src, n, pw, h);
        for k in pw..n - pw {
            for j in pw..n - pw {
                for i in pw..n - pw {
                    let x = i as f64 * h;
                    let want = 3.0 * x * x - 2.0;
                    assert!((dst[(k * n + j) * n + i] - want).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn second_derivative_is_exact_for_quadratics() {
        let n = 10;
        let pw = 3;
        let h = 0.2;
        let mut src = vec![0.0; n * n * n];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let y = j as f64 * h;
                    src[(k * n + j) * n + i] = 4.0 * y * y + y;
                }
            }
        }
        let mut dst = vec![0.0; n * n * n];
        deriv2_axis(&mut dst, &src, n, pw, n, h);
        for k in pw..n - pw {
            for j in pw..n - pw {
                for i in pw..n - pw {
                    assert!((dst[(k * n + j) * n + i] - 8.0).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn dissipation_vanishes_on_low_order_polynomials() {
        let n = 12;
        let pw = 3;
        let mut src = vec![0.0; n * n * n];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    src[(k * n + j) * n + i] =
                        1.0 + i as f64 + (j as f64) * (j as f64) + 0.5 * k as f64;
                }
            }
        }
        let mut dst = vec![1.0; n * n * n];
        ko_dissipation(&mut dst, &src, n, pw, [0.1; 3], 0.4);
        for k in pw..n - pw {
            for j in pw..n - pw {
                for i in pw..n - pw {
                    assert!(dst[(k * n + j) * n + i].abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn workspace_slots_are_disjoint(){
        let mesh = build_mesh(1, 4);
        let mut ws = DerivWorkspace::new();
        ws.allocate(&mesh, 1);
        let len = mesh.blocks()[0].alloc_len();
        let (dx, dy, dz, diss) = ws.slots(len);
        dx[0] = 1.0;
        dy[0] = 2.0;
        dz[0] = 3.0;
        diss[0] = 4.0;
        assert_eq!((dx[0], dy[0], dz[0], diss[0]), (1.0, 2.0, 3.0, 4.0));
    }
}
