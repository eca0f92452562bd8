//! Wavelet refinement machinery: the position/time dependent error tolerance
//! that lets resolution relax away from the source region, and the
//! interpolation-wavelet detail estimate that is compared against it.

use crate::error::Error;
use crate::octant::Domain;

/// Where the wavelet tolerance comes from. `Constant` is the disabled case:
/// one global threshold everywhere. `RadialRamp` relaxes the threshold
/// linearly with distance from the domain center. `WavefrontRamp` follows an
/// outgoing signal: inside `rad[0]` the base tolerance always applies, and
/// past it the threshold grows exponentially over a window whose outer edge
/// advances with time once `t` exceeds `rad[1] + t_offset`, capped at
/// `rad[2] + 10`. The last is the time-and-radius-aware variant used when
/// resolution may coarsen behind a wavefront while staying fine at it.
#[derive(Clone, Copy, Debug)]
pub enum TolerancePolicy {
    Constant {
        tol: f64,
    },
    RadialRamp {
        tol_min: f64,
        tol_max: f64,
        r0: f64,
        r1: f64,
    },
    WavefrontRamp {
        rad: [f64; 3],
        eps: [f64; 3],
        t_offset: f64,
    },
}

impl TolerancePolicy {
    /// Reject degenerate parameters. Must run before the policy is consulted
    /// anywhere near a collective call region: a malformed ramp is a fatal
    /// configuration error, not something to discover mid-exchange.
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            TolerancePolicy::Constant { tol } => {
                if tol <= 0.0 {
                    return Err(Error::NonPositiveTolerance(tol));
                }
            }
            TolerancePolicy::RadialRamp {
                tol_min,
                tol_max,
                r0,
                r1,
            } => {
                if tol_min <= 0.0 {
                    return Err(Error::NonPositiveTolerance(tol_min));
                }
                if r1 <= r0 || tol_max < tol_min {
                    return Err(Error::DegenerateToleranceRamp(r0, r1));
                }
            }
            TolerancePolicy::WavefrontRamp { rad, eps, .. } => {
                for &e in eps.iter() {
                    if e <= 0.0 {
                        return Err(Error::NonPositiveTolerance(e));
                    }
                }
                if rad[1] <= rad[0] || eps[1].min(eps[2]) == eps[0] {
                    return Err(Error::DegenerateToleranceRamp(rad[0], rad[1]));
                }
            }
        }
        Ok(())
    }

    /// Tolerance at a grid-space point, at simulation time `t`. The radius
    /// is measured in physical space from the physical origin.
    pub fn tolerance(&self, domain: &Domain, g: [f64; 3], t: f64) -> f64 {
        let p = domain.position(g);
        let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        self.tolerance_at_radius(r, t)
    }

    /// Tolerance at a physical radius.
    pub fn tolerance_at_radius(&self, r: f64, t: f64) -> f64 {
        match *self {
            TolerancePolicy::Constant { tol } => tol,
            TolerancePolicy::RadialRamp {
                tol_min,
                tol_max,
                r0,
                r1,
            } => tol_max.min(tol_min.max((tol_max - tol_min) / (r1 - r0) * (r - r0) + tol_min)),
            TolerancePolicy::WavefrontRamp { rad, eps, t_offset } => {
                wavefront_tol(t, r, rad, eps, t_offset)
            }
        }
    }
}

/// The wavefront-tracking tolerance. `rad = [R0, R1, RGW]` are the inner
/// constant-tolerance radius, the ramp boundary and the wave-extraction
/// radius; `eps = [tol, tol_gw, tol_max]`. Below `R0` the base tolerance is
/// returned for any `t`. Elsewhere the tolerance interpolates exponentially
/// in log space, `tol * 10^((r - R0)/W)`, where the window `W` spans
/// `[R0, R1]` before `t` reaches `R1 + t_offset` and afterwards advances
/// with `t - t_offset`, capped at `RGW + 10`. Clamped above by `tol_max`.
pub fn wavefront_tol(t: f64, r: f64, rad: [f64; 3], eps: [f64; 3], t_offset: f64) -> f64 {
    let r0 = rad[0];
    let r1 = rad[1];
    let rgw = rad[2];
    let tol = eps[0];
    let tol_max = eps[2];
    let wrr = eps[1].min(tol_max);

    if r < r0 {
        return tol;
    }
    let span = if t > r1 + t_offset {
        (t - t_offset).min(rgw + 10.0) - r0
    } else {
        r1 - r0
    };
    let fac = span / (wrr / tol).log10();
    tol_max.min(tol * 10f64.powf((r - r0) / fac))
}

/// Interpolation-wavelet detail estimate on one octant's `n^3` cell-centered
/// node lattice: restrict by one level (8-point averages), prolong back with
/// trilinear interpolation, and return the max-norm of the difference. Large
/// values mean the lattice is not smooth at this resolution and the octant
/// should refine. `n` must be even.
pub fn wavelet_error(nodes: &[f64], n: usize) -> f64 {
    assert!(n % 2 == 0 && nodes.len() == n * n * n);
    let nc = n / 2;

    let mut coarse = vec![0.0; nc * nc * nc];
    for k in 0..nc {
        for j in 0..nc {
            for i in 0..nc {
                let mut sum = 0.0;
                for dk in 0..2 {
                    for dj in 0..2 {
                        for di in 0..2 {
                            sum += nodes[(2 * k + dk) * n * n + (2 * j + dj) * n + 2 * i + di];
                        }
                    }
                }
                coarse[k * nc * nc + j * nc + i] = 0.125 * sum;
            }
        }
    }

    // Only fine nodes whose prolongation stencil is complete contribute;
    // the outermost layer would otherwise measure clamping, not smoothness.
    let mut err = 0f64;
    for k in 1..n - 1 {
        for j in 1..n - 1 {
            for i in 1..n - 1 {
                let v = trilinear(&coarse, nc, [
                    (i as f64 + 0.5) / 2.0 - 0.5,
                    (j as f64 + 0.5) / 2.0 - 0.5,
                    (k as f64 + 0.5) / 2.0 - 0.5,
                ]);
                err = err.max((nodes[k * n * n + j * n + i] - v).abs());
            }
        }
    }
    err
}

/// Trilinear sample of an `n^3` lattice at fractional index coordinates,
/// clamped to the lattice bounds.
pub fn trilinear(lattice: &[f64], n: usize, s: [f64; 3]) -> f64 {
    let mut i0 = [0usize; 3];
    let mut f = [0f64; 3];
    for axis in 0..3 {
        let c = s[axis].max(0.0).min(n as f64 - 1.0);
        let base = c.floor().min(n as f64 - 2.0).max(0.0);
        i0[axis] = base as usize;
        f[axis] = c - base;
    }
    let at = |i: usize, j: usize, k: usize| lattice[k * n * n + j * n + i];

    let mut v = 0.0;
    for dk in 0..2 {
        for dj in 0..2 {
            for di in 0..2 {
                let w = (if di == 0 { 1.0 - f[0] } else { f[0] })
                    * (if dj == 0 { 1.0 - f[1] } else { f[1] })
                    * (if dk == 0 { 1.0 - f[2] } else { f[2] });
                v += w * at(i0[0] + di, i0[1] + dj, i0[2] + dk);
            }
        }
    }
    v
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::octant::Domain;

    #[test]
    fn disabled_policy_ignores_position() {
        // The disabled case returns the configured constant anywhere.
        let domain = Domain {
            max_depth: 8,
            min: [-50.0; 3],
            max: [50.0; 3],
        };
        let policy = TolerancePolicy::Constant { tol: 1e-5 };
        assert_eq!(policy.tolerance(&domain, [0.0; 3], 0.0), 1e-5);
        assert_eq!(policy.tolerance(&domain, [128.0, 17.0, 200.0], 3.5), 1e-5);
        assert_eq!(policy.tolerance(&domain, [255.0; 3], 100.0), 1e-5);
    }

    #[test]
    fn radial_ramp_is_monotone_and_clamped() {
        let policy = TolerancePolicy::RadialRamp {
            tol_min: 1e-6,
            tol_max: 1e-3,
            r0: 2.0,
            r1: 20.0,
        };
        assert_eq!(policy.tolerance_at_radius(0.0, 0.0), 1e-6);
        assert_eq!(policy.tolerance_at_radius(2.0, 0.0), 1e-6);
        let mut last = 0.0;
        for i in 0..100 {
            let tol = policy.tolerance_at_radius(2.0 + 0.3 * i as f64, 0.0);
            assert!(tol >= last);
            last = tol;
        }
        assert_eq!(policy.tolerance_at_radius(1e9, 0.0), 1e-3);
    }

    #[test]
    fn wavefront_inside_r0_returns_base_tolerance() {
        let rad = [1.0, 5.0, 8.0];
        let eps = [1e-4, 1e-6, 1e-3];
        for &t in [0.0, 1.0, 17.0, 400.0].iter() {
            assert_eq!(wavefront_tol(t, 0.5, rad, eps, 0.0), 1e-4);
            assert_eq!(wavefront_tol(t, 0.999, rad, eps, 0.0), 1e-4);
        }
    }

    #[test]
    fn wavefront_at_ramp_left_edge_equals_base() {
        // r == R0 takes the ramp branch but evaluates to exactly the base
        // tolerance at the left edge.
        let got = wavefront_tol(0.0, 1.0, [1.0, 5.0, 8.0], [1e-4, 1e-6, 1e-3], 0.0);
        assert_eq!(got, 1e-4);
    }

    #[test]
    fn degenerate_ramp_is_rejected() {
        let bad = TolerancePolicy::RadialRamp {
            tol_min: 1e-6,
            tol_max: 1e-3,
            r0: 10.0,
            r1: 2.0,
        };
        assert!(bad.validate().is_err());

        let ok = TolerancePolicy::RadialRamp {
            tol_min: 1e-6,
            tol_max: 1e-3,
            r0: 2.0,
            r1: 10.0,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn wavelet_error_vanishes_for_trilinear_data() {
        // A linear field is reproduced exactly by restrict + prolong away
        // from the lattice boundary, so the estimate stays near zero
        // relative to the field scale; a rough field does not.
        let n = 8;
        let mut smooth = vec![0.0; n * n * n];
        let mut rough = vec![0.0; n * n * n];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    smooth[k * n * n + j * n + i] = i as f64 + 2.0 * j as f64 - 0.5 * k as f64;
                    rough[k * n * n + j * n + i] = if (i + j + k) % 2 == 0 { 1.0 } else { -1.0 };
                }
            }
        }
        assert!(wavelet_error(&smooth, n) < 1e-12);
        assert!(wavelet_error(&rough, n) > 0.5);
    }
}
