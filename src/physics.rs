//! The physics plugin surface. The mesh engine never hard-codes a system of
//! equations: it hands each padded block, with its geometry and scratch
//! workspace, to a `PhysicsModel` and scatters whatever right-hand side
//! comes back. The model bundled here is the flat-space Maxwell evolution
//! seeded by a toroidal dipole pulse, which has a closed-form solution and
//! therefore doubles as the convergence reference.

use crate::config::{Config, IdType};
use crate::deriv::{self, DerivWorkspace};
use crate::error::Error;
use crate::field::Field;
use crate::mesh::block::{
    Block, BDY_X_NEG, BDY_X_POS, BDY_Y_NEG, BDY_Y_POS, BDY_Z_NEG, BDY_Z_POS,
};

pub trait PhysicsModel: Send + Sync {
    /// Initial values of every variable at a physical point.
    fn initial_data(&self, p: [f64; 3], out: &mut [f64; Field::COUNT]);

    /// Closed-form solution at a physical point and time, for error
    /// diagnostics. Models without one may return the initial data.
    fn analytic(&self, p: [f64; 3], t: f64, out: &mut [f64; Field::COUNT]);

    /// Bulk right-hand side over one block's interior. `state` holds the
    /// unzipped block slice of every variable, halos filled; `out` is the
    /// matching slice of the right-hand-side vector.
    fn rhs(
        &self,
        block: &Block,
        state: [&[f64]; Field::COUNT],
        ws: &mut DerivWorkspace,
        out: [&mut [f64]; Field::COUNT],
    );

    /// Boundary condition on a block whose `bflag` marks physical faces.
    /// Overwrites the right-hand side on the outermost interior shell of
    /// each flagged face.
    fn boundary(
        &self,
        block: &Block,
        state: [&[f64]; Field::COUNT],
        out: [&mut [f64]; Field::COUNT],
    );
}

/// Construct the physics model selected by the configuration's id type.
pub fn from_config(config: &Config) -> Result<Em3Dipole, Error> {
    match config.id_type()? {
        IdType::DipolePulse => Ok(Em3Dipole {
            amp: config.id_amp,
            lambda: config.id_lambda,
            ko_sigma: config.ko_sigma,
        }),
    }
}

/// Flat-space Maxwell evolution: `dE/dt = curl B`, `dB/dt = -curl E`, with
/// Kreiss-Oliger dissipation and a Sommerfeld radiation condition on the
/// domain boundary. Seeded by a toroidal electric pulse whose outgoing
/// dipole radiation is known in closed form.
pub struct Em3Dipole {
    pub amp: f64,
    pub lambda: f64,
    pub ko_sigma: f64,
}

impl PhysicsModel for Em3Dipole {
    fn initial_data(&self, p: [f64; 3], out: &mut [f64; Field::COUNT]) {
        let [x, y, z] = p;
        let r2 = x * x + y * y + z * z;
        let ephi = -8.0 * self.amp * self.lambda * self.lambda * (-self.lambda * r2).exp();

        out[Field::E0.index()] = -y * ephi;
        out[Field::E1.index()] = x * ephi;
        out[Field::E2.index()] = 0.0;
        out[Field::B0.index()] = 0.0;
        out[Field::B1.index()] = 0.0;
        out[Field::B2.index()] = 0.0;
    }

    fn analytic(&self, p: [f64; 3], t: f64, out: &mut [f64; Field::COUNT]) {
        let [x, y, z] = p;
        let a = self.amp;
        let l = self.lambda;
        let r = (x * x + y * y + z * z).sqrt().max(1e-8);

        let em = (-l * (t - r) * (t - r)).exp();
        let ep = (-l * (t + r) * (t + r)).exp();

        let br = 2.0 * a
            * (-2.0 * l * ((t - r) * em + (t + r) * ep) / (r * r) + (em - ep) / (r * r * r));

        let btheta = a
            * (-2.0 * l * (em - ep) / r
                + 4.0 * l * l * ((t - r) * (t - r) * em - (t + r) * (t + r) * ep) / r
                - 2.0 * l * ((t - r) * em + (t + r) * ep) / (r * r)
                + (em - ep) / (r * r * r));

        let ephi = 2.0 * a * l * ((t - r) * em - (t + r) * ep) / (r * r)
            + 2.0 * a * l * (em + ep) / r
            - 4.0 * a * l * l * ((t - r) * (t - r) * em + (t + r) * (t + r) * ep) / r;

        out[Field::E0.index()] = -y * ephi / r;
        out[Field::E1.index()] = x * ephi / r;
        out[Field::E2.index()] = 0.0;
        out[Field::B0.index()] = x * z * (br + btheta) / (r * r);
        out[Field::B1.index()] = y * z * (br + btheta) / (r * r);
        out[Field::B2.index()] = (z * z * br - (x * x + y * y) * btheta) / (r * r);
    }

    fn rhs(
        &self,
        block: &Block,
        state: [&[f64]; Field::COUNT],
        ws: &mut DerivWorkspace,
        mut out: [&mut [f64]; Field::COUNT],
    ) {
        ws.require(block);

        let n = block.alloc_per_axis();
        let pw = block.padding();
        let h = block.spacing();
        let len = block.alloc_len();

        for o in out.iter_mut() {
            for v in o.iter_mut() {
                *v = 0.0;
            }
        }

        // One gradient per source variable, accumulated into the curl
        // combinations of its two partner components.
        let terms: [(Field, Field, i32, Field, i32); 6] = [
            // source, +target gets d?, sign; the axis is fixed per slot.
            (Field::E0, Field::B1, -1, Field::B2, 1),
            (Field::E1, Field::B2, -1, Field::B0, 1),
            (Field::E2, Field::B0, -1, Field::B1, 1),
            (Field::B0, Field::E1, 1, Field::E2, -1),
            (Field::B1, Field::E2, 1, Field::E0, -1),
            (Field::B2, Field::E0, 1, Field::E1, -1),
        ];

        for &(src, tgt_a, sign_a, tgt_b, sign_b) in terms.iter() {
            let u = state[src.index()];
            let (dx, dy, dz, _) = ws.slots(len);
            deriv::deriv_x(dx, u, n, pw, h[0]);
            deriv::deriv_y(dy, u, n, pw, h[1]);
            deriv::deriv_z(dz, u, n, pw, h[2]);

            // For a source on axis c, the curl couples the x-derivative to
            // the component after c and the y/z-derivatives cyclically; the
            // table above fixes which target takes which derivative.
            let (da, db): (&[f64], &[f64]) = match src {
                Field::E0 | Field::B0 => (dz, dy),
                Field::E1 | Field::B1 => (dx, dz),
                Field::E2 | Field::B2 => (dy, dx),
            };

            for k in pw..n - pw {
                for j in pw..n - pw {
                    for i in pw..n - pw {
                        let c = (k * n + j) * n + i;
                        out[tgt_a.index()][c] += sign_a as f64 * da[c];
                        out[tgt_b.index()][c] += sign_b as f64 * db[c];
                    }
                }
            }
        }

        // Dissipation on every evolved variable.
        for &f in Field::ALL.iter() {
            let u = state[f.index()];
            let (_, _, _, diss) = ws.slots(len);
            deriv::ko_dissipation(diss, u, n, pw, h, self.ko_sigma);
            for k in pw..n - pw {
                for j in pw..n - pw {
                    for i in pw..n - pw {
                        let c = (k * n + j) * n + i;
                        out[f.index()][c] += diss[c];
                    }
                }
            }
        }
    }

    fn boundary(
        &self,
        block: &Block,
        state: [&[f64]; Field::COUNT],
        mut out: [&mut [f64]; Field::COUNT],
    ) {
        if !block.is_boundary() {
            return;
        }
        let n = block.alloc_per_axis();
        let pw = block.padding();
        let interior = block.interior();
        let h = block.spacing();

        // The outermost interior shell of each flagged face evolves by the
        // outgoing-wave condition du/dt = -(x . grad u)/r - u/r. Gradients
        // use the immediate neighbors, which are always populated (the
        // halo beyond a physical face is extrapolated).
        let faces: [(u8, usize, usize); 6] = [
            (BDY_X_NEG, 0, interior.start),
            (BDY_X_POS, 0, interior.end - 1),
            (BDY_Y_NEG, 1, interior.start),
            (BDY_Y_POS, 1, interior.end - 1),
            (BDY_Z_NEG, 2, interior.start),
            (BDY_Z_POS, 2, interior.end - 1),
        ];

        for &(bit, axis, layer) in faces.iter() {
            if block.bflag() & bit == 0 {
                continue;
            }
            for a in interior.clone() {
                for b in interior.clone() {
                    let (i, j, k) = match axis {
                        0 => (layer, a, b),
                        1 => (a, layer, b),
                        _ => (a, b, layer),
                    };
                    let c = (k * n + j) * n + i;
                    let p = block.position(i, j, k);
                    let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt().max(1e-8);

                    for &f in Field::ALL.iter() {
                        let u = state[f.index()];
                        let gx = (u[c + 1] - u[c - 1]) / (2.0 * h[0]);
                        let gy = (u[c + n] - u[c - n]) / (2.0 * h[1]);
                        let gz = (u[c + n * n] - u[c - n * n]) / (2.0 * h[2]);
                        out[f.index()][c] =
                            -(p[0] * gx + p[1] * gy + p[2] * gz) / r - u[c] / r;
                    }
                }
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::field::Field;

    fn model() -> Em3Dipole {
        Em3Dipole {
            amp: 1.0,
            lambda: 1.0,
            ko_sigma: 0.0,
        }
    }

    #[test]
    fn initial_electric_field_is_toroidal() {
        let m = model();
        let mut var = [0.0; Field::COUNT];
        m.initial_data([0.3, -0.2, 0.7], &mut var);

        // E is tangential: perpendicular to the cylindrical radius, no z
        // component, and all magnetic components vanish at t=0.
        let (x, y) = (0.3, -0.2);
        assert!((var[Field::E0.index()] * x + var[Field::E1.index()] * y).abs() < 1e-12);
        assert_eq!(var[Field::E2.index()], 0.0);
        assert_eq!(var[Field::B0.index()], 0.0);
        assert_eq!(var[Field::B1.index()], 0.0);
        assert_eq!(var[Field::B2.index()], 0.0);
    }

    #[test]
    fn analytic_solution_matches_initial_data_at_t_zero() {
        let m = model();
        for &p in [[0.4, 0.1, -0.3], [1.5, 2.0, 0.2], [-0.7, 0.9, 1.1]].iter() {
            let mut id = [0.0; Field::COUNT];
            let mut an = [0.0; Field::COUNT];
            m.initial_data(p, &mut id);
            m.analytic(p, 0.0, &mut an);
            for f in 0..Field::COUNT {
                assert!(
                    (id[f] - an[f]).abs() < 1e-9 * (1.0 + id[f].abs()),
                    "component {} differs: {} vs {}",
                    f,
                    id[f],
                    an[f]
                );
            }
        }
    }

    #[test]
    fn analytic_magnetic_field_is_divergence_free_numerically() {
        let m = model();
        let eps = 1e-5;
        let p = [0.8, -0.6, 0.4];
        let t = 0.7;

        let sample = |q: [f64; 3], f: Field| {
            let mut var = [0.0; Field::COUNT];
            m.analytic(q, t, &mut var);
            var[f.index()]
        };
        let div = (sample([p[0] + eps, p[1], p[2]], Field::B0)
            - sample([p[0] - eps, p[1], p[2]], Field::B0))
            / (2.0 * eps)
            + (sample([p[0], p[1] + eps, p[2]], Field::B1)
                - sample([p[0], p[1] - eps, p[2]], Field::B1))
                / (2.0 * eps)
            + (sample([p[0], p[1], p[2] + eps], Field::B2)
                - sample([p[0], p[1], p[2] - eps], Field::B2))
                / (2.0 * eps);
        assert!(div.abs() < 1e-5);
    }
}
