//! Run configuration: one owned value handed to the driver and validated up
//! front as a whole, instead of a sea of process-wide parameter globals.
//! Nothing mesh-related may be built from a configuration that has not
//! passed `validate`.

use serde::{Deserialize, Serialize};

use crate::deriv::STENCIL_REACH;
use crate::error::Error;
use crate::octant::{Domain, MAX_DEPTH};
use crate::wavelet::TolerancePolicy;

/// Which analytic initial-data family seeds the evolution. Selected by an
/// integer id in parameter files; an id with no registered variant is a
/// fatal configuration error, never a silent default.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum IdType {
    /// Toroidal electric pulse (the EM3 dipole family).
    DipolePulse,
}

impl IdType {
    pub fn from_id(id: u32) -> Result<IdType, Error> {
        match id {
            0 => Ok(IdType::DipolePulse),
            _ => Err(Error::UnknownIdType(id)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Physical corners of the computational cube.
    pub domain_min: [f64; 3],
    pub domain_max: [f64; 3],

    /// Depth of the integer grid; octant anchors live in `[0, 2^max_depth)`.
    pub max_depth: u32,
    /// Level of the initial regular tiling.
    pub reg_lev: u32,

    /// Interior points per axis per octant. Even, so one level of
    /// restriction always lands on whole cells.
    pub elems_per_dim: usize,
    /// Halo layers around each block interior; at least the stencil reach.
    pub padding: usize,

    /// Initial data selector (see `IdType::from_id`).
    pub id_type: u32,
    /// Amplitude and width of the dipole pulse.
    pub id_amp: f64,
    pub id_lambda: f64,

    /// Base wavelet tolerance; also the constant when the tolerance
    /// function is disabled.
    pub wavelet_tol: f64,
    pub wavelet_tol_max: f64,
    /// 0 = constant tolerance, 1 = radial ramp, 2 = wavefront ramp.
    pub wavelet_tol_function: u32,
    pub wavelet_tol_r0: f64,
    pub wavelet_tol_r1: f64,
    pub wavelet_tol_rgw: f64,
    pub wavelet_tol_gw: f64,
    pub wavelet_t_offset: f64,
    /// An octant coarsens when its estimate drops below this fraction of
    /// the local tolerance.
    pub coarsen_factor: f64,

    /// Time step as a fraction of the finest spacing.
    pub cfl_factor: f64,
    /// Kreiss-Oliger dissipation strength.
    pub ko_sigma: f64,

    /// Steps between refinement-criterion sweeps.
    pub remesh_interval: u64,
    /// Oversizing applied to the derivative workspace.
    pub safety_factor: usize,
    /// Partition imbalance reported in the profile output.
    pub load_imb_tol: f64,

    /// Prefix for profile and block-dump files.
    pub output_prefix: String,
    /// Block dumps are skipped unless the block spacing is within this
    /// factor of the finest spacing.
    pub dump_dx_factor: f64,
    /// Physical region filter for block dumps.
    pub dump_min: [f64; 3],
    pub dump_max: [f64; 3],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain_min: [-50.0; 3],
            domain_max: [50.0; 3],
            max_depth: 8,
            reg_lev: 3,
            elems_per_dim: 8,
            padding: 3,
            id_type: 0,
            id_amp: 1.0,
            id_lambda: 1.0,
            wavelet_tol: 1e-5,
            wavelet_tol_max: 1e-3,
            wavelet_tol_function: 0,
            wavelet_tol_r0: 4.0,
            wavelet_tol_r1: 30.0,
            wavelet_tol_rgw: 40.0,
            wavelet_tol_gw: 1e-4,
            wavelet_t_offset: 0.0,
            coarsen_factor: 0.1,
            cfl_factor: 0.25,
            ko_sigma: 0.4,
            remesh_interval: 10,
            safety_factor: 2,
            load_imb_tol: 0.1,
            output_prefix: String::from("octiron"),
            dump_dx_factor: 2.0,
            dump_min: [-10.0; 3],
            dump_max: [10.0; 3],
        }
    }
}

impl Config {
    pub fn domain(&self) -> Domain {
        Domain {
            max_depth: self.max_depth,
            min: self.domain_min,
            max: self.domain_max,
        }
    }

    pub fn id_type(&self) -> Result<IdType, Error> {
        IdType::from_id(self.id_type)
    }

    pub fn tolerance_policy(&self) -> TolerancePolicy {
        match self.wavelet_tol_function {
            1 => TolerancePolicy::RadialRamp {
                tol_min: self.wavelet_tol,
                tol_max: self.wavelet_tol_max,
                r0: self.wavelet_tol_r0,
                r1: self.wavelet_tol_r1,
            },
            2 => TolerancePolicy::WavefrontRamp {
                rad: [
                    self.wavelet_tol_r0,
                    self.wavelet_tol_r1,
                    self.wavelet_tol_rgw,
                ],
                eps: [self.wavelet_tol, self.wavelet_tol_gw, self.wavelet_tol_max],
                t_offset: self.wavelet_t_offset,
            },
            _ => TolerancePolicy::Constant {
                tol: self.wavelet_tol,
            },
        }
    }

    /// Physical spacing between nodes of a deepest-level octant; the CFL
    /// step is proportional to it.
    pub fn finest_spacing(&self) -> f64 {
        let extent = self.domain_max[0] - self.domain_min[0];
        extent / (1u64 << self.max_depth) as f64 / self.elems_per_dim as f64
    }

    pub fn dt(&self) -> f64 {
        self.cfl_factor * self.finest_spacing()
    }

    /// Reject every malformed parameter combination in one pass. Runs
    /// before the first collective call of a run so that no rank can hang
    /// waiting on a peer that bailed out.
    pub fn validate(&self) -> Result<(), Error> {
        for axis in 0..3 {
            if self.domain_max[axis] <= self.domain_min[axis] {
                return Err(Error::EmptyDomain(axis));
            }
        }
        if self.max_depth > MAX_DEPTH {
            return Err(Error::MaxDepthTooDeep(self.max_depth));
        }
        if self.reg_lev > self.max_depth {
            return Err(Error::RefinementAboveMaxDepth(self.reg_lev, self.max_depth));
        }
        if self.elems_per_dim % 2 != 0 || self.elems_per_dim < 4 {
            return Err(Error::OddElementCount(self.elems_per_dim));
        }
        if self.padding < STENCIL_REACH {
            return Err(Error::PaddingTooNarrow(self.padding, STENCIL_REACH));
        }
        self.id_type()?;
        self.tolerance_policy().validate()?;
        Ok(())
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{Config, IdType};

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn unknown_id_type_is_rejected() {
        assert!(IdType::from_id(0).is_ok());
        assert!(IdType::from_id(42).is_err());

        let mut config = Config::default();
        config.id_type = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_ramp_is_rejected() {
        let mut config = Config::default();
        config.wavelet_tol_function = 1;
        config.wavelet_tol_r0 = 30.0;
        config.wavelet_tol_r1 = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn narrow_padding_is_rejected() {
        let mut config = Config::default();
        config.padding = 1;
        assert!(config.validate().is_err());
    }
}
