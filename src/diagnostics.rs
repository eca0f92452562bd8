//! Timing and size diagnostics. The whole context is one owned value
//! injected into the driver rather than a family of process-wide timer
//! globals, so parallel driver instances never share state. Profile output
//! and block dumps are best-effort: a file that cannot be opened is logged
//! and skipped, never an error that stops the run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

use log::error;

use crate::config::Config;
use crate::field::{Field, FieldSet};
use crate::mesh::{Block, Mesh};
use crate::message::comm::{self, Communicator};

/// An accumulating stopwatch. Start/stop may repeat; `seconds` reports the
/// total across all completed intervals.
pub struct Timer {
    accum: Duration,
    started: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            accum: Duration::ZERO,
            started: None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(at) = self.started.take() {
            self.accum += at.elapsed();
        }
    }

    pub fn seconds(&self) -> f64 {
        self.accum.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.accum = Duration::ZERO;
        self.started = None;
    }
}

/// The diagnostics context owned by the simulation driver: one timer per
/// engine phase, plus the profile writer that reduces them over the
/// communicator.
pub struct Diagnostics {
    pub total: Timer,
    pub octree: Timer,
    pub balance: Timer,
    pub mesh_build: Timer,
    pub exchange: Timer,
    pub unzip: Timer,
    pub rhs: Timer,
    pub zip: Timer,
    pub remesh: Timer,
    pub transfer: Timer,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            total: Timer::new(),
            octree: Timer::new(),
            balance: Timer::new(),
            mesh_build: Timer::new(),
            exchange: Timer::new(),
            unzip: Timer::new(),
            rhs: Timer::new(),
            zip: Timer::new(),
            remesh: Timer::new(),
            transfer: Timer::new(),
        }
    }

    pub fn reset(&mut self) {
        for (_, timer) in self.entries_mut() {
            timer.reset();
        }
    }

    fn entries(&self) -> [(&'static str, &Timer); 10] {
        [
            ("+runtime(s)", &self.total),
            (" ++octree", &self.octree),
            (" ++balance", &self.balance),
            (" ++mesh", &self.mesh_build),
            (" ++ghost_exchange", &self.exchange),
            (" ++unzip", &self.unzip),
            (" ++rhs", &self.rhs),
            (" ++zip", &self.zip),
            (" ++remesh", &self.remesh),
            (" ++grid_transfer", &self.transfer),
        ]
    }

    fn entries_mut(&mut self) -> [(&'static str, &mut Timer); 10] {
        [
            ("+runtime(s)", &mut self.total),
            (" ++octree", &mut self.octree),
            (" ++balance", &mut self.balance),
            (" ++mesh", &mut self.mesh_build),
            (" ++ghost_exchange", &mut self.exchange),
            (" ++unzip", &mut self.unzip),
            (" ++rhs", &mut self.rhs),
            (" ++zip", &mut self.zip),
            (" ++remesh", &mut self.remesh),
            (" ++grid_transfer", &mut self.transfer),
        ]
    }

    /// Reduce every timer and the mesh sizes over the communicator and
    /// write the fixed-width profile table on rank 0. Collective: every
    /// rank must call, whatever its activity state; only rank 0 touches
    /// the filesystem, and a failed open skips the write after the
    /// reductions are done.
    pub fn write_profile<C: Communicator>(&self, comm: &C, mesh: &Mesh, config: &Config) {
        let elements = comm::all_sum_u64(comm, mesh.num_local_elements() as u64);
        let zip_dof = comm::all_sum_u64(comm, mesh.num_local_nodes() as u64);
        let unzip_dof = comm::all_sum_u64(comm, mesh.unzip_len() as u64);

        let stats: Vec<(&'static str, [f64; 3])> = self
            .entries()
            .iter()
            .map(|(name, timer)| (*name, comm::stat_f64(comm, timer.seconds())))
            .collect();

        if comm.rank() != 0 {
            return;
        }

        let path = format!("{}_final.prof", config.output_prefix);
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("{} file open failed: {}", path, e);
                return;
            }
        };
        let mut out = BufWriter::new(file);

        let _ = writeln!(out, "npes : {}", comm.size());
        let _ = writeln!(out, "partition tol : {}", config.load_imb_tol);
        let _ = writeln!(out, "wavelet tol : {}", config.wavelet_tol);
        let _ = writeln!(out, "maxdepth : {}", config.max_depth);
        let _ = writeln!(out, "Elements : {}", elements);
        let _ = writeln!(out, "DOF(zip) : {}", zip_dof);
        let _ = writeln!(out, "DOF(unzip) : {}", unzip_dof);
        let _ = writeln!(
            out,
            "{:<30}{:<10}{:<10}{:<10}",
            "step", "min(s)", "mean(s)", "max(s)"
        );
        for (name, [min, mean, max]) in stats {
            let _ = writeln!(
                out,
                "{:<30}{:<10.5}{:<10.5}{:<10.5}",
                name, min, mean, max
            );
        }
    }
}

/// Dump the interior of one block as raw native-endian doubles, one file
/// per variable, named `<prefix>_<var>_n_<nx>_r_<rank>_p_<npes>.bin`.
/// Skipped entirely unless the block's resolution is within `dump_dx_factor`
/// of the finest spacing and its bounds lie inside the configured region.
pub fn write_block_binary(
    config: &Config,
    mesh: &Mesh,
    block: &Block,
    unzipped: &FieldSet,
) {
    let h = block.spacing();
    if h[0] > config.dump_dx_factor * config.finest_spacing() {
        return;
    }
    let lo = block.position(block.interior().start, block.interior().start, block.interior().start);
    let hi = {
        let e = block.interior().end - 1;
        block.position(e, e, e)
    };
    for axis in 0..3 {
        if lo[axis] < config.dump_min[axis] || hi[axis] > config.dump_max[axis] {
            return;
        }
    }

    let n = block.alloc_per_axis();
    let interior = block.interior();
    for &f in Field::ALL.iter() {
        let path = format!(
            "{}_{}_n_{}_r_{}_p_{}.bin",
            config.output_prefix,
            f.name(),
            n,
            mesh.rank(),
            mesh.npes()
        );
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("{} file open failed: {}", path, e);
                continue;
            }
        };
        let mut out = BufWriter::new(file);
        let data = unzipped.field(f);
        for k in interior.clone() {
            for j in interior.clone() {
                for i in interior.clone() {
                    let v = data[block.offset() + block.cell(i, j, k)];
                    if out.write_all(&v.to_ne_bytes()).is_err() {
                        error!("{} write failed", path);
                        return;
                    }
                }
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{Diagnostics, Timer};

    #[test]
    fn timers_accumulate_across_intervals() {
        let mut t = Timer::new();
        t.start();
        t.stop();
        let first = t.seconds();
        t.start();
        t.stop();
        assert!(t.seconds() >= first);
        t.reset();
        assert_eq!(t.seconds(), 0.0);
    }

    #[test]
    fn stopping_an_unstarted_timer_is_harmless() {
        let mut t = Timer::new();
        t.stop();
        assert_eq!(t.seconds(), 0.0);
    }

    #[test]
    fn reset_clears_every_entry() {
        let mut d = Diagnostics::new();
        d.rhs.start();
        d.rhs.stop();
        d.reset();
        assert_eq!(d.rhs.seconds(), 0.0);
    }
}
