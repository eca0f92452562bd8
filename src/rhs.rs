//! The evolution driver: owns the distributed state and runs the per-step
//! pipeline, ghost exchange overlapped with the local unzip, derivatives
//! and physics right-hand side per block, boundary kernel on flagged
//! blocks, zip, and the RK4 combination of zipped stages. Remeshing (in
//! the `remesh` module) swaps the mesh out from under the driver between
//! steps and forces the workspace to be rebuilt.

use std::ops::Range;

use log::info;

use crate::config::Config;
use crate::deriv::DerivWorkspace;
use crate::diagnostics::Diagnostics;
use crate::error::Error;
use crate::exchange;
use crate::field::{Field, FieldSet};
use crate::mesh::Mesh;
use crate::message::comm::{self, Communicator};
use crate::octant::Octant;
use crate::octree;
use crate::physics::PhysicsModel;
use crate::wavelet::TolerancePolicy;

pub struct Evolution<P: PhysicsModel> {
    pub(crate) config: Config,
    pub(crate) policy: TolerancePolicy,
    pub(crate) physics: P,
    /// The global sorted balanced octant list, identical on every rank.
    pub(crate) octants: Vec<Octant>,
    pub(crate) parts: Vec<Range<usize>>,
    pub(crate) mesh: Mesh,
    /// Zipped solution state.
    pub(crate) state: FieldSet,
    pub(crate) unzipped: FieldSet,
    pub(crate) unzipped_rhs: FieldSet,
    pub(crate) workspace: DerivWorkspace,
    pub(crate) time: f64,
    pub(crate) step: u64,
}

impl<P: PhysicsModel> Evolution<P> {
    /// Validate the configuration, build the initial octree and mesh, and
    /// seed the state with the model's initial data. Collective.
    pub fn new<C: Communicator>(
        comm: &C,
        config: Config,
        physics: P,
        diag: &mut Diagnostics,
    ) -> Result<Self, Error> {
        config.validate()?;
        let domain = config.domain();
        let policy = config.tolerance_policy();

        // Each rank seeds a slab of the regular tiling; the distributed
        // sort primitive assembles the identical global list everywhere.
        diag.octree.start();
        let mut seed =
            octree::block_adaptive_octree(&domain, config.domain_min, config.domain_max, config.reg_lev);
        octree::sort_and_unique(&mut seed);
        let lo = comm.rank() * seed.len() / comm.size();
        let hi = (comm.rank() + 1) * seed.len() / comm.size();
        let octants = octree::gather_sorted(comm, &seed[lo..hi]);
        diag.octree.stop();

        diag.balance.start();
        let octants = octree::balance_2to1(octants, domain.max_depth);
        diag.balance.stop();

        let parts = octree::partition(&octants, comm.size());

        diag.mesh_build.start();
        let mesh = Mesh::build(
            comm,
            domain,
            &octants,
            &parts,
            config.elems_per_dim,
            config.padding,
        );
        diag.mesh_build.stop();

        let mut state = FieldSet::zeros(mesh.num_total_nodes());
        apply_point_function(&mesh, &mut state, |p, out| physics.initial_data(p, out));
        exchange::ghost_exchange(comm, &mesh, &mut state);

        let mut workspace = DerivWorkspace::new();
        workspace.allocate(&mesh, config.safety_factor);

        let unzipped = FieldSet::zeros(mesh.unzip_len());
        let unzipped_rhs = FieldSet::zeros(mesh.unzip_len());

        info!(
            "rank {}: evolution over {} global elements, dt = {:.3e}",
            comm.rank(),
            mesh.num_global_elements(),
            config.dt()
        );

        Ok(Self {
            config,
            policy,
            physics,
            octants,
            parts,
            mesh,
            state,
            unzipped,
            unzipped_rhs,
            workspace,
            time: 0.0,
            step: 0,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn state(&self) -> &FieldSet {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn unzipped(&self) -> &FieldSet {
        &self.unzipped
    }

    /// Advance one RK4 step. Each stage runs the full exchange, unzip,
    /// derivative, physics, boundary, zip pipeline on its own stage state.
    pub fn advance<C: Communicator>(&mut self, comm: &C, diag: &mut Diagnostics) {
        let dt = self.config.dt();

        let mut u = self.state.clone();
        let k1 = self.eval_rhs(comm, diag, &mut u);

        let mut u1 = FieldSet::zeros(self.state.len());
        u1.assign_axpy(&self.state, 0.5 * dt, &k1);
        let k2 = self.eval_rhs(comm, diag, &mut u1);

        let mut u2 = FieldSet::zeros(self.state.len());
        u2.assign_axpy(&self.state, 0.5 * dt, &k2);
        let k3 = self.eval_rhs(comm, diag, &mut u2);

        let mut u3 = FieldSet::zeros(self.state.len());
        u3.assign_axpy(&self.state, dt, &k3);
        let k4 = self.eval_rhs(comm, diag, &mut u3);

        self.state.add_scaled(dt / 6.0, &k1);
        self.state.add_scaled(dt / 3.0, &k2);
        self.state.add_scaled(dt / 3.0, &k3);
        self.state.add_scaled(dt / 6.0, &k4);

        self.time += dt;
        self.step += 1;
    }

    /// One right-hand-side evaluation of a zipped stage state. The ghost
    /// exchange is issued first and waited on only after the local unzip
    /// half has run, so transit overlaps compute; nothing ghost-dependent
    /// is touched before the wait returns.
    fn eval_rhs<C: Communicator>(
        &mut self,
        comm: &C,
        diag: &mut Diagnostics,
        u: &mut FieldSet,
    ) -> FieldSet {
        diag.exchange.start();
        let pending = exchange::begin(comm, &self.mesh, u);
        diag.exchange.stop();

        diag.unzip.start();
        self.mesh.unzip_internal(u, &mut self.unzipped);
        diag.unzip.stop();

        diag.exchange.start();
        exchange::finish(comm, &self.mesh, pending, u);
        diag.exchange.stop();

        diag.unzip.start();
        self.mesh.unzip_external(u, &mut self.unzipped);
        diag.unzip.stop();

        diag.rhs.start();
        for block in self.mesh.blocks() {
            let state = self.unzipped.range(block.offset(), block.alloc_len());
            let out = self.unzipped_rhs.range_mut(block.offset(), block.alloc_len());
            self.physics.rhs(block, state, &mut self.workspace, out);

            if block.is_boundary() {
                let state = self.unzipped.range(block.offset(), block.alloc_len());
                let out = self.unzipped_rhs.range_mut(block.offset(), block.alloc_len());
                self.physics.boundary(block, state, out);
            }
        }
        diag.rhs.stop();

        diag.zip.start();
        let mut zipped_rhs = FieldSet::zeros(self.mesh.num_total_nodes());
        self.mesh.zip(&self.unzipped_rhs, &mut zipped_rhs);
        diag.zip.stop();

        zipped_rhs
    }

    /// Global l2 and max norms of the difference between the state and the
    /// model's closed-form solution at the current time. Collective;
    /// inactive ranks contribute identity values.
    pub fn analytic_error<C: Communicator>(&self, comm: &C) -> (f64, f64) {
        let mut analytic = FieldSet::zeros(self.mesh.num_total_nodes());
        let t = self.time;
        apply_point_function(&self.mesh, &mut analytic, |p, out| {
            self.physics.analytic(p, t, out)
        });

        let mut sq = 0.0;
        let mut linf = 0f64;
        let mut count = 0u64;
        for &f in Field::ALL.iter() {
            let got = self.state.field(f);
            let want = analytic.field(f);
            for node in 0..self.mesh.num_local_nodes() {
                let d = got[node] - want[node];
                sq += d * d;
                linf = linf.max(d.abs());
                count += 1;
            }
        }

        let sq = comm::all_sum_f64(comm, sq);
        let count = comm::all_sum_u64(comm, count).max(1);
        let linf = comm::all_max_f64(comm, linf);
        ((sq / count as f64).sqrt(), linf)
    }
}

/// Evaluate a per-point function on every local node of a zipped vector.
/// Nodes are cell-centered on each octant's lattice; positions are mapped
/// from grid to physical space through the domain transform.
pub fn apply_point_function<F>(mesh: &Mesh, state: &mut FieldSet, mut f: F)
where
    F: FnMut([f64; 3], &mut [f64; Field::COUNT]),
{
    let e = mesh.elems();
    let domain = *mesh.domain();
    let mut var = [0.0; Field::COUNT];
    for pos in mesh.local_range() {
        let o = mesh.all_octants()[pos];
        let cs = o.edge_len(domain.max_depth) as f64 / e as f64;
        for k in 0..e {
            for j in 0..e {
                for i in 0..e {
                    let g = [
                        o.x() as f64 + (i as f64 + 0.5) * cs,
                        o.y() as f64 + (j as f64 + 0.5) * cs,
                        o.z() as f64 + (k as f64 + 0.5) * cs,
                    ];
                    f(domain.position(g), &mut var);
                    let node = mesh.node_offset(pos) + (k * e + j) * e + i;
                    for &field in Field::ALL.iter() {
                        state.field_mut(field)[node] = var[field.index()];
                    }
                }
            }
        }
    }
}
