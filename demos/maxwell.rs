use clap::{AppSettings, Clap};
use log::{error, info};

use octiron::config::Config;
use octiron::diagnostics::{self, Diagnostics};
use octiron::error::Error;
use octiron::message::local::channel_group;
use octiron::physics;
use octiron::rhs::Evolution;

#[derive(Clap)]
#[clap(version = "0.1.0", about = "Maxwell dipole evolution on an adaptive octree")]
#[clap(setting = AppSettings::ColoredHelp)]
struct Opts {
    #[clap(long, default_value = "8")]
    max_depth: u32,

    #[clap(long, default_value = "3")]
    reg_lev: u32,

    #[clap(short = 's', long, default_value = "40")]
    steps: u64,

    #[clap(long, default_value = "1e-4")]
    wavelet_tol: f64,

    /// 0 = constant tolerance, 1 = radial ramp, 2 = wavefront ramp.
    #[clap(long, default_value = "0")]
    tol_function: u32,

    #[clap(long, default_value = "10")]
    remesh_interval: u64,

    #[clap(short = 'o', long, default_value = "octiron")]
    output: String,
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let opts = Opts::parse();

    let mut config = Config::default();
    config.max_depth = opts.max_depth;
    config.reg_lev = opts.reg_lev;
    config.wavelet_tol = opts.wavelet_tol;
    config.wavelet_tol_function = opts.tol_function;
    config.remesh_interval = opts.remesh_interval;
    config.output_prefix = opts.output;

    // A rejected configuration terminates the run before any mesh work;
    // continuing would silently produce wrong physics.
    if let Err(e) = run(config, opts.steps) {
        error!("configuration rejected: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, steps: u64) -> Result<(), Error> {
    let comm = channel_group(1).pop().unwrap();
    let physics = physics::from_config(&config)?;
    let mut diag = Diagnostics::new();

    diag.total.start();
    let mut ev = Evolution::new(&comm, config, physics, &mut diag)?;

    for step in 1..=steps {
        ev.advance(&comm, &mut diag);

        if step % ev.config().remesh_interval == 0 && ev.remesh(&comm, &mut diag) {
            info!(
                "mesh now {} elements at t = {:.4}",
                ev.mesh().num_global_elements(),
                ev.time()
            );
        }

        if step % 10 == 0 {
            let (l2, linf) = ev.analytic_error(&comm);
            println!(
                "[{}] t={:.4} elements={} l2={:.4e} linf={:.4e}",
                step,
                ev.time(),
                ev.mesh().num_global_elements(),
                l2,
                linf
            );
        }
    }
    diag.total.stop();

    diag.write_profile(&comm, ev.mesh(), ev.config());
    for block in ev.mesh().blocks() {
        diagnostics::write_block_binary(ev.config(), ev.mesh(), block, ev.unzipped());
    }

    let path = format!("{}_state.cbor", ev.config().output_prefix);
    match std::fs::File::create(&path) {
        Ok(file) => {
            let mut buffer = std::io::BufWriter::new(file);
            ciborium::ser::into_writer(ev.state(), &mut buffer).unwrap();
        }
        Err(e) => error!("{} file open failed: {}", path, e),
    }
    Ok(())
}
