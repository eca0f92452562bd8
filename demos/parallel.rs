use std::thread;

use clap::{AppSettings, Clap};
use log::error;

use octiron::config::Config;
use octiron::diagnostics::Diagnostics;
use octiron::message::comm::Communicator;
use octiron::message::local::channel_group;
use octiron::physics;
use octiron::rhs::Evolution;

#[derive(Clap)]
#[clap(version = "0.1.0", about = "Multi-rank evolution over an in-process communicator group")]
#[clap(setting = AppSettings::ColoredHelp)]
struct Opts {
    #[clap(short = 'r', long, default_value = "4")]
    ranks: usize,

    #[clap(short = 's', long, default_value = "40")]
    steps: u64,

    #[clap(long, default_value = "7")]
    max_depth: u32,

    #[clap(long, default_value = "2")]
    reg_lev: u32,
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
    let steps = opts.steps;

    // One thread per rank, exactly the wiring a multi-process run would
    // have over TCP, but against the channel transport. Validation is
    // deterministic, so a bad configuration stops every rank before the
    // first collective rather than leaving a subset alive.
    let handles: Vec<_> = channel_group(opts.ranks)
        .into_iter()
        .map(|comm| {
            let config = config.clone();
            thread::spawn(move || -> Result<(), octiron::error::Error> {
                let physics = physics::from_config(&config)?;
                let mut diag = Diagnostics::new();

                diag.total.start();
                let mut ev = Evolution::new(&comm, config, physics, &mut diag)?;

                for step in 1..=steps {
                    ev.advance(&comm, &mut diag);
                    if step % ev.config().remesh_interval == 0 {
                        ev.remesh(&comm, &mut diag);
                    }

                    if step % 10 == 0 {
                        let (l2, linf) = ev.analytic_error(&comm);
                        if comm.rank() == 0 {
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
                }
                diag.total.stop();

                diag.write_profile(&comm, ev.mesh(), ev.config());
                Ok(())
            })
        })
        .collect();

    let mut failed = false;
    for handle in handles {
        if let Err(e) = handle.join().unwrap() {
            error!("rank failed: {}", e);
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
