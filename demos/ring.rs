use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;

use octiron::message::comm::{self, Communicator};
use octiron::message::mail::{self, Mailbox};
use octiron::message::tcp::{TcpCommunicator, TcpHost};

const TAG_RING: u32 = 7;

fn peer(rank: usize) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8000 + rank as u16)
}

/// Smoke test of the TCP transport: a ring of localhost processes passes
/// tagged point-to-point messages and then agrees on a reduction, the same
/// two traffic patterns the mesh engine generates. Each rank would normally
/// be its own process on its own host; here they share one process for
/// convenience.
fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init()
        .unwrap();

    let ranks = 0..4usize;
    let peers: Vec<_> = ranks.clone().map(peer).collect();

    let comms: Vec<_> = ranks
        .map(|rank| {
            let (_host, send, recv_sink, recv) = TcpHost::new(rank, peers.clone());
            TcpCommunicator::new(rank, peers.len(), send, recv_sink, recv)
        })
        .collect();

    let procs: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let dest = (comm.rank() + 1) % comm.size();
                mail::post(&comm, dest, TAG_RING, &format!("hello from {}", comm.rank()));

                let mut mailbox = Mailbox::new();
                let (from, message): (usize, String) = mailbox.recv(&comm, TAG_RING);
                mailbox.release(&comm);
                println!("{} received '{}' from {}", comm.rank(), message, from);

                let sum = comm::all_sum_u64(&comm, comm.rank() as u64 + 1);
                assert_eq!(sum, 10);
                if comm.rank() == 0 {
                    println!("all-reduce agrees: {}", sum);
                }
            })
        })
        .collect();

    for process in procs {
        process.join().unwrap()
    }
}
