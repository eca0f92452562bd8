use std::collections::HashMap;
use std::io;
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use log::{error, info};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::Communicator;
use super::util;

const CXN_R_TIMEOUT: Duration = Duration::from_millis(250);
const CXN_W_TIMEOUT: Duration = Duration::from_millis(250);
const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const RETRY_ATTEMPTS: usize = 30;

type SendSink = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type RecvSink = crossbeam_channel::Sender<Vec<u8>>;
type RecvSource = crossbeam_channel::Receiver<Vec<u8>>;

/// Background threads carrying one rank's traffic: a listener accepting
/// connections from peers and a serial sender owning one outbound stream
/// per peer. Frames are length-prefixed and acknowledged, and a broken
/// outbound connection is re-established with exponential backoff.
pub struct TcpHost {
    send_thread: Option<thread::JoinHandle<()>>,
}

impl TcpHost {
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> (Self, SendSink, RecvSink, RecvSource) {
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers.clone(), send_src);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let _ = Self::start_listener(peers[rank], recv_sink.clone());

        (
            TcpHost {
                send_thread: Some(send_thread),
            },
            send_sink,
            recv_sink,
            recv_src,
        )
    }

    /// Block until every queued outbound message has been written. The
    /// sender thread exits when all send sinks are dropped.
    pub fn join(&mut self) {
        self.send_thread.take().unwrap().join().unwrap()
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        send_src: crossbeam_channel::Receiver<(usize, Vec<u8>)>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut streams: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                loop {
                    if !streams.contains_key(&rank) {
                        match Self::connect_with_retry(peers[rank]) {
                            Some(s) => {
                                streams.insert(rank, s);
                            }
                            None => panic!("unable to reach peer {}", peers[rank]),
                        }
                    }
                    let stream = streams.get_mut(&rank).unwrap();

                    match Self::write_frame(stream, &message) {
                        Ok(()) => break,
                        Err(e) => {
                            error!("send to {} failed ({}); reconnecting", peers[rank], e);
                            streams.remove(&rank);
                        }
                    }
                }
            }
        })
    }

    fn write_frame(stream: &mut TcpStream, message: &[u8]) -> io::Result<()> {
        stream.write_all(&message.len().to_le_bytes())?;
        stream.write_all(message)?;
        let ack = util::read_usize(stream)?;
        if ack != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer acked {} of {} bytes", ack, message.len()),
            ));
        }
        Ok(())
    }

    fn start_listener(addr: SocketAddr, recv_sink: RecvSink) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            info!("listening on {}", addr);
            let listener = TcpListener::bind(addr).unwrap();
            loop {
                let (stream, remote) = listener.accept().unwrap();
                Self::handle_connection(stream, remote, recv_sink.clone());
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, remote: SocketAddr, recv_sink: RecvSink) {
        info!("receiving connection from {}", remote);
        thread::spawn(move || loop {
            let frame = util::read_usize(&mut stream)
                .and_then(|size| util::read_bytes_vec(&mut stream, size));
            match frame {
                Ok(bytes) => {
                    let size = bytes.len();
                    if recv_sink.send(bytes).is_err() {
                        return;
                    }
                    if let Err(e) = stream.write_all(&size.to_le_bytes()) {
                        error!("ack to {} failed: {}", remote, e);
                        return;
                    }
                }
                Err(e) => {
                    info!("connection from {} closed: {}", remote, e);
                    return;
                }
            }
        });
    }

    fn connect_with_retry(addr: SocketAddr) -> Option<TcpStream> {
        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(RETRY_ATTEMPTS)
            .retry(
                || {
                    // Acks are awaited with a blocking read; a timeout there
                    // would trigger a reconnect-and-resend, duplicating the
                    // frame at the receiver.
                    let stream = TcpStream::connect_timeout(&addr, CXN_R_TIMEOUT)?;
                    stream.set_write_timeout(Some(CXN_W_TIMEOUT))?;
                    Ok::<_, io::Error>(stream)
                },
                |e: &io::Error, delay| {
                    info!("connect to {} failed ({}); retrying", addr, e);
                    thread::sleep(delay);
                },
            )?
            .ok()
    }
}

/// The `Communicator` face of a `TcpHost`. Sends go through the host's
/// serial sender thread; receives come off the listener's channel, and
/// requeued messages are pushed back onto it.
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: SendSink,
    recv_sink: RecvSink,
    recv_src: RecvSource,
}

impl TcpCommunicator {
    pub fn new(
        rank: usize,
        num_peers: usize,
        send_sink: SendSink,
        recv_sink: RecvSink,
        recv_src: RecvSource,
    ) -> Self {
        Self {
            rank,
            num_peers,
            send_sink,
            recv_sink,
            recv_src,
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.send_sink.send((rank, message)).unwrap()
    }

    fn recv(&self) -> Vec<u8> {
        self.recv_src.recv().unwrap()
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.recv_sink.send(bytes).unwrap()
    }
}
