//! Bidirectional tunnel between a WebSocket client and a TCP remote.
//!
//! Each tunnel runs two pump directions concurrently:
//!
//! * remote→client: raw bytes from the remote are re-framed and written to
//!   the client socket (runs on the worker's own thread);
//! * client→remote: frames from the client are decoded and their payload
//!   written raw to the remote (runs on one spawned thread).
//!
//! Whichever direction finishes first shuts down both sockets, which makes
//! the other direction's blocking read fail; the worker then joins the
//! spawned thread before the session ends. That joint-termination rule is
//! what keeps half-open descriptors from leaking.

use crate::frame;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use thiserror::Error;
use tracing::{debug, trace};

/// Read-buffer size for the remote→client direction. Stays under the
/// 16-bit frame length limit with room to spare.
const PUMP_BUF_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("remote {host}:{port} unreachable: {reason}")]
    RemoteUnreachable {
        host: String,
        port: String,
        reason: String,
    },
}

/// Connects to `host:port`, trying each resolved IPv4 address in order.
///
/// The first successful connection wins. No retries: if every address
/// fails the session is aborted and the client has to reconnect.
pub fn connect_remote(host: &str, port: &str) -> Result<TcpStream, TunnelError> {
    let unreachable = |reason: String| TunnelError::RemoteUnreachable {
        host: host.to_string(),
        port: port.to_string(),
        reason,
    };

    let port_num: u16 = port
        .parse()
        .map_err(|_| unreachable(format!("invalid port {port:?}")))?;
    let addrs = (host, port_num)
        .to_socket_addrs()
        .map_err(|e| unreachable(e.to_string()))?;

    let mut last_error = None;
    for addr in addrs.filter(SocketAddr::is_ipv4) {
        trace!(%addr, "trying remote address");
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(unreachable(match last_error {
        Some(e) => e.to_string(),
        None => "no IPv4 address resolved".to_string(),
    }))
}

/// One proxied session: a client socket speaking WebSocket framing and a
/// raw TCP remote.
pub struct Tunnel {
    client: TcpStream,
    remote: TcpStream,
}

impl Tunnel {
    pub fn new(client: TcpStream, remote: TcpStream) -> Tunnel {
        Tunnel { client, remote }
    }

    /// Pumps both directions until either side closes, then tears down the
    /// pair.
    ///
    /// The client→remote direction runs on a spawned thread while the
    /// calling thread handles remote→client. Both exit paths go through
    /// [`shutdown_pair`], so a close observed by one direction cascades to
    /// the other; the join below can therefore never block indefinitely.
    pub fn run(self) -> std::io::Result<()> {
        let client_read = self.client.try_clone()?;
        let remote_write = self.remote.try_clone()?;

        let uplink = thread::Builder::new()
            .name("tunnel-uplink".to_string())
            .spawn(move || {
                let mut client = client_read;
                let mut remote = remote_write;
                let sent = pump_client_to_remote(&mut client, &mut remote);
                shutdown_pair(&client, &remote);
                sent
            })?;

        let mut client = self.client;
        let mut remote = self.remote;
        let received = pump_remote_to_client(&mut remote, &mut client);
        shutdown_pair(&client, &remote);

        let sent = uplink.join().unwrap_or(0);
        debug!(
            bytes_to_client = received,
            bytes_to_remote = sent,
            "tunnel closed"
        );
        Ok(())
    }
}

/// Shuts down both sockets of a session. Safe to call from either pump
/// direction and safe to call more than once; errors from already-closed
/// sockets are ignored.
pub fn shutdown_pair(client: &TcpStream, remote: &TcpStream) {
    let _ = client.shutdown(Shutdown::Both);
    let _ = remote.shutdown(Shutdown::Both);
}

/// remote→client: read raw bytes, re-frame, write. Returns bytes moved.
fn pump_remote_to_client<R: Read, W: Write>(remote: &mut R, client: &mut W) -> u64 {
    let mut buf = [0u8; PUMP_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match remote.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                trace!("remote read ended: {e}");
                break;
            }
        };
        let framed = match frame::encode(&buf[..n]) {
            Ok(framed) => framed,
            Err(e) => {
                debug!("cannot frame remote data: {e}");
                break;
            }
        };
        if let Err(e) = client.write_all(&framed) {
            trace!("client write ended: {e}");
            break;
        }
        total += n as u64;
    }
    total
}

/// client→remote: decode frames, write the unmasked payload raw.
/// Returns bytes moved.
fn pump_client_to_remote<R: Read, W: Write>(client: &mut R, remote: &mut W) -> u64 {
    let mut total = 0u64;
    loop {
        match frame::decode(client) {
            Ok(Some(frame)) => {
                if let Err(e) = remote.write_all(&frame.payload) {
                    trace!("remote write ended: {e}");
                    break;
                }
                total += frame.payload.len() as u64;
            }
            Ok(None) => break,
            Err(e) => {
                debug!("client frame stream ended: {e}");
                break;
            }
        }
    }
    total
}
