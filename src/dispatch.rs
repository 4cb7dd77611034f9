//! Connection acceptance and session dispatch.
//!
//! The acceptor hands every inbound connection to a worker under one of
//! two policies chosen at startup:
//!
//! * [`DispatchPolicy::Pooled`]: a fixed set of long-lived workers claims
//!   sockets from a bounded queue in FIFO order. The ceiling counts
//!   in-flight sessions, so a full house blocks the acceptor (back-pressure)
//!   instead of dropping connections.
//! * [`DispatchPolicy::PerConnection`]: every connection gets a fresh
//!   thread, no ceiling.
//!
//! Regardless of policy a worker runs the same session pipeline:
//! handshake → one control frame → route resolution → remote connect →
//! tunnel pumps → joint shutdown. Failures stay inside the session that
//! caused them; the acceptor and other sessions never see them.

use crate::frame::{self, FrameError};
use crate::handshake::{self, HandshakeError};
use crate::route::{self, RouteError};
use crate::tunnel::{self, Tunnel, TunnelError};
use std::collections::VecDeque;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How accepted connections are assigned to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// `pool_size` workers, at most `pool_size` sessions in flight.
    Pooled { pool_size: usize },
    /// One spawned thread per connection, no admission control.
    PerConnection,
}

/// Anything that can end a session early. Every variant is handled inside
/// the worker that owns the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Protocol(#[from] FrameError),
    #[error(transparent)]
    Routing(#[from] RouteError),
    #[error(transparent)]
    Remote(#[from] TunnelError),
    #[error("session i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounded FIFO hand-off between the acceptor and pooled workers.
///
/// A slot is occupied from the moment a connection is queued until the
/// worker that claimed it signals completion, so the capacity bounds
/// in-flight sessions and not just queued ones. All state lives under one
/// mutex with two wait conditions: `not_empty` wakes workers, `not_full`
/// wakes the acceptor. Entries are moved in and out, never aliased.
pub struct SessionQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    waiting: VecDeque<T>,
    in_flight: usize,
}

impl<T> SessionQueue<T> {
    pub fn new(capacity: usize) -> SessionQueue<T> {
        assert!(capacity > 0, "queue capacity must be positive");
        SessionQueue {
            state: Mutex::new(QueueState {
                waiting: VecDeque::with_capacity(capacity),
                in_flight: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Queues one connection, blocking while the ceiling is reached.
    pub fn push(&self, conn: T) {
        let mut state = self.state.lock().unwrap();
        while state.waiting.len() + state.in_flight >= self.capacity {
            state = self.not_full.wait(state).unwrap();
        }
        state.waiting.push_back(conn);
        self.not_empty.notify_one();
    }

    /// Claims the oldest queued connection, blocking while none is
    /// available. The claimed entry counts as in flight until
    /// [`complete`](Self::complete) is called.
    pub fn claim(&self) -> T {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(conn) = state.waiting.pop_front() {
                state.in_flight += 1;
                return conn;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Releases the slot held by a finished session.
    pub fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.in_flight > 0);
        state.in_flight = state.in_flight.saturating_sub(1);
        self.not_full.notify_one();
    }
}

/// Accepts connections on `listener` forever, dispatching each according
/// to `policy`. Only returns on worker-spawn failure.
pub fn serve(listener: TcpListener, policy: DispatchPolicy) -> std::io::Result<()> {
    match policy {
        DispatchPolicy::Pooled { pool_size } => serve_pooled(listener, pool_size),
        DispatchPolicy::PerConnection => serve_spawning(listener),
    }
}

fn serve_pooled(listener: TcpListener, pool_size: usize) -> std::io::Result<()> {
    let queue = Arc::new(SessionQueue::new(pool_size));
    for worker in 0..pool_size {
        let queue = Arc::clone(&queue);
        thread::Builder::new()
            .name(format!("worker-{worker}"))
            .spawn(move || {
                loop {
                    let conn = queue.claim();
                    run_session(conn);
                    queue.complete();
                }
            })?;
    }

    info!(pool_size, "serving with bounded worker pool");
    loop {
        match listener.accept() {
            Ok((conn, peer)) => {
                debug!(%peer, "accepted connection");
                queue.push(conn);
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

fn serve_spawning(listener: TcpListener) -> std::io::Result<()> {
    info!("serving with per-connection workers");
    loop {
        match listener.accept() {
            Ok((conn, peer)) => {
                debug!(%peer, "accepted connection");
                thread::Builder::new()
                    .name("session".to_string())
                    .spawn(move || run_session(conn))?;
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

/// Runs one full session, containing any failure to this connection.
fn run_session(conn: TcpStream) {
    let peer = conn
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    match session(conn) {
        Ok(()) => debug!(peer = %peer, "session finished"),
        // Dropping the socket on the error path closes it.
        Err(err) => warn!(peer = %peer, error = %err, "session aborted"),
    }
}

fn session(mut client: TcpStream) -> Result<(), SessionError> {
    handshake::perform(&mut client)?;

    let control = match frame::decode(&mut client)? {
        Some(frame) => frame,
        None => {
            debug!("client closed before sending a control frame");
            return Ok(());
        }
    };
    let spec = route::resolve(&control.payload)?;

    let remote = tunnel::connect_remote(&spec.host, &spec.port)?;
    info!(host = %spec.host, port = %spec.port, "tunnel established");

    Tunnel::new(client, remote).run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn queue_is_fifo() {
        let queue = SessionQueue::new(4);
        queue.push(1u32);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.claim(), 1);
        assert_eq!(queue.claim(), 2);
        assert_eq!(queue.claim(), 3);
    }

    #[test]
    fn push_blocks_at_ceiling_until_completion() {
        let queue = Arc::new(SessionQueue::new(1));
        queue.push(1u32);
        assert_eq!(queue.claim(), 1);
        // One session in flight: the ceiling is reached even though the
        // queue itself is empty.

        let (pushed_tx, pushed_rx) = mpsc::channel();
        let blocked_queue = Arc::clone(&queue);
        thread::spawn(move || {
            blocked_queue.push(2u32);
            pushed_tx.send(()).unwrap();
        });

        assert!(
            pushed_rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "push should block while a session is in flight"
        );

        queue.complete();
        pushed_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("push should resume once a slot frees up");
        assert_eq!(queue.claim(), 2);
    }

    #[test]
    fn extra_acceptance_waits_for_a_session_slot() {
        // Ceiling of 2: the third concurrent push has to wait.
        let queue = Arc::new(SessionQueue::new(2));
        queue.push(1u32);
        queue.push(2);

        let (pushed_tx, pushed_rx) = mpsc::channel();
        let blocked_queue = Arc::clone(&queue);
        thread::spawn(move || {
            blocked_queue.push(3u32);
            pushed_tx.send(()).unwrap();
        });
        assert!(pushed_rx.recv_timeout(Duration::from_millis(200)).is_err());

        // Claiming alone does not free a slot; completing does.
        assert_eq!(queue.claim(), 1);
        assert!(pushed_rx.recv_timeout(Duration::from_millis(200)).is_err());
        queue.complete();
        pushed_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("push should resume after completion");
        // Nothing was dropped along the way.
        assert_eq!(queue.claim(), 2);
        assert_eq!(queue.claim(), 3);
    }

    #[test]
    fn claim_blocks_until_push() {
        let queue = Arc::new(SessionQueue::new(2));
        let (claimed_tx, claimed_rx) = mpsc::channel();
        let worker_queue = Arc::clone(&queue);
        thread::spawn(move || {
            claimed_tx.send(worker_queue.claim()).unwrap();
        });
        assert!(claimed_rx.recv_timeout(Duration::from_millis(200)).is_err());
        queue.push(9u32);
        assert_eq!(
            claimed_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            9
        );
    }
}
