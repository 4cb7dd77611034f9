//! Binary entry point: CLI parsing, logging setup, and listener bootstrap.
//!
//! Exit codes: 1 when the listener cannot be set up (socket/bind/listen),
//! 0 for `--help`; otherwise the process serves until terminated
//! externally.

use clap::Parser;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr, TcpListener};
use tracing::{error, info};
use wsbridge::dispatch::{self, DispatchPolicy};

#[derive(Parser, Debug)]
#[command(name = "wsbridge", version, about = "WebSocket-to-TCP tunneling proxy")]
struct Cli {
    /// Address to listen on
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0")]
    listen: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 7777)]
    port: u16,

    /// Worker count for the pooled policy; also the in-flight session ceiling
    #[arg(long, default_value_t = 20)]
    pool_size: usize,

    /// Connection ceiling used to size the OS listen backlog (backlog = 2x)
    #[arg(long, default_value_t = 100)]
    max_connections: i32,

    /// How accepted connections are assigned to workers
    #[arg(long, value_enum, default_value_t = PolicyArg::Pooled)]
    policy: PolicyArg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum PolicyArg {
    /// Bounded worker pool with acceptor back-pressure
    Pooled,
    /// One thread per connection, no ceiling
    Spawn,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsbridge=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::new(cli.listen, cli.port);

    let listener = match bind_listener(addr, cli.max_connections * 2) {
        Ok(listener) => listener,
        Err(e) => {
            error!("listener setup failed on {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("server {addr} has started");

    let policy = match cli.policy {
        PolicyArg::Pooled => DispatchPolicy::Pooled {
            pool_size: cli.pool_size,
        },
        PolicyArg::Spawn => DispatchPolicy::PerConnection,
    };
    if let Err(e) = dispatch::serve(listener, policy) {
        error!("dispatcher failed: {e}");
        std::process::exit(1);
    }
}

/// Binds and listens with an explicit backlog (std's `TcpListener::bind`
/// offers no backlog control).
fn bind_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
