//! Shared helpers for the integration tests.
//!
//! - [`RawClient`] speaks the wire protocol by hand so tests can observe the
//!   exact frames an acceptor emits.
//! - [`TestServer`] runs echo acceptors on a random TCP port.
//! - [`open_pair`] opens an initiator/acceptor pair over an in-memory duplex.

#![allow(dead_code)]

mod client;
mod server;

pub use client::RawClient;
pub use server::TestServer;

use std::sync::Once;

use wsengine::{Config, Connection, OpenOptions, Role};

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once; `RUST_LOG` picks the level.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Open an initiator and an acceptor against each other.
///
/// `offered` is the initiator's preference list, `supported` the acceptor's.
pub async fn open_pair_with(
    initiator: Config,
    acceptor: Config,
    offered: &[&str],
    supported: &[&str],
) -> (Connection, Connection) {
    init_test_logging();
    let (a, b) = tokio::io::duplex(256 * 1024);
    let client = Connection::new(a, Role::Initiator, initiator).unwrap();
    let server = Connection::new(b, Role::Acceptor, acceptor).unwrap();

    let (opened_client, opened_server) = tokio::join!(
        client.open(
            OpenOptions::new("localhost", "/test").with_subprotocols(offered.iter().copied())
        ),
        server.open(OpenOptions::default().with_subprotocols(supported.iter().copied())),
    );
    opened_client.unwrap();
    opened_server.unwrap();
    (client, server)
}

pub async fn open_pair() -> (Connection, Connection) {
    open_pair_with(Config::initiator(), Config::acceptor(), &[], &[]).await
}
