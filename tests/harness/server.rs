//! Echo acceptors on a random TCP port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use wsengine::{CloseCode, Config, Connection, Error, OpenOptions, Role};

pub struct TestServer {
    accept_loop: JoinHandle<()>,
    completed: Arc<AtomicUsize>,
}

impl TestServer {
    /// Bind to `127.0.0.1:0` and echo every message back until the peer closes.
    pub async fn spawn(supported: &[&str]) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let supported: Vec<String> = supported.iter().map(|s| s.to_string()).collect();
        let completed = Arc::new(AtomicUsize::new(0));

        let accept_loop = {
            let completed = completed.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let supported = supported.clone();
                    let completed = completed.clone();
                    tokio::spawn(async move {
                        if echo(stream, supported).await.is_ok() {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
            })
        };

        (
            Self {
                accept_loop,
                completed,
            },
            addr,
        )
    }

    /// Connections that finished with a clean close handshake.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        self.accept_loop.abort();
        let _ = self.accept_loop.await;
    }
}

async fn echo(stream: tokio::net::TcpStream, supported: Vec<String>) -> wsengine::Result<()> {
    stream.set_nodelay(true)?;
    let conn = Connection::new(stream, Role::Acceptor, Config::acceptor())?;
    conn.open(OpenOptions::default().with_subprotocols(supported))
        .await?;

    let mut buf = vec![0u8; 1 << 20];
    loop {
        match conn.receive_message(&mut buf).await {
            Ok(msg) => {
                conn.send_message(buf[..msg.len].to_vec(), msg.content_type)
                    .await?;
            }
            Err(Error::ConnectionClosed(_)) => break,
            Err(e) => return Err(e),
        }
    }
    conn.close(CloseCode::Normal, "").await
}
