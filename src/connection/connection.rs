use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use super::driver::{self, Command, Reply, Status, wait_aborted};
use crate::config::{Config, TimerSetting, TimingConstant};
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseInfo, ContentType};

/// Invoked on the connection's executor when the peer's Close frame arrives
/// while the connection is open.
pub type CloseCallback = Box<dyn FnMut(&CloseInfo) + Send + 'static>;

/// Parameters for [`Connection::open`].
///
/// For an initiator, `host`, `path`, `subprotocols` (in preference order) and
/// `headers` make up the upgrade request. For an acceptor, `subprotocols` is
/// the supported list and the other request fields are ignored.
#[derive(Default)]
pub struct OpenOptions {
    pub host: String,
    pub path: String,
    pub subprotocols: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub on_close_received: Option<CloseCallback>,
}

impl OpenOptions {
    /// Options for an initiator connecting to `host` at `path`.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an extra request header, e.g. for authentication.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn on_close_received<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&CloseInfo) + Send + 'static,
    {
        self.on_close_received = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("subprotocols", &self.subprotocols)
            .field("headers", &self.headers)
            .field("on_close_received", &self.on_close_received.is_some())
            .finish()
    }
}

/// Result of [`Connection::receive_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReceipt {
    /// Bytes written to the front of the buffer.
    pub len: usize,
    pub content_type: ContentType,
}

/// Result of [`Connection::receive_fragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentReceipt {
    /// Bytes written at the requested offset.
    pub len: usize,
    /// `true` if this was the last piece of the message.
    pub is_final: bool,
    pub content_type: ContentType,
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    abort: watch::Sender<bool>,
    status: watch::Receiver<Status>,
    role: Role,
    id: u64,
}

/// A WebSocket connection over an owned transport.
///
/// The transport is driven by a background task that serializes every state
/// change of the connection. `Connection` is a cheap handle to that task: it
/// can be cloned and used from several tasks, e.g. one sending while another
/// receives. Each direction processes one operation at a time; further
/// operations wait their turn in issue order.
///
/// ## Example
///
/// ```rust,no_run
/// use wsengine::{CloseCode, Config, Connection, ContentType, OpenOptions, Role};
///
/// # async fn run() -> wsengine::Result<()> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let conn = Connection::new(stream, Role::Initiator, Config::initiator())?;
/// conn.open(OpenOptions::new("127.0.0.1:8080", "/chat").with_subprotocols(["chat.v2"]))
///     .await?;
///
/// conn.send_message("Hello", ContentType::Text).await?;
///
/// let mut buf = vec![0u8; 4096];
/// let receipt = conn.receive_message(&mut buf).await?;
/// println!("{:?}", &buf[..receipt.len]);
///
/// conn.close(CloseCode::Normal, "done").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

impl Connection {
    /// Take ownership of `io` and start the connection's executor.
    ///
    /// The connection starts in `Initial`; nothing is written until
    /// [`Connection::open`]. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `config` fails validation.
    pub fn new<T>(io: T, role: Role, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let id = driver::next_connection_id();
        let (status_tx, status_rx) = watch::channel(Status::new(config.timing.clone()));
        let (abort_tx, abort_rx) = watch::channel(false);
        let commands = driver::spawn(io, role, config, id, status_tx, abort_rx);
        Ok(Self {
            inner: Arc::new(Shared {
                commands,
                abort: abort_tx,
                status: status_rx,
                role,
                id,
            }),
        })
    }

    /// Run the upgrade handshake.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` unless the connection is `Initial`
    /// - `Error::InvalidHandshake` / `Error::InvalidHeaderValue` for a bad exchange
    /// - `Error::ProtocolTimeout` if the open timeout expires
    /// - `Error::RequestAborted` if the connection is aborted meanwhile
    pub async fn open(&self, options: OpenOptions) -> Result<()> {
        self.request(|reply| Command::Open { options, reply }).await
    }

    /// Send a whole message, split into frames as needed. Completes once the
    /// last frame has been written to the transport.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless the connection may send and no fragmented
    /// message is in progress; terminal errors once the connection has failed.
    pub async fn send_message(
        &self,
        data: impl Into<Bytes>,
        content_type: ContentType,
    ) -> Result<()> {
        let data = data.into();
        self.request(|reply| Command::SendMessage {
            data,
            content_type,
            reply,
        })
        .await
    }

    /// Send one fragment of a message as exactly one frame.
    ///
    /// # Errors
    ///
    /// `Error::ContentTypeMismatch` if `content_type` differs from the
    /// message's first fragment; the connection then enters `Error`.
    pub async fn send_fragment(
        &self,
        data: impl Into<Bytes>,
        is_final: bool,
        content_type: ContentType,
    ) -> Result<()> {
        let data = data.into();
        self.request(|reply| Command::SendFragment {
            data,
            is_final,
            content_type,
            reply,
        })
        .await
    }

    /// Receive one complete message into the front of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::BufferTooSmall` if the message does not fit; the rest of it is
    ///   discarded and the connection stays usable
    /// - `Error::ConnectionClosed` once the peer has closed and nothing is left
    pub async fn receive_message(&self, buf: &mut [u8]) -> Result<MessageReceipt> {
        let capacity = buf.len();
        let message = self
            .request(|reply| Command::ReceiveMessage { capacity, reply })
            .await?;
        let len = message.payload.len();
        buf[..len].copy_from_slice(&message.payload);
        Ok(MessageReceipt {
            len,
            content_type: message.content_type,
        })
    }

    /// Receive the next frame's worth of data into `buf[offset..offset + length]`.
    ///
    /// A frame larger than `length` is delivered in pieces; only the last piece
    /// of a message reports `is_final`.
    ///
    /// # Errors
    ///
    /// `Error::BufferTooSmall` if `offset + length` exceeds `buf`, or
    /// `length` is zero.
    pub async fn receive_fragment(
        &self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<FragmentReceipt> {
        let needed = offset.saturating_add(length.max(1));
        if length == 0 || needed > buf.len() {
            return Err(Error::BufferTooSmall {
                needed,
                capacity: buf.len(),
            });
        }
        let fragment = self
            .request(|reply| Command::ReceiveFragment { max: length, reply })
            .await?;
        let len = fragment.data.len();
        buf[offset..offset + len].copy_from_slice(&fragment.data);
        Ok(FragmentReceipt {
            len,
            is_final: fragment.fin,
            content_type: fragment.content_type,
        })
    }

    /// Start (or answer) the close handshake and wait for it to finish.
    ///
    /// When the peer has not closed yet this waits for its Close frame,
    /// bounded by the close timeout.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` / `Error::ReasonTooLong` for a bad close frame
    /// - `Error::InvalidState` unless `Open` or `CloseReceivedRemote`
    /// - `Error::ProtocolTimeout` if the peer does not answer in time
    pub async fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.request(|reply| Command::Close {
            code,
            reason,
            reply,
        })
        .await
    }

    /// Abandon the connection without a close handshake.
    ///
    /// Every outstanding and future operation fails with `RequestAborted`.
    /// Has no effect on a connection that already reached a terminal state, or
    /// when called again.
    pub fn abort(&self) {
        if self.inner.status.borrow().state.is_terminal() {
            return;
        }
        self.inner.abort.send_replace(true);
    }

    /// Change one timer before the connection is opened.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` once `open` has been called.
    pub async fn set_timing_constant(
        &self,
        constant: TimingConstant,
        setting: TimerSetting,
    ) -> Result<()> {
        self.request(|reply| Command::SetTiming {
            constant,
            setting,
            reply,
        })
        .await
    }

    /// Current value of one timer.
    #[must_use]
    pub fn timing_constant(&self, constant: TimingConstant) -> TimerSetting {
        self.inner.status.borrow().timing.get(constant)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    /// The negotiated subprotocol, once open.
    #[must_use]
    pub fn subprotocol(&self) -> Option<String> {
        self.inner.status.borrow().subprotocol.clone()
    }

    /// The Close frame we sent.
    #[must_use]
    pub fn local_close(&self) -> Option<CloseInfo> {
        self.inner.status.borrow().local_close.clone()
    }

    /// The Close frame the peer sent.
    #[must_use]
    pub fn remote_close(&self) -> Option<CloseInfo> {
        self.inner.status.borrow().remote_close.clone()
    }

    /// Wait for the peer's Close frame. `None` if the connection ends without one.
    pub async fn close_received(&self) -> Option<CloseInfo> {
        let mut status = self.inner.status.clone();
        let result = status
            .wait_for(|s| s.remote_close.is_some() || s.state.is_terminal())
            .await;
        result.ok().and_then(|s| s.remote_close.clone())
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Process-unique id, also recorded on the connection's tracing span.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(make(tx)).is_err() {
            return Err(self.terminal_error());
        }

        let mut abort = self.inner.abort.subscribe();
        tokio::select! {
            biased;

            () = wait_aborted(&mut abort) => Err(Error::RequestAborted),
            reply = rx => match reply {
                Ok(result) => result,
                Err(_) => Err(self.terminal_error()),
            },
        }
    }

    /// The published terminal outcome wins; the abort flag only covers the
    /// gap before the executor publishes `Aborted`.
    fn fail_fast(&self) -> Option<Error> {
        if let Some(err) = self.inner.status.borrow().terminal_error() {
            return Some(err);
        }
        (*self.inner.abort.borrow()).then_some(Error::RequestAborted)
    }

    fn terminal_error(&self) -> Error {
        self.fail_fast()
            .unwrap_or_else(|| Error::TransportError("connection task stopped".into()))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}
