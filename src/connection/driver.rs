//! The per-connection executor.
//!
//! One tokio task owns every piece of mutable connection state and handles,
//! strictly one at a time: commands from [`Connection`](super::Connection)
//! handles, frames from the transport, write acknowledgements from the writer
//! task, timer expiry and abort. Writes go through a second task that owns the
//! write half so a slow peer never stalls reads or timers.
//!
//! Ordering inside one `select!` turn is fixed: abort first, then write
//! results, then timers, then inbound bytes, then new commands.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, trace, warn};

use super::close::CloseHandshake;
use super::connection::{CloseCallback, OpenOptions};
use super::fragmenter::{FragmentSequencer, MessageFragmenter};
use super::liveness::{Liveness, TimerKind, sleep_until_opt};
use super::{ConnectionState, Role};
use crate::codec::{FrameEncoder, FrameReader};
use crate::config::{Config, TimerSetting, Timing, TimingConstant};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseInfo, ContentType};
use crate::protocol::assembler::{
    AssembledMessage, InboundFragment, MessageAssembler, MessageCollector,
};
use crate::protocol::handshake::{
    HandshakeRequest, HandshakeResponse, normalize_protocols, write_rejection,
};
use crate::protocol::{Frame, OpCode};

/// How long a graceful shutdown may take to flush before the transport is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// A request from a handle to the executor.
pub(crate) enum Command {
    Open {
        options: OpenOptions,
        reply: Reply<()>,
    },
    SendMessage {
        data: Bytes,
        content_type: ContentType,
        reply: Reply<()>,
    },
    SendFragment {
        data: Bytes,
        is_final: bool,
        content_type: ContentType,
        reply: Reply<()>,
    },
    Close {
        code: CloseCode,
        reason: String,
        reply: Reply<()>,
    },
    ReceiveMessage {
        capacity: usize,
        reply: Reply<AssembledMessage>,
    },
    ReceiveFragment {
        max: usize,
        reply: Reply<InboundFragment>,
    },
    SetTiming {
        constant: TimingConstant,
        setting: TimerSetting,
        reply: Reply<()>,
    },
}

impl Command {
    fn fail(self, err: Error) {
        match self {
            Command::Open { reply, .. }
            | Command::SendMessage { reply, .. }
            | Command::SendFragment { reply, .. }
            | Command::Close { reply, .. }
            | Command::SetTiming { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::ReceiveMessage { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::ReceiveFragment { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Snapshot of the connection published to handles.
#[derive(Debug, Clone)]
pub(crate) struct Status {
    pub state: ConnectionState,
    pub failure: Option<Error>,
    pub subprotocol: Option<String>,
    pub local_close: Option<CloseInfo>,
    pub remote_close: Option<CloseInfo>,
    pub timing: Timing,
}

impl Status {
    pub fn new(timing: Timing) -> Self {
        Self {
            state: ConnectionState::Initial,
            failure: None,
            subprotocol: None,
            local_close: None,
            remote_close: None,
            timing,
        }
    }

    /// The error every operation fails with once the connection is terminal.
    pub fn terminal_error(&self) -> Option<Error> {
        match self.state {
            ConnectionState::Aborted => Some(Error::RequestAborted),
            ConnectionState::Error => Some(
                self.failure
                    .clone()
                    .unwrap_or_else(|| Error::TransportError("connection failed".into())),
            ),
            ConnectionState::Closed => Some(Error::InvalidState(ConnectionState::Closed)),
            _ => None,
        }
    }
}

/// Resolves once the abort flag is raised. Never resolves if every handle is gone.
pub(crate) async fn wait_aborted(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum WriterMsg {
    Bytes(Bytes),
    Shutdown,
}

enum WriteEvent {
    Written,
    Failed(String),
}

/// What a queued write was for; acknowledgements arrive in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Handshake,
    Data,
    Control,
    Close,
}

async fn write_loop<W>(
    mut io: W,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    events: mpsc::UnboundedSender<WriteEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Bytes(bytes) => {
                let result = match io.write_all(&bytes).await {
                    Ok(()) => io.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    let _ = events.send(WriteEvent::Failed(e.to_string()));
                    return;
                }
                let _ = events.send(WriteEvent::Written);
            }
            WriterMsg::Shutdown => {
                if let Err(e) = io.shutdown().await {
                    debug!(error = %e, "transport shutdown failed");
                }
                return;
            }
        }
    }
}

enum Inbound {
    Head(BytesMut),
    Frame(Option<Frame>),
}

async fn next_inbound<R>(reader: &mut FrameReader<R>, head_limit: Option<usize>) -> Result<Inbound>
where
    R: AsyncRead + Unpin,
{
    match head_limit {
        Some(limit) => reader.read_head(limit).await.map(Inbound::Head),
        None => reader.read_frame().await.map(Inbound::Frame),
    }
}

enum PendingHandshake {
    Initiator(HandshakeRequest),
    Acceptor { supported: Vec<String> },
}

enum SendOp {
    Message {
        data: Bytes,
        content_type: ContentType,
        reply: Reply<()>,
    },
    Fragment {
        data: Bytes,
        is_final: bool,
        content_type: ContentType,
        reply: Reply<()>,
    },
    Close {
        info: CloseInfo,
        reply: Reply<()>,
    },
}

impl SendOp {
    fn fail(self, err: Error) {
        let (SendOp::Message { reply, .. }
        | SendOp::Fragment { reply, .. }
        | SendOp::Close { reply, .. }) = self;
        let _ = reply.send(Err(err));
    }
}

enum ActiveSend {
    Message {
        frames: MessageFragmenter,
        reply: Reply<()>,
    },
    Fragment {
        reply: Reply<()>,
    },
}

enum RecvOp {
    Message {
        collector: MessageCollector,
        reply: Reply<AssembledMessage>,
    },
    Fragment {
        max: usize,
        reply: Reply<InboundFragment>,
    },
}

impl RecvOp {
    fn fail(self, err: Error) {
        match self {
            RecvOp::Message { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            RecvOp::Fragment { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Start the executor and writer tasks for `io`.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn<T>(
    io: T,
    role: Role,
    config: Config,
    id: u64,
    status: watch::Sender<Status>,
    abort: watch::Receiver<bool>,
) -> mpsc::UnboundedSender<Command>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::debug_span!("ws_connection", role = %role, id);
    let (read_half, write_half) = tokio::io::split(io);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(
        write_loop(write_half, writer_rx, events_tx).instrument(span.clone()),
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let driver = Driver {
        role,
        reader: FrameReader::new(
            read_half,
            role,
            config.limits.max_frame_size,
            config.read_buffer_size,
        ),
        encoder: FrameEncoder::new(role),
        liveness: Liveness::new(config.timing.clone()),
        assembler: MessageAssembler::new(config.limits.max_message_size),
        config,
        state: ConnectionState::Initial,
        status,
        writer_tx,
        write_events: events_rx,
        writer_task,
        in_flight: VecDeque::new(),
        sequencer: FragmentSequencer::new(),
        close: CloseHandshake::new(),
        handshake: None,
        pending_open: None,
        pending_close: None,
        close_ack_pending: false,
        send_queue: VecDeque::new(),
        active_send: None,
        recv_queue: VecDeque::new(),
        active_recv: None,
        on_close_received: None,
        peer_closed: false,
        dropping_inbound: false,
        graceful: false,
    };
    tokio::spawn(driver.run(command_rx, abort).instrument(span));
    command_tx
}

struct Driver<R> {
    role: Role,
    config: Config,
    state: ConnectionState,
    status: watch::Sender<Status>,

    reader: FrameReader<R>,
    encoder: FrameEncoder,
    writer_tx: mpsc::UnboundedSender<WriterMsg>,
    write_events: mpsc::UnboundedReceiver<WriteEvent>,
    writer_task: JoinHandle<()>,
    in_flight: VecDeque<WriteKind>,

    liveness: Liveness,
    assembler: MessageAssembler,
    sequencer: FragmentSequencer,
    close: CloseHandshake,

    handshake: Option<PendingHandshake>,
    pending_open: Option<Reply<()>>,
    /// Local close waiting for the peer's Close (or for our own to be written).
    pending_close: Option<Reply<()>>,
    /// Our Close answers the peer's; `Closed` once it is written.
    close_ack_pending: bool,

    send_queue: VecDeque<SendOp>,
    active_send: Option<ActiveSend>,
    recv_queue: VecDeque<RecvOp>,
    active_recv: Option<RecvOp>,

    on_close_received: Option<CloseCallback>,
    /// The peer's Close frame has been seen; nothing more will arrive.
    peer_closed: bool,
    /// Over the high-water mark after our Close: data frames are discarded
    /// until the peer's Close arrives.
    dropping_inbound: bool,
    graceful: bool,
}

impl<R> Driver<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut abort: watch::Receiver<bool>,
    ) {
        debug!("connection task started");
        while !self.state.is_terminal() {
            let deadline = self.liveness.next_deadline();
            let head_limit = (self.state == ConnectionState::OpenPending)
                .then_some(self.config.limits.max_handshake_size);
            let reading = self.should_read();

            tokio::select! {
                biased;

                () = wait_aborted(&mut abort) => self.abort(),
                Some(event) = self.write_events.recv() => self.on_write_event(event),
                () = sleep_until_opt(deadline.map(|(at, _)| at)) => {
                    if let Some((_, kind)) = deadline {
                        self.on_timer(kind);
                    }
                }
                inbound = next_inbound(&mut self.reader, head_limit), if reading => {
                    self.on_inbound(inbound);
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("all handles dropped");
                        self.abort();
                    }
                },
            }
        }
        self.finish(&mut commands).await;
    }

    fn should_read(&self) -> bool {
        match self.state {
            ConnectionState::OpenPending => self.handshake.is_some(),
            // Control frames queued behind unread data must still be seen:
            // the peer's Close after ours, and the Pong a Ping is waiting on.
            ConnectionState::CloseSentLocal => !self.peer_closed,
            ConnectionState::Open => {
                !self.peer_closed
                    && (self.below_high_water() || self.liveness.awaiting_pong())
            }
            _ => false,
        }
    }

    fn below_high_water(&self) -> bool {
        self.assembler.buffered() < self.config.inbound_high_water
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "ignoring transition");
            return;
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        if next != ConnectionState::Open {
            self.liveness.left_open();
        }
        self.status.send_modify(|s| s.state = next);
    }

    fn fail(&mut self, err: Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!(error = %err, state = %self.state, "connection failed");
        self.liveness.disarm_all();
        self.status.send_modify(|s| s.failure = Some(err));
        self.transition(ConnectionState::Error);
    }

    fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(state = %self.state, "connection aborted");
        self.liveness.disarm_all();
        self.transition(ConnectionState::Aborted);
    }

    fn write_raw(&mut self, bytes: Bytes, kind: WriteKind) {
        self.in_flight.push_back(kind);
        // A closed writer has already reported its failure.
        let _ = self.writer_tx.send(WriterMsg::Bytes(bytes));
    }

    fn write_frame(&mut self, frame: &Frame, kind: WriteKind) {
        trace!(
            opcode = ?frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "sending frame"
        );
        let bytes = self.encoder.encode(frame);
        self.write_raw(bytes, kind);
        self.liveness.on_frame(Instant::now());
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Open { options, reply } => self.start_open(options, reply),
            Command::SetTiming {
                constant,
                setting,
                reply,
            } => {
                let result = if self.state == ConnectionState::Initial {
                    let mut timing = self.liveness.timing().clone();
                    timing.set(constant, setting);
                    self.liveness.set_timing(timing.clone());
                    self.status.send_modify(|s| s.timing = timing);
                    Ok(())
                } else {
                    Err(Error::InvalidState(self.state))
                };
                let _ = reply.send(result);
            }
            Command::SendMessage {
                data,
                content_type,
                reply,
            } => self.queue_send(SendOp::Message {
                data,
                content_type,
                reply,
            }),
            Command::SendFragment {
                data,
                is_final,
                content_type,
                reply,
            } => self.queue_send(SendOp::Fragment {
                data,
                is_final,
                content_type,
                reply,
            }),
            Command::Close {
                code,
                reason,
                reply,
            } => match CloseInfo::local(code, reason) {
                Ok(info) => self.queue_send(SendOp::Close { info, reply }),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::ReceiveMessage { capacity, reply } => self.queue_recv(RecvOp::Message {
                collector: MessageCollector::new(capacity),
                reply,
            }),
            Command::ReceiveFragment { max, reply } => {
                self.queue_recv(RecvOp::Fragment { max, reply });
            }
        }
    }

    fn start_open(&mut self, options: OpenOptions, reply: Reply<()>) {
        if self.state != ConnectionState::Initial {
            let _ = reply.send(Err(Error::InvalidState(self.state)));
            return;
        }
        let handshake = match self.role {
            Role::Initiator => {
                let request = match HandshakeRequest::new(
                    &options.host,
                    &options.path,
                    options.subprotocols.as_slice(),
                    &options.headers,
                ) {
                    Ok(request) => request,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let mut buf = Vec::new();
                request.write(&mut buf);
                self.write_raw(Bytes::from(buf), WriteKind::Handshake);
                debug!(path = %request.path, protocols = ?request.protocols, "upgrade request sent");
                PendingHandshake::Initiator(request)
            }
            Role::Acceptor => PendingHandshake::Acceptor {
                supported: normalize_protocols(options.subprotocols.as_slice()),
            },
        };
        self.on_close_received = options.on_close_received;
        self.handshake = Some(handshake);
        self.pending_open = Some(reply);
        self.transition(ConnectionState::OpenPending);
        self.liveness.handshake_started(Instant::now());
    }

    fn on_handshake_head(&mut self, head: BytesMut) {
        match self.handshake.take() {
            Some(PendingHandshake::Initiator(request)) => {
                let response = HandshakeResponse::parse(&head).and_then(|response| {
                    response.verify(&request)?;
                    Ok(response)
                });
                match response {
                    Ok(response) => self.opened(response.protocol),
                    Err(e) => self.fail(e),
                }
            }
            Some(PendingHandshake::Acceptor { supported }) => {
                let request = HandshakeRequest::parse(&head).and_then(|request| {
                    request.validate()?;
                    Ok(request)
                });
                let request = match request {
                    Ok(request) => request,
                    Err(e) => {
                        let mut buf = Vec::new();
                        write_rejection(&mut buf);
                        self.write_raw(Bytes::from(buf), WriteKind::Handshake);
                        self.graceful = true;
                        self.fail(e);
                        return;
                    }
                };
                let response = HandshakeResponse::accept(&request, &supported);
                let mut buf = Vec::new();
                match response.write(&mut buf) {
                    Ok(()) => {
                        self.write_raw(Bytes::from(buf), WriteKind::Handshake);
                        self.opened(response.protocol);
                    }
                    Err(e) => self.fail(e),
                }
            }
            None => {}
        }
    }

    fn opened(&mut self, subprotocol: Option<String>) {
        debug!(subprotocol = ?subprotocol, "handshake complete");
        self.status.send_modify(|s| s.subprotocol = subprotocol);
        self.transition(ConnectionState::Open);
        self.liveness.opened(Instant::now());
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn queue_send(&mut self, op: SendOp) {
        let allowed = match &op {
            SendOp::Close { .. } => self.close.check_local(self.state),
            _ => self.check_data_send(),
        };
        match allowed {
            Ok(()) => {
                self.send_queue.push_back(op);
                self.pump_send();
            }
            Err(e) => op.fail(e),
        }
    }

    fn check_data_send(&self) -> Result<()> {
        if self.state.can_send() && self.close.local().is_none() {
            Ok(())
        } else {
            Err(Error::InvalidState(self.state))
        }
    }

    fn pump_send(&mut self) {
        while self.active_send.is_none() && !self.state.is_terminal() {
            let Some(op) = self.send_queue.pop_front() else {
                return;
            };
            match op {
                SendOp::Message {
                    data,
                    content_type,
                    reply,
                } => {
                    if let Err(e) = self.check_data_send() {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    if self.sequencer.is_in_progress() {
                        let _ = reply.send(Err(Error::InvalidState(self.state)));
                        continue;
                    }
                    let mut frames =
                        MessageFragmenter::new(data, content_type, self.config.fragment_size);
                    if let Some(frame) = frames.next() {
                        self.write_frame(&frame, WriteKind::Data);
                    }
                    self.active_send = Some(ActiveSend::Message { frames, reply });
                }
                SendOp::Fragment {
                    data,
                    is_final,
                    content_type,
                    reply,
                } => {
                    if let Err(e) = self.check_data_send() {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    match self.sequencer.next_frame(data, is_final, content_type) {
                        Ok(frame) => {
                            self.write_frame(&frame, WriteKind::Data);
                            self.active_send = Some(ActiveSend::Fragment { reply });
                        }
                        Err(e) => {
                            self.fail(e.clone());
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                SendOp::Close { info, reply } => match self.close.check_local(self.state) {
                    Ok(()) => self.start_local_close(info, reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
            }
        }
    }

    fn start_local_close(&mut self, info: CloseInfo, reply: Reply<()>) {
        debug!(code = ?info.code, reason = %info.reason, "sending close frame");
        self.write_frame(&Frame::close(&info), WriteKind::Close);
        self.status.send_modify(|s| s.local_close = Some(info.clone()));
        self.liveness.close_sent(Instant::now());
        self.pending_close = Some(reply);

        let next = self.close.local_sent(info, self.state);
        if next == ConnectionState::Closed {
            self.close_ack_pending = true;
        } else {
            self.transition(next);
        }
    }

    fn on_write_event(&mut self, event: WriteEvent) {
        match event {
            WriteEvent::Failed(reason) => self.fail(Error::TransportError(reason)),
            WriteEvent::Written => match self.in_flight.pop_front() {
                Some(WriteKind::Data) => self.data_written(),
                Some(WriteKind::Close) if self.close_ack_pending => {
                    self.close_ack_pending = false;
                    self.enter_closed();
                }
                _ => {}
            },
        }
    }

    fn data_written(&mut self) {
        match self.active_send.take() {
            Some(ActiveSend::Message { mut frames, reply }) => match frames.next() {
                Some(frame) => {
                    self.write_frame(&frame, WriteKind::Data);
                    self.active_send = Some(ActiveSend::Message { frames, reply });
                }
                None => {
                    let _ = reply.send(Ok(()));
                }
            },
            Some(ActiveSend::Fragment { reply }) => {
                let _ = reply.send(Ok(()));
            }
            None => {}
        }
        self.pump_send();
    }

    fn enter_closed(&mut self) {
        self.liveness.disarm_all();
        self.graceful = true;
        self.transition(ConnectionState::Closed);
        info!(
            local = ?self.close.local().and_then(|c| c.code),
            remote = ?self.close.remote_code(),
            "close handshake complete"
        );
        if let Some(reply) = self.pending_close.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn queue_recv(&mut self, op: RecvOp) {
        match self.state {
            ConnectionState::Open
            | ConnectionState::CloseSentLocal
            | ConnectionState::CloseReceivedRemote => {
                self.recv_queue.push_back(op);
                self.pump_recv();
            }
            state => op.fail(Error::InvalidState(state)),
        }
    }

    fn pump_recv(&mut self) {
        loop {
            let Some(op) = self.active_recv.take().or_else(|| self.recv_queue.pop_front()) else {
                return;
            };
            if let Some(waiting) = self.try_complete_recv(op) {
                self.active_recv = Some(waiting);
                return;
            }
        }
    }

    /// Complete `op` if possible; otherwise hand it back.
    fn try_complete_recv(&mut self, op: RecvOp) -> Option<RecvOp> {
        let closed = Error::ConnectionClosed(self.close.remote_code());
        match op {
            RecvOp::Fragment { max, reply } => {
                if let Some(fragment) = self.assembler.next_fragment(max) {
                    let _ = reply.send(Ok(fragment));
                    None
                } else if self.peer_closed {
                    let _ = reply.send(Err(closed));
                    None
                } else {
                    Some(RecvOp::Fragment { max, reply })
                }
            }
            RecvOp::Message {
                mut collector,
                reply,
            } => match collector.poll(&mut self.assembler) {
                Some(result) => {
                    let _ = reply.send(result);
                    None
                }
                None if self.peer_closed => {
                    let _ = reply.send(Err(closed));
                    None
                }
                None => Some(RecvOp::Message { collector, reply }),
            },
        }
    }

    fn on_inbound(&mut self, inbound: Result<Inbound>) {
        match inbound {
            Ok(Inbound::Head(head)) => self.on_handshake_head(head),
            Ok(Inbound::Frame(Some(frame))) => self.on_frame(frame),
            Ok(Inbound::Frame(None)) => self.fail(Error::TransportError(
                "peer closed the transport without a Close frame".into(),
            )),
            Err(e) if self.state == ConnectionState::OpenPending => self.fail(e),
            Err(e) => self.fail(e.into_violation()),
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        trace!(
            opcode = ?frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "received frame"
        );
        self.liveness.on_frame(Instant::now());
        match frame.opcode {
            OpCode::Ping => {
                if self.state == ConnectionState::Open {
                    self.write_frame(&Frame::pong(frame.into_payload()), WriteKind::Control);
                }
            }
            OpCode::Pong => self.liveness.pong_received(),
            OpCode::Close => self.on_remote_close(frame.payload()),
            _ if self.discard_after_local_close() => {
                trace!(len = frame.payload().len(), "dropping data frame after local close");
            }
            _ => match self.assembler.push(frame) {
                Ok(()) => self.pump_recv(),
                Err(e) => self.fail(e.into_violation()),
            },
        }
    }

    /// Once dropping starts it continues, so no message is delivered with a
    /// hole in it.
    fn discard_after_local_close(&mut self) -> bool {
        if self.state == ConnectionState::CloseSentLocal && !self.below_high_water() {
            self.dropping_inbound = true;
        }
        self.dropping_inbound
    }

    fn on_remote_close(&mut self, payload: &[u8]) {
        let info = match CloseInfo::parse_remote(payload) {
            Ok(info) => info,
            Err(e) => return self.fail(e),
        };
        info!(code = ?info.code, reason = %info.reason, "close frame received");
        self.liveness.pong_received();
        self.peer_closed = true;
        self.status
            .send_modify(|s| s.remote_close = Some(info.clone()));

        let next = self.close.remote_received(info.clone(), self.state);
        if next == ConnectionState::Closed {
            self.enter_closed();
        } else {
            self.transition(next);
            if let Some(callback) = self.on_close_received.as_mut() {
                callback(&info);
            }
        }
        self.pump_recv();
    }

    fn on_timer(&mut self, kind: TimerKind) {
        let now = Instant::now();
        self.liveness.expire(kind, now);
        match kind {
            TimerKind::Open | TimerKind::Close | TimerKind::Pong => {
                warn!(timer = ?kind, "timer expired");
                self.fail(Error::ProtocolTimeout);
            }
            TimerKind::Ping => {
                if self.state == ConnectionState::Open && !self.liveness.awaiting_pong() {
                    let payload = self.liveness.next_ping_payload();
                    debug!("quiet channel, sending ping");
                    self.write_frame(&Frame::ping(payload), WriteKind::Control);
                    self.liveness.ping_sent(now);
                }
            }
            TimerKind::KeepAlive => {
                if self.state == ConnectionState::Open {
                    self.write_frame(&Frame::pong(Bytes::new()), WriteKind::Control);
                }
            }
        }
    }

    /// Fail whatever is still outstanding and release the transport.
    async fn finish(mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        if self.state == ConnectionState::Closed {
            self.pump_recv();
        }
        let err = self
            .status
            .borrow()
            .terminal_error()
            .unwrap_or(Error::InvalidState(self.state));

        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Err(err.clone()));
        }
        if let Some(reply) = self.pending_close.take() {
            let _ = reply.send(Err(err.clone()));
        }
        match self.active_send.take() {
            Some(ActiveSend::Message { reply, .. } | ActiveSend::Fragment { reply }) => {
                let _ = reply.send(Err(err.clone()));
            }
            None => {}
        }
        for op in self.send_queue.drain(..) {
            op.fail(err.clone());
        }
        for op in self.active_recv.take().into_iter().chain(self.recv_queue.drain(..)) {
            op.fail(err.clone());
        }
        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.fail(err.clone());
        }

        if self.graceful {
            let _ = self.writer_tx.send(WriterMsg::Shutdown);
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.writer_task)
                .await
                .is_err()
            {
                debug!("transport shutdown timed out");
            }
        }
        self.writer_task.abort();
        debug!(state = %self.state, "connection task finished");
    }
}
