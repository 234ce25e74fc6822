//! A hand-driven initiator for observing an acceptor's wire output.

use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use wsengine::codec::{FrameEncoder, FrameReader};
use wsengine::protocol::handshake::{HandshakeRequest, HandshakeResponse, read_http_head};
use wsengine::{Connection, Frame, OpenOptions, Role};

const MAX_FRAME: usize = 1 << 20;

pub struct RawClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    encoder: FrameEncoder,
}

impl RawClient {
    /// Upgrade `io` by hand. The acceptor on the other end must be opening
    /// concurrently.
    pub async fn handshake(io: DuplexStream, protocols: &[&str]) -> (Self, HandshakeResponse) {
        let (read_half, mut writer) = tokio::io::split(io);
        let request = HandshakeRequest::new("localhost", "/raw", protocols, &[]).unwrap();
        let mut buf = Vec::new();
        request.write(&mut buf);
        writer.write_all(&buf).await.unwrap();

        let mut reader = FrameReader::new(read_half, Role::Initiator, MAX_FRAME, 4096);
        let head = reader.read_head(8192).await.unwrap();
        let response = HandshakeResponse::parse(&head).unwrap();
        response.verify(&request).unwrap();

        let client = Self {
            reader,
            writer,
            encoder: FrameEncoder::new(Role::Initiator),
        };
        (client, response)
    }

    /// Start `acceptor` opening and handshake against it.
    pub async fn connect(acceptor: &Connection, io: DuplexStream, supported: &[&str]) -> Self {
        let opening = {
            let acceptor = acceptor.clone();
            let options = OpenOptions::default().with_subprotocols(supported.to_vec());
            tokio::spawn(async move { acceptor.open(options).await })
        };
        let (client, _) = Self::handshake(io, &[]).await;
        opening.await.unwrap().unwrap();
        client
    }

    /// Send a frame, masked as an initiator must.
    pub async fn send(&mut self, frame: &Frame) {
        let bytes = self.encoder.encode(frame);
        self.send_raw(&bytes).await;
    }

    /// Send bytes exactly as given.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next frame from the acceptor; `None` once the transport is closed.
    ///
    /// Frames from an acceptor must be unmasked; a masked one fails decoding.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.reader.read_frame().await.ok().flatten()
    }

    pub async fn expect_frame(&mut self) -> Frame {
        self.next_frame().await.expect("transport closed")
    }
}

