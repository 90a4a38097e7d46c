//! # Session
//!
//! One client connection: its phase, its stream pipeline and packet-level I/O.
//!
//! A session is owned by exactly one task and is never shared. Reads pull
//! bytes from the inbound stack into an accumulation buffer and cut frames
//! off it with [`FrameCodec`]; writes encode a frame and push it into the
//! outbound stack, where it waits in a [`BufferedStream`] until flushed.
//!
//! ```text
//! inbound:   SocketStream -> [CipherStream decrypt] -> accumulation buffer -> FrameCodec
//! outbound:  FrameCodec -> [CipherStream encrypt] -> BufferedStream -> SocketStream
//! ```
//!
//! Compression and encryption are switched on once and stay on. Each takes
//! effect from the next frame in each direction: bytes already queued for
//! sending stay plaintext, bytes already received but not yet framed are
//! decrypted in place.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::core::codec::{Frame, FrameCodec};
use crate::core::phase::Phase;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{ClientboundPacket, PayloadCodec, ServerboundPacket};
use crate::transport::{
    BufferedStream, ByteStream, CipherStream, MemoryStream, Readiness, SocketStream, StreamHandle,
};
use crate::utils::metrics::global_metrics;

const READ_CHUNK: usize = 4096;

/// How long a closing session waits for its last bytes to drain
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Session {
    phase: Phase,
    codec: FrameCodec,
    compression_level: u32,
    payload: Arc<dyn PayloadCodec>,

    raw_in: StreamHandle,
    reader: StreamHandle,
    decryptor: Option<Arc<CipherStream>>,
    inbound: BytesMut,

    buffered: Arc<BufferedStream>,
    writer: StreamHandle,
    outbound: BytesMut,

    readiness: Readiness,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl Session {
    /// Session over separate inbound and outbound raw streams
    pub fn new(
        raw_in: StreamHandle,
        raw_out: StreamHandle,
        readiness: Readiness,
        config: &SessionConfig,
        payload: Arc<dyn PayloadCodec>,
    ) -> Self {
        let buffered = Arc::new(BufferedStream::with_sizes(
            raw_out,
            config.buffer_step,
            config.frame_size,
        ));
        Self {
            phase: Phase::Handshake,
            codec: FrameCodec::new(config.max_packet_size),
            compression_level: config.compression_level,
            payload,
            reader: raw_in.clone(),
            raw_in,
            decryptor: None,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            writer: buffered.clone(),
            buffered,
            outbound: BytesMut::new(),
            readiness,
            peer: None,
            closed: false,
        }
    }

    /// Session over an accepted TCP socket
    pub fn from_socket(
        socket: TcpStream,
        config: &SessionConfig,
        payload: Arc<dyn PayloadCodec>,
    ) -> Result<Self> {
        socket.set_nodelay(true)?;
        let stream = Arc::new(SocketStream::new(socket));
        let peer = stream.peer_addr().ok();
        let mut session = Self::new(
            stream.clone(),
            stream.clone(),
            stream.readiness(),
            config,
            payload,
        );
        session.peer = peer;
        Ok(session)
    }

    /// Session reading from `inbound` and writing to `outbound`
    pub fn in_memory(
        inbound: Arc<MemoryStream>,
        outbound: Arc<MemoryStream>,
        config: &SessionConfig,
        payload: Arc<dyn PayloadCodec>,
    ) -> Self {
        let readiness = inbound.readiness();
        Self::new(inbound, outbound, readiness, config, payload)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Phases only move forward.
    pub fn set_phase(&mut self, next: Phase) -> Result<()> {
        self.phase = self.phase.advance(next)?;
        debug!(peer = ?self.peer, phase = ?self.phase, "Phase changed");
        Ok(())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop all further writes. The underlying stream is released when the
    /// session is dropped.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(peer = ?self.peer, phase = ?self.phase, "Session closed");
        }
        self.closed = true;
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        self.codec.compression().map(|c| c.threshold)
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Compress frames of at least `threshold` bytes from now on
    pub fn enable_compression(&mut self, threshold: usize) -> Result<()> {
        self.codec
            .enable_compression(threshold, self.compression_level)?;
        debug!(peer = ?self.peer, threshold, "Compression enabled");
        Ok(())
    }

    /// Encrypt and decrypt everything from now on with `secret` as key and IV
    ///
    /// # Errors
    /// `InvalidState` if encryption is already on, `EncryptionFailure` if
    /// the secret has the wrong length
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        if self.decryptor.is_some() {
            return Err(ProtocolError::InvalidState(constants::ERR_ENCRYPTION_ACTIVE));
        }
        let decryptor = Arc::new(CipherStream::decrypting(self.raw_in.clone(), secret)?);
        let encryptor: StreamHandle =
            Arc::new(CipherStream::encrypting(self.buffered.clone(), secret)?);

        if !self.inbound.is_empty() {
            decryptor.decrypt_in_place(&mut self.inbound[..])?;
        }
        self.reader = decryptor.clone();
        self.decryptor = Some(decryptor);
        self.writer = encryptor;
        debug!(peer = ?self.peer, "Encryption enabled");
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ProtocolError::ConnectionClosed) = result {
            self.closed = true;
        }
        result
    }

    /// Pull available bytes into the accumulation buffer. Returns false if
    /// nothing was available.
    fn fill(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.reader.read(&mut chunk) {
            Ok(n) => {
                self.inbound.extend_from_slice(&chunk[..n]);
                trace!(read = n, buffered = self.inbound.len(), "Filled inbound buffer");
                Ok(n > 0)
            }
            Err(ProtocolError::WouldBlock) => Ok(false),
            Err(ProtocolError::ConnectionClosed) => {
                if !self.inbound.is_empty() {
                    debug!(
                        peer = ?self.peer,
                        buffered = self.inbound.len(),
                        "{}",
                        constants::ERR_CLOSED_MID_FRAME
                    );
                }
                self.closed = true;
                Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Next complete frame, without waiting
    pub fn try_read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.inbound)? {
                global_metrics().packet_received(frame.body_len() as u64);
                return Ok(Some(frame));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    /// Next complete packet decoded for the current phase, without waiting
    pub fn try_read_packet(&mut self) -> Result<Option<ServerboundPacket>> {
        match self.try_read_frame()? {
            Some(frame) => {
                trace!(id = frame.id, phase = ?self.phase, "Decoding packet");
                self.payload.decode(self.phase, frame).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Wait for the next packet
    pub async fn read_packet(&mut self) -> Result<ServerboundPacket> {
        loop {
            if let Some(packet) = self.try_read_packet()? {
                return Ok(packet);
            }
            self.readiness.readable().await?;
        }
    }

    /// Encode `packet` for the current phase and queue it for sending
    pub fn queue_packet(&mut self, packet: &ClientboundPacket) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        let frame = self.payload.encode(self.phase, packet)?;
        self.queue_frame(&frame)
    }

    /// Frame `frame` and queue it for sending
    pub fn queue_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound.clear();
        self.codec.encode(frame, &mut self.outbound)?;

        let written = self.writer.write(&self.outbound);
        match self.track(written)? {
            n if n == self.outbound.len() => {
                global_metrics().packet_sent(n as u64);
                trace!(id = frame.id, bytes = n, "Queued frame");
                Ok(())
            }
            n => {
                warn!(accepted = n, offered = self.outbound.len(), "Outbound stack dropped bytes");
                Err(ProtocolError::InvalidState(constants::ERR_SESSION_CLOSED))
            }
        }
    }

    /// Push queued bytes without waiting; returns how many are still queued
    pub fn try_flush(&mut self) -> Result<usize> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        match self.writer.flush() {
            Err(ProtocolError::WouldBlock) => self.buffered.pending(),
            other => self.track(other),
        }
    }

    /// Wait until every queued byte has been handed to the raw stream
    pub async fn flush(&mut self) -> Result<()> {
        loop {
            if self.try_flush()? == 0 {
                return Ok(());
            }
            self.readiness.writable().await?;
        }
    }

    /// Like [`flush`](Self::flush), but gives up after `limit`. A peer that
    /// stops reading yields `WouldBlock` with the unsent bytes still queued.
    pub async fn flush_within(&mut self, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.flush()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::WouldBlock),
        }
    }

    /// Queue `packet` and flush
    pub async fn write_packet(&mut self, packet: &ClientboundPacket) -> Result<()> {
        self.queue_packet(packet)?;
        self.flush().await
    }

    /// Bytes queued but not yet flushed
    pub fn pending_output(&self) -> Result<usize> {
        self.buffered.pending()
    }

    /// Bytes received but not yet framed
    pub fn buffered_input(&self) -> usize {
        self.inbound.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("phase", &self.phase)
            .field("compression", &self.codec.compression())
            .field("encrypted", &self.is_encrypted())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::message::StandardCodec;
    use bytes::Bytes;

    struct Pair {
        client_out: Arc<MemoryStream>,
        client_in: Arc<MemoryStream>,
        session: Session,
    }

    fn pair() -> Pair {
        let client_out = Arc::new(MemoryStream::new());
        let client_in = Arc::new(MemoryStream::new());
        let session = Session::in_memory(
            client_out.clone(),
            client_in.clone(),
            &SessionConfig::default(),
            Arc::new(StandardCodec),
        );
        Pair {
            client_out,
            client_in,
            session,
        }
    }

    fn client_send(pair: &Pair, codec: &mut FrameCodec, frame: Frame) {
        let mut buf = BytesMut::new();
        codec.encode(&frame, &mut buf).unwrap();
        pair.client_out.write(&buf).unwrap();
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut p = pair();
        let mut client = FrameCodec::default();
        let frame = Frame::new(0x2A, Bytes::from_static(b"payload bytes"));
        client_send(&p, &mut client, frame.clone());

        assert_eq!(p.session.try_read_frame().unwrap(), Some(frame.clone()));
        assert_eq!(p.session.try_read_frame().unwrap(), None);

        p.session.queue_frame(&frame).unwrap();
        assert!(p.client_in.is_empty().unwrap());
        assert_eq!(p.session.try_flush().unwrap(), 0);

        let mut received = BytesMut::from(&p.client_in.take_all().unwrap()[..]);
        assert_eq!(client.decode(&mut received).unwrap(), Some(frame));
    }

    #[test]
    fn test_split_delivery() {
        let mut p = pair();
        let mut buf = BytesMut::new();
        FrameCodec::default()
            .encode(&Frame::new(1, vec![9u8; 10]), &mut buf)
            .unwrap();

        p.client_out.write(&buf[..4]).unwrap();
        assert_eq!(p.session.try_read_frame().unwrap(), None);
        p.client_out.write(&buf[4..]).unwrap();
        assert_eq!(p.session.try_read_frame().unwrap().unwrap().id, 1);
    }

    #[test]
    fn test_close_mid_frame() {
        let mut p = pair();
        p.client_out.write(&[0x05, 0x00]).unwrap();
        p.client_out.close().unwrap();
        let err = p.session.try_read_frame().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(p.session.is_closed());
        assert!(p.session.queue_frame(&Frame::new(0, Bytes::new())).is_err());
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let mut p = pair();
        p.session.set_phase(Phase::Login).unwrap();
        assert!(p.session.set_phase(Phase::Status).is_err());
        p.session.set_phase(Phase::Play).unwrap();
        assert!(p.session.set_phase(Phase::Login).is_err());
    }

    #[test]
    fn test_compression_applies_to_next_frame() {
        let mut p = pair();
        let mut client = FrameCodec::default();
        let big = Frame::new(3, vec![1u8; 600]);

        p.session.queue_frame(&big).unwrap();
        p.session.enable_compression(256).unwrap();
        p.session.queue_frame(&big).unwrap();
        p.session.try_flush().unwrap();
        assert!(p.session.enable_compression(64).is_err());

        let mut wire = BytesMut::from(&p.client_in.take_all().unwrap()[..]);
        assert_eq!(client.decode(&mut wire).unwrap(), Some(big.clone()));
        client.enable_compression(256, 6).unwrap();
        assert_eq!(client.decode(&mut wire).unwrap(), Some(big));
        assert!(wire.is_empty());
    }

    #[test]
    fn test_encryption_both_directions() {
        use crate::utils::crypto::CipherState;
        let secret = [0x42u8; 16];
        let mut p = pair();
        let mut client = FrameCodec::default();

        // Plain frame followed by an encrypted one, both already buffered
        let mut plain = BytesMut::new();
        client.encode(&Frame::new(1, vec![1u8]), &mut plain).unwrap();
        let mut secret_part = BytesMut::new();
        client.encode(&Frame::new(2, vec![2u8]), &mut secret_part).unwrap();
        let mut client_enc = CipherState::encryptor(&secret).unwrap();
        client_enc.apply(&mut secret_part);
        p.client_out.write(&plain).unwrap();
        p.client_out.write(&secret_part).unwrap();

        assert_eq!(p.session.try_read_frame().unwrap().unwrap().id, 1);
        p.session.enable_encryption(&secret).unwrap();
        assert_eq!(p.session.try_read_frame().unwrap().unwrap().id, 2);
        assert!(p.session.enable_encryption(&secret).is_err());

        p.session.queue_frame(&Frame::new(7, vec![7u8; 3])).unwrap();
        p.session.try_flush().unwrap();
        let mut wire = p.client_in.take_all().unwrap();
        let mut client_dec = CipherState::decryptor(&secret).unwrap();
        client_dec.apply(&mut wire);
        let mut wire = BytesMut::from(&wire[..]);
        assert_eq!(client.decode(&mut wire).unwrap().unwrap().id, 7);
    }

    #[tokio::test]
    async fn test_read_packet_waits_for_data() {
        let mut p = pair();
        let writer = p.client_out.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let mut buf = BytesMut::new();
            FrameCodec::default()
                .encode(&Frame::new(0x00, Bytes::new()), &mut buf)
                .unwrap();
            writer.write(&buf).unwrap();
        });
        p.session.set_phase(Phase::Status).unwrap();
        assert_eq!(
            p.session.read_packet().await.unwrap(),
            ServerboundPacket::StatusRequest
        );
    }

    #[tokio::test]
    async fn test_flush_within_gives_up_on_stalled_peer() {
        let client_out = Arc::new(MemoryStream::new());
        let client_in = Arc::new(MemoryStream::with_write_budget(0));
        let mut session = Session::in_memory(
            client_out,
            client_in.clone(),
            &SessionConfig::default(),
            Arc::new(StandardCodec),
        );
        session.set_phase(Phase::Status).unwrap();
        session
            .queue_packet(&ClientboundPacket::Pong { payload: 9 })
            .unwrap();

        let stalled = session.flush_within(Duration::from_millis(50)).await;
        assert!(matches!(stalled, Err(ProtocolError::WouldBlock)));
        assert!(session.pending_output().unwrap() > 0);

        client_in.set_write_budget(None).unwrap();
        session.flush_within(Duration::from_millis(50)).await.unwrap();
        assert_eq!(session.pending_output().unwrap(), 0);
        assert!(!client_in.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_write_packet_respects_phase() {
        let mut p = pair();
        let pong = ClientboundPacket::Pong { payload: 5 };
        assert!(p.session.write_packet(&pong).await.is_err());
        p.session.set_phase(Phase::Status).unwrap();
        p.session.write_packet(&pong).await.unwrap();
        assert!(!p.client_in.is_empty().unwrap());
    }
}
