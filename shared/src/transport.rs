//! Reliable delivery on top of Hazel datagrams.
//!
//! [`Connection`] is a pure state machine: it never touches a socket or a
//! clock. Callers feed it received bytes and the current [`Instant`], then
//! drain the datagrams it wants sent. Retransmission is driven by
//! [`Connection::poll`], so tests control time exactly.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::enums::DisconnectReason;
use crate::error::CodecError;
use crate::packet::{DecodeOptions, DisconnectBody, Direction, HelloBody, Packet};
use crate::payload::RootMessage;

/// Number of earlier nonces described by an acknowledgement bitfield.
pub const ACK_WINDOW: usize = 8;

/// Received nonces remembered for duplicate suppression.
const RECEIVED_HISTORY: usize = 64;

/// Returns true when `a` is newer than `b` on a wrapping 16-bit counter.
pub fn sequence_greater(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentPacketRecord {
    pub nonce: u16,
    pub acknowledged: bool,
}

/// Packs acknowledgement state into a bitfield. `records[0]` is the most
/// recent packet and maps to bit 0; only the first eight records count.
pub fn create_missing_bitfield(records: &[SentPacketRecord]) -> u8 {
    records
        .iter()
        .take(ACK_WINDOW)
        .enumerate()
        .filter(|(_, record)| record.acknowledged)
        .fold(0, |bits, (i, _)| bits | (1 << i))
}

/// Reads a bitfield in the inverted convention: bit `i` flags
/// `nonces[len - 1 - i]`, so bit 0 is the oldest nonce of a
/// newest-first list.
pub fn get_missing(bitfield: u8, nonces: &[u16]) -> Vec<u16> {
    let len = nonces.len();
    (0..len.min(ACK_WINDOW))
        .filter(|i| bitfield & (1 << i) != 0)
        .map(|i| nonces[len - 1 - i])
        .collect()
}

/// How the Acknowledge bitfield is laid out on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckConvention {
    /// Bit `i` set means nonce `N - 1 - i` was received.
    #[default]
    Hazel,
    /// Bit `i` set means nonce `N - 8 + i` is missing.
    Inverted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub resend_interval_ms: u64,
    /// Resends allowed before the connection times out.
    pub max_attempts: u32,
    pub ack_convention: AckConvention,
    /// Send a Ping this often once connected. `None` disables keep-alive.
    pub keepalive_ms: Option<u64>,
    pub decode: DecodeOptions,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resend_interval_ms: 1500,
            max_attempts: 8,
            ack_convention: AckConvention::Hazel,
            keepalive_ms: None,
            decode: DecodeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Identified,
    Connected,
    Disconnected,
}

/// Why a connection reached [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The peer sent a Disconnect packet.
    Remote(Option<DisconnectReason>),
    Local(DisconnectReason),
    Timeout { nonce: u16, attempts: u32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("nonce {nonce} unacknowledged after {attempts} resends")]
    ConnectionTimeout { nonce: u16, attempts: u32 },

    #[error("disconnected: {0}")]
    Disconnected(DisconnectReason),

    #[error("connection is not open")]
    NotConnected,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    /// The connection closed first.
    Aborted,
}

/// Resolves once the peer acknowledges one reliable packet.
#[derive(Debug)]
pub struct AckWaiter {
    nonce: u16,
    rx: oneshot::Receiver<AckOutcome>,
}

impl AckWaiter {
    pub fn nonce(&self) -> u16 {
        self.nonce
    }

    pub async fn wait(self) -> AckOutcome {
        self.rx.await.unwrap_or(AckOutcome::Aborted)
    }

    /// Non-blocking check; `None` while still pending.
    pub fn try_outcome(&mut self) -> Option<AckOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(AckOutcome::Aborted),
        }
    }
}

/// What a received datagram means to the layer above.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Hello(HelloBody),
    Payloads(Vec<RootMessage>),
    Disconnected(Option<DisconnectReason>),
}

#[derive(Debug)]
struct PendingPacket {
    nonce: u16,
    bytes: Vec<u8>,
    resends: u32,
    last_sent: Instant,
    waiters: Vec<oneshot::Sender<AckOutcome>>,
}

impl PendingPacket {
    fn resolve(self, outcome: AckOutcome) {
        for waiter in self.waiters {
            let _ = waiter.send(outcome);
        }
    }
}

/// One peer's reliable-delivery state.
#[derive(Debug)]
pub struct Connection {
    config: TransportConfig,
    inbound: Direction,
    state: ConnectionState,
    cause: Option<DisconnectCause>,
    next_nonce: u16,
    hello_nonce: Option<u16>,
    hello: Option<HelloBody>,
    sent: VecDeque<SentPacketRecord>,
    pending: VecDeque<PendingPacket>,
    received: VecDeque<u16>,
    outgoing: VecDeque<Vec<u8>>,
    last_heard: Instant,
    last_ping: Instant,
}

impl Connection {
    /// `inbound` is the direction of datagrams this side receives.
    pub fn new(inbound: Direction, config: TransportConfig, now: Instant) -> Self {
        Self {
            config,
            inbound,
            state: ConnectionState::Connecting,
            cause: None,
            next_nonce: 1,
            hello_nonce: None,
            hello: None,
            sent: VecDeque::with_capacity(ACK_WINDOW),
            pending: VecDeque::new(),
            received: VecDeque::with_capacity(RECEIVED_HISTORY),
            outgoing: VecDeque::new(),
            last_heard: now,
            last_ping: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn cause(&self) -> Option<&DisconnectCause> {
        self.cause.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Hello received from the peer, once identified.
    pub fn hello(&self) -> Option<&HelloBody> {
        self.hello.as_ref()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// The last eight reliable packets sent, newest first.
    pub fn sent_records(&self) -> impl Iterator<Item = &SentPacketRecord> {
        self.sent.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let interval = Duration::from_millis(self.config.resend_interval_ms);
        let resend = self.pending.iter().map(|p| p.last_sent + interval).min();
        let ping = match (self.state, self.config.keepalive_ms) {
            (ConnectionState::Connected, Some(ms)) => Some(self.last_ping + Duration::from_millis(ms)),
            _ => None,
        };
        resend.into_iter().chain(ping).min()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match (&self.state, &self.cause) {
            (ConnectionState::Disconnected, Some(DisconnectCause::Timeout { nonce, attempts })) => {
                Err(TransportError::ConnectionTimeout {
                    nonce: *nonce,
                    attempts: *attempts,
                })
            }
            (
                ConnectionState::Disconnected,
                Some(DisconnectCause::Remote(Some(reason)) | DisconnectCause::Local(reason)),
            ) => Err(TransportError::Disconnected(*reason)),
            (ConnectionState::Disconnected, _) => Err(TransportError::NotConnected),
            _ => Ok(()),
        }
    }

    fn take_nonce(&mut self) -> u16 {
        let nonce = self.next_nonce;
        self.next_nonce = nonce.wrapping_add(1);
        nonce
    }

    fn send_tracked(
        &mut self,
        build: impl FnOnce(u16) -> Packet,
        now: Instant,
    ) -> Result<u16, TransportError> {
        self.ensure_open()?;
        let nonce = self.take_nonce();
        let bytes = build(nonce).compose()?;
        self.outgoing.push_back(bytes.clone());
        self.pending.push_back(PendingPacket {
            nonce,
            bytes,
            resends: 0,
            last_sent: now,
            waiters: Vec::new(),
        });
        self.sent.push_front(SentPacketRecord {
            nonce,
            acknowledged: false,
        });
        self.sent.truncate(ACK_WINDOW);
        Ok(nonce)
    }

    pub fn send_hello(&mut self, body: HelloBody, now: Instant) -> Result<u16, TransportError> {
        if self.state != ConnectionState::Connecting {
            return Err(TransportError::NotConnected);
        }
        let nonce = self.send_tracked(|nonce| Packet::Hello { nonce, body }, now)?;
        self.hello_nonce = Some(nonce);
        self.state = ConnectionState::Identified;
        Ok(nonce)
    }

    pub fn send_reliable(
        &mut self,
        payloads: Vec<RootMessage>,
        now: Instant,
    ) -> Result<u16, TransportError> {
        if self.state == ConnectionState::Connecting {
            return Err(TransportError::NotConnected);
        }
        self.send_tracked(|nonce| Packet::Reliable { nonce, payloads }, now)
    }

    /// Like [`send_reliable`](Self::send_reliable) but also returns a waiter
    /// for the acknowledgement.
    pub fn send_reliable_tracked(
        &mut self,
        payloads: Vec<RootMessage>,
        now: Instant,
    ) -> Result<AckWaiter, TransportError> {
        let nonce = self.send_reliable(payloads, now)?;
        let (tx, rx) = oneshot::channel();
        if let Some(pending) = self.pending.back_mut() {
            pending.waiters.push(tx);
        }
        Ok(AckWaiter { nonce, rx })
    }

    pub fn send_unreliable(&mut self, payloads: Vec<RootMessage>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let bytes = Packet::Unreliable { payloads }.compose()?;
        self.outgoing.push_back(bytes);
        Ok(())
    }

    pub fn send_ping(&mut self, now: Instant) -> Result<u16, TransportError> {
        self.last_ping = now;
        self.send_tracked(|nonce| Packet::Ping { nonce }, now)
    }

    /// Moves an identified peer to connected once the application accepts
    /// its Hello.
    pub fn accept(&mut self) {
        if self.state == ConnectionState::Identified {
            self.state = ConnectionState::Connected;
        }
    }

    /// Sends a Disconnect and closes the connection.
    pub fn disconnect(&mut self, reason: DisconnectReason) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        let body = (reason != DisconnectReason::ExitGame).then(|| DisconnectBody::with_reason(reason));
        let bytes = Packet::Disconnect(body).compose()?;
        self.outgoing.push_back(bytes);
        self.close(DisconnectCause::Local(reason));
        Ok(())
    }

    fn close(&mut self, cause: DisconnectCause) {
        info!("connection closed: {:?}", cause);
        self.state = ConnectionState::Disconnected;
        self.cause = Some(cause);
        for pending in self.pending.drain(..) {
            pending.resolve(AckOutcome::Aborted);
        }
    }

    /// Handles one datagram from the peer.
    ///
    /// Malformed bytes fail with [`TransportError::Codec`] and leave the
    /// connection untouched.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> Result<Option<Inbound>, TransportError> {
        self.ensure_open()?;
        let packet = Packet::parse(bytes, self.inbound, &self.config.decode)?;
        self.last_heard = now;

        if let Some(nonce) = packet.reliable_nonce() {
            let duplicate = self.received.contains(&nonce);
            if !duplicate {
                self.received.push_front(nonce);
                self.received.truncate(RECEIVED_HISTORY);
            }
            self.acknowledge(nonce)?;
            if duplicate {
                debug!("duplicate nonce {}, re-acknowledged", nonce);
                return Ok(None);
            }
        }

        match packet {
            Packet::Hello { body, .. } => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Identified;
                }
                self.hello = Some(body.clone());
                Ok(Some(Inbound::Hello(body)))
            }
            Packet::Reliable { payloads, .. } | Packet::Unreliable { payloads } => {
                if self.state == ConnectionState::Connecting {
                    warn!("dropping {} payloads received before hello", payloads.len());
                    return Ok(None);
                }
                Ok(Some(Inbound::Payloads(payloads)))
            }
            Packet::Acknowledge { nonce, bitfield } => {
                self.handle_ack(nonce, bitfield, now);
                Ok(None)
            }
            Packet::Ping { .. } => Ok(None),
            Packet::Disconnect(body) => {
                let reason = body.and_then(|b| b.reason);
                self.close(DisconnectCause::Remote(reason));
                Ok(Some(Inbound::Disconnected(reason)))
            }
        }
    }

    fn window(nonce: u16) -> Vec<u16> {
        (1..=ACK_WINDOW as u16)
            .map(|back| nonce.wrapping_sub(back))
            .collect()
    }

    fn acknowledge(&mut self, nonce: u16) -> Result<(), TransportError> {
        let window: Vec<SentPacketRecord> = Self::window(nonce)
            .into_iter()
            .map(|n| SentPacketRecord {
                nonce: n,
                acknowledged: self.received.contains(&n),
            })
            .collect();
        let bitfield = match self.config.ack_convention {
            AckConvention::Hazel => create_missing_bitfield(&window),
            AckConvention::Inverted => window
                .iter()
                .rev()
                .enumerate()
                .filter(|(_, record)| !record.acknowledged)
                .fold(0u8, |bits, (i, _)| bits | (1 << i)),
        };
        let bytes = Packet::Acknowledge { nonce, bitfield }.compose()?;
        self.outgoing.push_back(bytes);
        Ok(())
    }

    fn handle_ack(&mut self, nonce: u16, bitfield: u8, now: Instant) {
        self.mark_acknowledged(nonce);

        let window = Self::window(nonce);
        let missing = match self.config.ack_convention {
            AckConvention::Hazel => window
                .iter()
                .enumerate()
                .filter(|(i, _)| bitfield & (1 << i) == 0)
                .map(|(_, n)| *n)
                .collect::<Vec<_>>(),
            AckConvention::Inverted => get_missing(bitfield, &window),
        };
        for n in window.iter().filter(|n| !missing.contains(n)) {
            self.mark_acknowledged(*n);
        }
        for n in missing {
            if let Some(pending) = self.pending.iter_mut().find(|p| p.nonce == n) {
                debug!("peer reports nonce {} missing, resending", n);
                pending.last_sent = now;
                self.outgoing.push_back(pending.bytes.clone());
            }
        }
    }

    fn mark_acknowledged(&mut self, nonce: u16) {
        if let Some(record) = self.sent.iter_mut().find(|r| r.nonce == nonce) {
            record.acknowledged = true;
        }
        if let Some(idx) = self.pending.iter().position(|p| p.nonce == nonce) {
            if let Some(pending) = self.pending.remove(idx) {
                pending.resolve(AckOutcome::Acknowledged);
            }
            if self.hello_nonce == Some(nonce) && self.state == ConnectionState::Identified {
                self.state = ConnectionState::Connected;
            }
        }
    }

    /// Resends overdue packets and sends keep-alive pings.
    ///
    /// Returns [`TransportError::ConnectionTimeout`] once, when a packet runs
    /// out of resends; the connection is closed by then.
    pub fn poll(&mut self, now: Instant) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }

        let interval = Duration::from_millis(self.config.resend_interval_ms);
        let mut expired = None;
        for pending in self.pending.iter_mut() {
            if now.saturating_duration_since(pending.last_sent) < interval {
                continue;
            }
            if pending.resends >= self.config.max_attempts {
                expired = Some((pending.nonce, pending.resends));
                break;
            }
            pending.resends += 1;
            pending.last_sent = now;
            debug!("resending nonce {} (attempt {})", pending.nonce, pending.resends);
            self.outgoing.push_back(pending.bytes.clone());
        }

        if let Some((nonce, attempts)) = expired {
            warn!("nonce {} timed out after {} resends", nonce, attempts);
            self.close(DisconnectCause::Timeout { nonce, attempts });
            return Err(TransportError::ConnectionTimeout { nonce, attempts });
        }

        if let (ConnectionState::Connected, Some(ms)) = (self.state, self.config.keepalive_ms) {
            if now.saturating_duration_since(self.last_ping) >= Duration::from_millis(ms) {
                self.send_ping(now)?;
            }
        }
        Ok(())
    }

    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }

    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.outgoing.drain(..).collect()
    }
}
