//! Per-connection session.
//!
//! A [`Session`] owns every piece of mutable security state for one link: the
//! send counter (inside the crypto context), the receive watermark, the
//! outbound sequence number and the command authenticator. Two sessions never
//! share state.

use nodelink_proto::{
    DeviceCommand, EnvelopeCodec, Envelope, MessagePayload, MessageType, PROTOCOL_VERSION,
};
use nodelink_security::{frame, CommandAuthenticator, FrameCryptoContext, RxWatermark};
use rand::{CryptoRng, RngCore};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Result, SessionError};
use crate::transport::Transport;

/// A received, decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Decoded envelope; `envelope.crc_valid` reports the payload CRC check.
    pub envelope: Envelope,
    /// Whether the message passed command authentication.
    pub authenticated: bool,
}

/// Security and sequencing state for one connection.
pub struct Session<T: Transport> {
    crypto: FrameCryptoContext,
    rx_watermark: RxWatermark,
    codec: EnvelopeCodec,
    next_sequence: u32,
    command_auth: Option<CommandAuthenticator>,
    transport: T,
}

impl<T: Transport> Session<T> {
    /// Session over `transport` with the given crypto context and codec.
    pub fn new(crypto: FrameCryptoContext, codec: EnvelopeCodec, transport: T) -> Self {
        Self {
            crypto,
            rx_watermark: RxWatermark::new(),
            codec,
            next_sequence: 1,
            command_auth: None,
            transport,
        }
    }

    /// Session built from a validated node configuration.
    pub fn from_config(config: &NodeConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let crypto = FrameCryptoContext::init(&config.security_config()?)?;
        let mut session = Self::new(crypto, EnvelopeCodec::new(config.prefer_cbor), transport);
        session.command_auth = config.command_authenticator()?;
        info!(
            role = ?config.role,
            encryption = session.crypto.encryption_enabled(),
            command_auth = session.command_auth.is_some(),
            "session configured"
        );
        Ok(session)
    }

    /// Attaches a command authenticator used to sign outbound and check inbound commands.
    pub fn with_command_auth(mut self, auth: CommandAuthenticator) -> Self {
        self.command_auth = Some(auth);
        self
    }

    /// Crypto context.
    pub fn crypto(&self) -> &FrameCryptoContext {
        &self.crypto
    }

    /// Receive high-water mark.
    pub fn rx_watermark(&self) -> RxWatermark {
        self.rx_watermark
    }

    /// Command authenticator, if attached.
    pub fn command_auth(&self) -> Option<&CommandAuthenticator> {
        self.command_auth.as_ref()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn commit_sequence(&mut self, seq: u32) {
        self.next_sequence = seq.wrapping_add(1);
    }

    /// Encodes, seals and sends a payload; returns its sequence number.
    ///
    /// The sequence number is consumed only once the message is handed to the
    /// transport.
    pub fn send(&mut self, msg_type: MessageType, timestamp_ms: u64, payload: &Value) -> Result<u32> {
        let seq = self.next_sequence;
        let encoded = self.codec.encode(msg_type, timestamp_ms, seq, payload)?;
        self.seal_and_send(&encoded.bytes)?;
        self.commit_sequence(seq);
        debug!(%msg_type, seq, format = %encoded.format, "message sent");
        Ok(seq)
    }

    /// Sends a typed payload.
    pub fn send_message<M: MessagePayload>(&mut self, timestamp_ms: u64, message: &M) -> Result<u32> {
        self.send(M::MESSAGE_TYPE, timestamp_ms, &message.to_document()?)
    }

    /// Sends a device command, signed when a command key is attached.
    pub fn send_command<R: RngCore + CryptoRng>(
        &mut self,
        timestamp_ms: u64,
        command: &DeviceCommand,
        rng: &mut R,
    ) -> Result<u32> {
        let payload = command.to_document()?;
        let auth = match self.command_auth.as_ref() {
            Some(auth) if auth.has_key() => {
                Some(auth.sign_envelope(&payload, PROTOCOL_VERSION, timestamp_ms, rng)?)
            }
            _ => None,
        };

        let seq = self.next_sequence;
        let encoded = match auth {
            Some(auth) => self.codec.encode_with_auth(
                MessageType::Command,
                timestamp_ms,
                seq,
                &payload,
                &auth,
            )?,
            None => self
                .codec
                .encode(MessageType::Command, timestamp_ms, seq, &payload)?,
        };
        self.seal_and_send(&encoded.bytes)?;
        self.commit_sequence(seq);
        debug!(seq, "command sent");
        Ok(seq)
    }

    fn seal_and_send(&mut self, plaintext: &[u8]) -> Result<()> {
        let sealed = frame::encrypt(&mut self.crypto, plaintext)?;
        self.transport.send(&sealed)
    }

    /// Opens, decodes and, for commands, authenticates an inbound message.
    ///
    /// With a command authenticator attached, commands that fail validation
    /// are rejected. Without one, commands pass through unauthenticated.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Inbound> {
        let mut buf = bytes.to_vec();
        frame::decrypt_in_place(&self.crypto, &mut buf, &mut self.rx_watermark)?;
        let envelope = self.codec.decode(&buf)?;
        if !envelope.crc_valid {
            warn!(seq = envelope.sequence, "payload CRC mismatch");
        }

        let authenticated = match (&envelope.msg_type, self.command_auth.as_mut()) {
            (MessageType::Command, Some(auth)) => {
                if !auth.validate(&envelope) {
                    return Err(SessionError::CommandRejected);
                }
                true
            }
            _ => false,
        };

        Ok(Inbound {
            envelope,
            authenticated,
        })
    }

    /// Starts a fresh outbound stream after a reconnect.
    ///
    /// Only the send counter restarts; the receive watermark is kept.
    pub fn reconnect(&mut self) {
        self.crypto.reset_counters();
        debug!(rx_watermark = self.rx_watermark.value(), "session reconnected");
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("crypto", &self.crypto)
            .field("rx_watermark", &self.rx_watermark)
            .field("codec", &self.codec)
            .field("next_sequence", &self.next_sequence)
            .field("command_auth", &self.command_auth)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, RecordingTransport};
    use nodelink_proto::{Heartbeat, PwmUpdate};
    use nodelink_security::{SecurityConfig, SharedSecret};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    const CMD_KEY: [u8; 32] = [0x11; 32];

    fn crypto(encrypt: bool) -> FrameCryptoContext {
        FrameCryptoContext::init(&SecurityConfig {
            enable_encryption: encrypt,
            secret: SharedSecret::from_slice(&[9u8; 32]),
            ..SecurityConfig::default()
        })
        .unwrap()
    }

    fn session(encrypt: bool, cbor: bool) -> Session<RecordingTransport> {
        Session::new(crypto(encrypt), EnvelopeCodec::new(cbor), RecordingTransport::new())
    }

    fn pwm_command() -> DeviceCommand {
        DeviceCommand {
            set_pwm: Some(PwmUpdate {
                channel: 2,
                duty: 300,
            }),
            ..DeviceCommand::default()
        }
    }

    #[test]
    fn test_send_receive_encrypted() {
        for cbor in [false, true] {
            let mut tx = session(true, cbor);
            let mut rx = session(true, false);
            let seq = tx
                .send(MessageType::Heartbeat, 1_000, &json!({"uptime_ms": 5}))
                .unwrap();
            assert_eq!(seq, 1);
            let sent = tx.transport().take();
            assert_eq!(sent.len(), 1);
            let inbound = rx.receive(&sent[0]).unwrap();
            assert_eq!(inbound.envelope.msg_type, MessageType::Heartbeat);
            assert_eq!(inbound.envelope.sequence, 1);
            assert!(inbound.envelope.crc_valid);
            assert!(!inbound.authenticated);
            assert_eq!(rx.rx_watermark().value(), 1);
        }
    }

    #[test]
    fn test_sequence_increments() {
        let mut tx = session(false, false);
        assert_eq!(tx.send_message(1, &Heartbeat { uptime_ms: 1 }).unwrap(), 1);
        assert_eq!(tx.send_message(2, &Heartbeat { uptime_ms: 2 }).unwrap(), 2);
    }

    #[test]
    fn test_failed_send_keeps_sequence() {
        let (transport, rx) = ChannelTransport::pair();
        drop(rx);
        let mut tx = Session::new(crypto(false), EnvelopeCodec::new(false), transport);
        assert!(matches!(
            tx.send_message(1, &Heartbeat { uptime_ms: 1 }),
            Err(SessionError::Transport { .. })
        ));
        assert!(tx.send_command(1, &pwm_command(), &mut StdRng::seed_from_u64(1)).is_err());
        assert_eq!(tx.next_sequence, 1);

        let mut tx = session(false, false);
        assert!(tx
            .send_command(1, &DeviceCommand::default(), &mut StdRng::seed_from_u64(1))
            .is_err());
        assert_eq!(tx.send_message(2, &Heartbeat { uptime_ms: 2 }).unwrap(), 1);
    }

    #[test]
    fn test_replayed_frame_rejected() {
        let mut tx = session(true, false);
        let mut rx = session(true, false);
        tx.send_message(1, &Heartbeat { uptime_ms: 1 }).unwrap();
        let frame = tx.transport().take().remove(0);
        rx.receive(&frame).unwrap();
        assert!(matches!(
            rx.receive(&frame),
            Err(SessionError::Security(_))
        ));
    }

    #[test]
    fn test_reconnect_keeps_rx_watermark() {
        let mut tx = session(true, false);
        let mut rx = session(true, false);
        for i in 0..3 {
            tx.send_message(i, &Heartbeat { uptime_ms: i }).unwrap();
        }
        for frame in tx.transport().take() {
            rx.receive(&frame).unwrap();
        }
        rx.reconnect();
        assert_eq!(rx.rx_watermark().value(), 3);

        tx.reconnect();
        assert_eq!(tx.crypto().tx_counter(), 0);
        tx.send_message(9, &Heartbeat { uptime_ms: 9 }).unwrap();
        let frame = tx.transport().take().remove(0);
        assert!(rx.receive(&frame).is_err());
    }

    #[test]
    fn test_signed_command_accepted_once() {
        let mut hmi = session(true, true)
            .with_command_auth(CommandAuthenticator::with_key(&CMD_KEY).unwrap());
        let mut sensor = session(true, false)
            .with_command_auth(CommandAuthenticator::with_key(&CMD_KEY).unwrap());
        let mut rng = StdRng::seed_from_u64(3);

        hmi.send_command(50_000, &pwm_command(), &mut rng).unwrap();
        let frame = hmi.transport().take().remove(0);
        let inbound = sensor.receive(&frame).unwrap();
        assert!(inbound.authenticated);
        assert!(inbound.envelope.auth.is_some());
        assert_eq!(
            DeviceCommand::from_envelope(&inbound.envelope).unwrap(),
            pwm_command()
        );
    }

    #[test]
    fn test_unsigned_command_rejected_when_auth_required() {
        let mut hmi = session(false, false);
        let mut sensor = session(false, false)
            .with_command_auth(CommandAuthenticator::with_key(&CMD_KEY).unwrap());
        let mut rng = StdRng::seed_from_u64(4);
        hmi.send_command(1_000, &pwm_command(), &mut rng).unwrap();
        let frame = hmi.transport().take().remove(0);
        assert!(matches!(
            sensor.receive(&frame),
            Err(SessionError::CommandRejected)
        ));
    }

    #[test]
    fn test_wrong_command_key_rejected() {
        let mut hmi = session(false, false)
            .with_command_auth(CommandAuthenticator::with_key(&[0x22; 32]).unwrap());
        let mut sensor = session(false, false)
            .with_command_auth(CommandAuthenticator::with_key(&CMD_KEY).unwrap());
        let mut rng = StdRng::seed_from_u64(5);
        hmi.send_command(1_000, &pwm_command(), &mut rng).unwrap();
        let frame = hmi.transport().take().remove(0);
        assert!(sensor.receive(&frame).is_err());
    }

    #[test]
    fn test_invalid_command_not_sent() {
        let mut hmi = session(false, false);
        let mut rng = StdRng::seed_from_u64(6);
        assert!(hmi
            .send_command(1, &DeviceCommand::default(), &mut rng)
            .is_err());
        assert!(hmi.transport().take().is_empty());
    }
}
