//! Protocol envelope codec.
//!
//! Every message exchanged between the sensor node and the HMI node travels in
//! an envelope `{v, type, ts, seq, payload, crc[, auth]}` serialized as either
//! JSON or CBOR. `crc` is the CRC-32 of the serialized payload sub-document
//! only; the header fields are not covered by it.
//!
//! The encoder prefers CBOR when configured to and silently falls back to JSON
//! if CBOR encoding fails, so the decoder always sniffs the format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::crc;
use crate::document::{self, RawDocument, WireFormat};
use crate::error::{ProtoError, Result};

/// Envelope schema version written by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Kind of message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Periodic telemetry from the sensor node.
    #[serde(rename = "sensor_update")]
    SensorUpdate,
    /// Device command from the HMI node.
    #[serde(rename = "cmd")]
    Command,
    /// Liveness beacon.
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Acknowledgement of a previously received command.
    #[serde(rename = "cmd_ack")]
    CommandAck,
}

impl MessageType {
    /// Wire name of the message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::SensorUpdate => "sensor_update",
            MessageType::Command => "cmd",
            MessageType::Heartbeat => "heartbeat",
            MessageType::CommandAck => "cmd_ack",
        }
    }

    /// Parses a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "sensor_update" => Some(MessageType::SensorUpdate),
            "cmd" => Some(MessageType::Command),
            "heartbeat" => Some(MessageType::Heartbeat),
            "cmd_ack" => Some(MessageType::CommandAck),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-command authentication side channel carried next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    /// Hex-encoded nonce (1 to 16 bytes).
    pub nonce: String,
    /// Hex-encoded HMAC-SHA-256 tag.
    pub mac: String,
    /// Algorithm tag, `"HS256"` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Schema version (`v`).
    pub version: u32,
    /// Message kind (`type`).
    pub msg_type: MessageType,
    /// Sender timestamp in milliseconds (`ts`).
    pub timestamp_ms: u64,
    /// Sender sequence number (`seq`).
    pub sequence: u32,
    /// Nested payload document.
    pub payload: Value,
    /// CRC-32 carried on the wire (`crc`), 0 when absent.
    pub crc32: u32,
    /// Whether `crc32` matches the re-serialized payload.
    pub crc_valid: bool,
    /// Format the envelope was decoded from.
    pub format: WireFormat,
    /// Command authentication block, if present and well-formed.
    pub auth: Option<AuthBlock>,
}

/// Output of [`EnvelopeCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEnvelope {
    /// Serialized envelope.
    pub bytes: Vec<u8>,
    /// CRC-32 of the serialized payload.
    pub crc32: u32,
    /// Format actually used.
    pub format: WireFormat,
}

/// Encoder/decoder for message envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    prefer_cbor: bool,
}

impl EnvelopeCodec {
    /// Creates a codec. With `prefer_cbor` the encoder tries CBOR first.
    pub fn new(prefer_cbor: bool) -> Self {
        Self { prefer_cbor }
    }

    /// Returns whether CBOR is preferred on encode.
    pub fn prefers_cbor(&self) -> bool {
        self.prefer_cbor
    }

    /// Encodes an envelope without an authentication block.
    pub fn encode(
        &self,
        msg_type: MessageType,
        timestamp_ms: u64,
        sequence: u32,
        payload: &Value,
    ) -> Result<EncodedEnvelope> {
        self.encode_inner(msg_type, timestamp_ms, sequence, payload, None)
    }

    /// Encodes an envelope carrying a command authentication block.
    pub fn encode_with_auth(
        &self,
        msg_type: MessageType,
        timestamp_ms: u64,
        sequence: u32,
        payload: &Value,
        auth: &AuthBlock,
    ) -> Result<EncodedEnvelope> {
        self.encode_inner(msg_type, timestamp_ms, sequence, payload, Some(auth))
    }

    /// Decodes an envelope, sniffing the wire format.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        decode(bytes)
    }

    fn encode_inner(
        &self,
        msg_type: MessageType,
        timestamp_ms: u64,
        sequence: u32,
        payload: &Value,
        auth: Option<&AuthBlock>,
    ) -> Result<EncodedEnvelope> {
        if self.prefer_cbor {
            match encode_as(WireFormat::Cbor, msg_type, timestamp_ms, sequence, payload, auth) {
                Ok(encoded) => return Ok(encoded),
                Err(e) => warn!(error = %e, "CBOR encoding failed, falling back to JSON"),
            }
        }
        encode_as(WireFormat::Json, msg_type, timestamp_ms, sequence, payload, auth)
    }
}

fn encode_as(
    format: WireFormat,
    msg_type: MessageType,
    timestamp_ms: u64,
    sequence: u32,
    payload: &Value,
    auth: Option<&AuthBlock>,
) -> Result<EncodedEnvelope> {
    let payload_bytes = document::serialize(format, payload)?;
    let crc32 = crc::crc32(&payload_bytes);

    let mut root = Map::new();
    root.insert("v".to_string(), Value::from(PROTOCOL_VERSION));
    root.insert("type".to_string(), Value::from(msg_type.as_str()));
    root.insert("ts".to_string(), Value::from(timestamp_ms));
    root.insert("seq".to_string(), Value::from(sequence));
    root.insert("payload".to_string(), payload.clone());
    root.insert("crc".to_string(), Value::from(crc32));
    if let Some(auth) = auth {
        root.insert("auth".to_string(), serde_json::to_value(auth)?);
    }

    let bytes = document::serialize(format, &Value::Object(root))?;
    debug!(
        msg_type = %msg_type,
        format = %format,
        len = bytes.len(),
        crc = format_args!("0x{:08X}", crc32),
        "encoded envelope"
    );
    Ok(EncodedEnvelope {
        bytes,
        crc32,
        format,
    })
}

/// Decodes an envelope, sniffing JSON versus CBOR.
///
/// A CRC mismatch does not fail decoding; it is reported through
/// [`Envelope::crc_valid`] so the caller can decide what to do.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let raw = RawDocument::parse(bytes)?;
    let format = raw.format();
    let root = match raw.into_value()? {
        Value::Object(map) => map,
        _ => {
            return Err(ProtoError::Malformed {
                reason: "envelope is not a map".to_string(),
            })
        }
    };

    let version = root
        .get("v")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(ProtoError::MissingField { field: "v" })?;
    let type_name = root
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtoError::MissingField { field: "type" })?;
    let msg_type = MessageType::from_wire(type_name)
        .ok_or_else(|| ProtoError::UnknownMessageType(type_name.to_string()))?;
    let timestamp_ms = root
        .get("ts")
        .and_then(Value::as_u64)
        .ok_or(ProtoError::MissingField { field: "ts" })?;
    let sequence = match root.get("seq") {
        None => 0,
        Some(seq) => seq
            .as_u64()
            .and_then(|s| u32::try_from(s).ok())
            .ok_or(ProtoError::MissingField { field: "seq" })?,
    };
    let payload = root
        .get("payload")
        .cloned()
        .ok_or(ProtoError::MissingField { field: "payload" })?;
    let wire_crc = root
        .get("crc")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok());

    let crc_valid = match wire_crc {
        Some(expected) => {
            let reserialized = document::serialize(format, &payload)?;
            crc::verify(expected, &reserialized)
        }
        None => false,
    };
    if !crc_valid {
        debug!(msg_type = %msg_type, format = %format, "envelope payload failed CRC check");
    }

    let auth = root
        .get("auth")
        .and_then(|a| match serde_json::from_value::<AuthBlock>(a.clone()) {
            Ok(block) => Some(block),
            Err(e) => {
                debug!(error = %e, "ignoring malformed auth block");
                None
            }
        });

    Ok(Envelope {
        version,
        msg_type,
        timestamp_ms,
        sequence,
        payload,
        crc32: wire_crc.unwrap_or(0),
        crc_valid,
        format,
        auth,
    })
}
