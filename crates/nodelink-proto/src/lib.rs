#![warn(missing_docs)]

//! nodelink protocol: message envelope (JSON/CBOR), payload CRC-32, typed payloads
//!
//! Outbound: payload document → envelope `{v, type, ts, seq, payload, crc}` → bytes
//! Inbound:  bytes → sniff JSON/CBOR → envelope + CRC-valid flag → typed payload

pub mod crc;
pub mod document;
pub mod envelope;
pub mod error;
pub mod messages;

pub use document::{RawDocument, WireFormat};
pub use envelope::{
    decode, AuthBlock, EncodedEnvelope, Envelope, EnvelopeCodec, MessageType, PROTOCOL_VERSION,
};
pub use error::{ProtoError, Result};
pub use messages::{
    CommandAck, DeviceCommand, Ds18b20Reading, GpioBanks, GpioPort, GpioWrite, Heartbeat,
    McpDevice, McpPorts, MessagePayload, Pca9685State, PwmBank, PwmFrequency, PwmUpdate, RomCode,
    SensorUpdate, Sht20Reading,
};
