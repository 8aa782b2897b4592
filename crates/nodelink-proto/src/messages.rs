//! Typed payloads carried inside envelopes.
//!
//! These are fixed structural mappings onto the payload document, not separate
//! protocols: each type serializes to the same JSON/CBOR shape the nodes have
//! always exchanged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::document::shortest_decimal;
use crate::envelope::{EncodedEnvelope, Envelope, EnvelopeCodec, MessageType};
use crate::error::{ProtoError, Result};

/// Number of PWM channels on the PCA9685 controller.
pub const PWM_CHANNELS: usize = 16;
/// Maximum SHT20 readings per telemetry message.
pub const MAX_SHT20_READINGS: usize = 2;
/// Maximum DS18B20 readings per telemetry message.
pub const MAX_DS18B20_READINGS: usize = 4;

/// A payload with a fixed envelope message type.
pub trait MessagePayload: Serialize + DeserializeOwned {
    /// Envelope type this payload travels under.
    const MESSAGE_TYPE: MessageType;

    /// Checks invariants that serde cannot express.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Renders the payload as a document.
    fn to_document(&self) -> Result<Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }

    /// Parses and validates a payload document.
    fn from_document(doc: &Value) -> Result<Self> {
        let parsed: Self =
            serde_json::from_value(doc.clone()).map_err(|e| ProtoError::InvalidPayload {
                message: Self::MESSAGE_TYPE.as_str(),
                reason: e.to_string(),
            })?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Extracts the payload from an envelope of the matching type.
    fn from_envelope(env: &Envelope) -> Result<Self> {
        if env.msg_type != Self::MESSAGE_TYPE {
            return Err(ProtoError::InvalidPayload {
                message: Self::MESSAGE_TYPE.as_str(),
                reason: format!("envelope carries {}", env.msg_type),
            });
        }
        Self::from_document(&env.payload)
    }
}

impl EnvelopeCodec {
    /// Encodes a typed payload under its own message type.
    pub fn encode_message<M: MessagePayload>(
        &self,
        timestamp_ms: u64,
        sequence: u32,
        message: &M,
    ) -> Result<EncodedEnvelope> {
        self.encode(M::MESSAGE_TYPE, timestamp_ms, sequence, &message.to_document()?)
    }
}

/// 64-bit 1-Wire ROM code, rendered as 16 uppercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RomCode(pub [u8; 8]);

impl Serialize for RomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(self.0))
    }
}

impl<'de> Deserialize<'de> for RomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(&text, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(RomCode(bytes))
    }
}

fn serialize_reading<S: Serializer>(
    value: &f32,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(shortest_decimal(*value))
}

/// One SHT20 temperature/humidity reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sht20Reading {
    /// Sensor identifier (mux channel label).
    pub id: String,
    /// Temperature in degrees Celsius.
    #[serde(rename = "t", serialize_with = "serialize_reading")]
    pub temperature_c: f32,
    /// Relative humidity in percent.
    #[serde(rename = "rh", serialize_with = "serialize_reading")]
    pub humidity_percent: f32,
    /// Whether the last bus transaction succeeded.
    #[serde(rename = "ok")]
    pub valid: bool,
}

/// One DS18B20 temperature reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ds18b20Reading {
    /// Device ROM code.
    pub rom: RomCode,
    /// Temperature in degrees Celsius.
    #[serde(rename = "t", serialize_with = "serialize_reading")]
    pub temperature_c: f32,
}

/// Port state of one MCP23017 expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct McpPorts {
    /// Port A bits.
    #[serde(rename = "A")]
    pub port_a: u16,
    /// Port B bits.
    #[serde(rename = "B")]
    pub port_b: u16,
}

/// GPIO state of both expanders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GpioBanks {
    /// First expander.
    pub mcp0: McpPorts,
    /// Second expander.
    pub mcp1: McpPorts,
}

/// PCA9685 output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pca9685State {
    /// PWM frequency in Hz.
    pub freq: u16,
    /// Duty cycle per channel.
    pub duty: [u16; PWM_CHANNELS],
}

/// PWM controller bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PwmBank {
    /// The single PCA9685 controller.
    pub pca9685: Pca9685State,
}

/// Periodic telemetry published by the sensor node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorUpdate {
    /// Humidity sensors.
    pub sht20: Vec<Sht20Reading>,
    /// 1-Wire temperature probes.
    pub ds18b20: Vec<Ds18b20Reading>,
    /// GPIO expander states.
    pub gpio: GpioBanks,
    /// PWM controller state.
    pub pwm: PwmBank,
}

impl MessagePayload for SensorUpdate {
    const MESSAGE_TYPE: MessageType = MessageType::SensorUpdate;

    fn validate(&self) -> Result<()> {
        if self.sht20.len() > MAX_SHT20_READINGS {
            return Err(invalid_sensor(format!("{} SHT20 readings", self.sht20.len())));
        }
        if self.ds18b20.len() > MAX_DS18B20_READINGS {
            return Err(invalid_sensor(format!(
                "{} DS18B20 readings",
                self.ds18b20.len()
            )));
        }
        Ok(())
    }
}

fn invalid_sensor(reason: String) -> ProtoError {
    ProtoError::InvalidPayload {
        message: MessageType::SensorUpdate.as_str(),
        reason,
    }
}

/// Set the duty cycle of one PWM channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmUpdate {
    /// Channel index, `0..16`.
    #[serde(rename = "ch")]
    pub channel: u8,
    /// Duty cycle.
    pub duty: u16,
}

/// Set the PWM controller frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmFrequency {
    /// Frequency in Hz.
    pub freq: u16,
}

/// GPIO expander selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum McpDevice {
    /// First expander.
    #[serde(rename = "mcp0")]
    Mcp0,
    /// Second expander.
    #[serde(rename = "mcp1")]
    Mcp1,
}

impl McpDevice {
    /// Zero-based device index.
    pub fn index(&self) -> u8 {
        match self {
            McpDevice::Mcp0 => 0,
            McpDevice::Mcp1 => 1,
        }
    }
}

/// Expander port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpioPort {
    /// Port A.
    A,
    /// Port B.
    B,
}

/// Masked write to an expander port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioWrite {
    /// Target expander.
    pub dev: McpDevice,
    /// Target port.
    pub port: GpioPort,
    /// Bits to change.
    pub mask: u16,
    /// New bit values (only bits in `mask` apply).
    pub value: u16,
}

/// Device command sent by the HMI node. At least one action must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// PWM duty update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_pwm: Option<PwmUpdate>,
    /// PWM frequency update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwm_freq: Option<PwmFrequency>,
    /// GPIO write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_gpio: Option<GpioWrite>,
}

impl DeviceCommand {
    /// Returns `true` when no action is set.
    pub fn is_empty(&self) -> bool {
        self.set_pwm.is_none() && self.pwm_freq.is_none() && self.write_gpio.is_none()
    }
}

impl MessagePayload for DeviceCommand {
    const MESSAGE_TYPE: MessageType = MessageType::Command;

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(ProtoError::InvalidPayload {
                message: MessageType::Command.as_str(),
                reason: "no action".to_string(),
            });
        }
        if let Some(pwm) = self.set_pwm {
            if pwm.channel as usize >= PWM_CHANNELS {
                return Err(ProtoError::InvalidPayload {
                    message: MessageType::Command.as_str(),
                    reason: format!("PWM channel {} out of range", pwm.channel),
                });
            }
        }
        Ok(())
    }
}

/// Acknowledgement for a command envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Sequence number of the acknowledged command.
    pub ref_seq: u32,
    /// Whether the command was applied.
    pub ok: bool,
    /// Failure reason, when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandAck {
    /// Positive acknowledgement.
    pub fn success(ref_seq: u32) -> Self {
        Self {
            ref_seq,
            ok: true,
            reason: None,
        }
    }

    /// Negative acknowledgement with a reason.
    pub fn failure(ref_seq: u32, reason: &str) -> Self {
        Self {
            ref_seq,
            ok: false,
            reason: Some(reason.to_string()),
        }
    }
}

impl MessagePayload for CommandAck {
    const MESSAGE_TYPE: MessageType = MessageType::CommandAck;
}

/// Liveness beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sender uptime in milliseconds.
    pub uptime_ms: u64,
}

impl MessagePayload for Heartbeat {
    const MESSAGE_TYPE: MessageType = MessageType::Heartbeat;
}
