//! `nodelink-diag` command line: offline diagnostics for keys, TOTP, handshakes and envelopes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nodelink_proto::{
    decode, DeviceCommand, EnvelopeCodec, GpioPort, GpioWrite, McpDevice, MessagePayload,
    MessageType, PwmFrequency, PwmUpdate, PROTOCOL_VERSION,
};
use nodelink_security::handshake::{self, HandshakeHeaders};
use nodelink_security::keys::{FRAME_LABEL, HANDSHAKE_LABEL};
use nodelink_security::{
    derive_key, totp, Clock, CommandAuthenticator, FrameCryptoContext, SecurityConfig,
    SharedSecret, SystemClock,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "nodelink-diag")]
#[command(about = "nodelink security diagnostics", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Diagnostic subcommands.
#[allow(missing_docs)]
#[derive(Subcommand)]
pub enum Command {
    /// Print the handshake and frame keys derived from a shared secret.
    DeriveKeys {
        #[arg(long, env = "NODELINK_SECRET_HEX")]
        secret_hex: String,
    },
    /// Compute a TOTP code.
    Totp {
        #[arg(long, env = "NODELINK_TOTP_SECRET")]
        secret_base32: String,
        /// Unix time in seconds, defaults to now.
        #[arg(long)]
        time: Option<u64>,
        #[arg(long, default_value = "6")]
        digits: u32,
        #[arg(long, default_value = "30")]
        period: u64,
    },
    /// Sign a handshake and print the request headers.
    SignHandshake {
        #[arg(long, env = "NODELINK_SECRET_HEX")]
        secret_hex: String,
        #[arg(long)]
        token: String,
        /// 16-byte nonce, random when omitted.
        #[arg(long)]
        nonce_hex: Option<String>,
    },
    /// Build a signed command envelope and print it as hex.
    Command {
        #[arg(long, env = "NODELINK_CMD_KEY_HEX")]
        key_hex: String,
        #[arg(long, requires = "pwm_duty")]
        pwm_channel: Option<u8>,
        #[arg(long, requires = "pwm_channel")]
        pwm_duty: Option<u16>,
        #[arg(long)]
        pwm_freq: Option<u16>,
        #[arg(long, requires_all = ["gpio_port", "gpio_mask", "gpio_value"])]
        gpio_device: Option<DeviceArg>,
        #[arg(long, ignore_case = true)]
        gpio_port: Option<PortArg>,
        #[arg(long)]
        gpio_mask: Option<u16>,
        #[arg(long)]
        gpio_value: Option<u16>,
        /// Timestamp in milliseconds, defaults to now.
        #[arg(long)]
        timestamp_ms: Option<u64>,
        #[arg(long, default_value = "1")]
        seq: u32,
        #[arg(long)]
        cbor: bool,
    },
    /// Decode a hex envelope and report its CRC status.
    Decode {
        #[arg(long)]
        hex: String,
    },
}

/// GPIO expander on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    /// First expander.
    Mcp0,
    /// Second expander.
    Mcp1,
}

/// Expander port on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PortArg {
    /// Port A.
    A,
    /// Port B.
    B,
}

impl Cli {
    /// Runs the subcommand and prints its report.
    pub fn run(self) -> Result<()> {
        println!("{}", self.execute()?);
        Ok(())
    }

    /// Runs the subcommand and returns its report.
    pub fn execute(&self) -> Result<String> {
        match &self.command {
            Command::DeriveKeys { secret_hex } => derive_keys(secret_hex),
            Command::Totp {
                secret_base32,
                time,
                digits,
                period,
            } => {
                let secret = nodelink_security::TotpSecret::from_base32(secret_base32)?;
                let now = time.unwrap_or_else(|| SystemClock.now_unix());
                let code = totp::compute(secret.as_bytes(), now, *period, *digits)?;
                Ok(totp::format_code(code, *digits))
            }
            Command::SignHandshake {
                secret_hex,
                token,
                nonce_hex,
            } => sign_handshake(secret_hex, token, nonce_hex.as_deref()),
            Command::Command {
                key_hex,
                pwm_channel,
                pwm_duty,
                pwm_freq,
                gpio_device,
                gpio_port,
                gpio_mask,
                gpio_value,
                timestamp_ms,
                seq,
                cbor,
            } => {
                let command = DeviceCommand {
                    set_pwm: match (pwm_channel, pwm_duty) {
                        (Some(channel), Some(duty)) => Some(PwmUpdate {
                            channel: *channel,
                            duty: *duty,
                        }),
                        _ => None,
                    },
                    pwm_freq: pwm_freq.map(|freq| PwmFrequency { freq }),
                    write_gpio: match (gpio_device, gpio_port, gpio_mask, gpio_value) {
                        (Some(dev), Some(port), Some(mask), Some(value)) => Some(GpioWrite {
                            dev: match dev {
                                DeviceArg::Mcp0 => McpDevice::Mcp0,
                                DeviceArg::Mcp1 => McpDevice::Mcp1,
                            },
                            port: match port {
                                PortArg::A => GpioPort::A,
                                PortArg::B => GpioPort::B,
                            },
                            mask: *mask,
                            value: *value,
                        }),
                        _ => None,
                    },
                };
                let ts = timestamp_ms.unwrap_or_else(|| SystemClock.now_ms());
                build_command(key_hex, &command, ts, *seq, *cbor)
            }
            Command::Decode { hex } => decode_envelope(hex),
        }
    }
}

fn decode_secret(secret_hex: &str) -> Result<Zeroizing<Vec<u8>>> {
    let secret = Zeroizing::new(hex::decode(secret_hex.trim()).context("secret is not hex")?);
    if secret.is_empty() {
        bail!("secret is empty");
    }
    Ok(secret)
}

fn derive_keys(secret_hex: &str) -> Result<String> {
    let secret = decode_secret(secret_hex)?;
    let handshake_key = derive_key(&secret, HANDSHAKE_LABEL)?;
    let frame_key = derive_key(&secret, FRAME_LABEL)?;
    Ok(format!(
        "handshake_key: {}\nframe_key: {}",
        hex::encode(handshake_key.as_bytes()),
        hex::encode(frame_key.as_bytes())
    ))
}

fn sign_handshake(secret_hex: &str, token: &str, nonce_hex: Option<&str>) -> Result<String> {
    let secret = decode_secret(secret_hex)?;
    let ctx = FrameCryptoContext::init(&SecurityConfig {
        enable_handshake: true,
        secret: SharedSecret::from_slice(&secret),
        ..SecurityConfig::default()
    })?;

    let nonce = match nonce_hex {
        Some(text) => {
            let nonce = hex::decode(text.trim()).context("nonce is not hex")?;
            if nonce.len() != handshake::WS_SECURITY_NONCE_LEN {
                bail!(
                    "nonce must be {} bytes, got {}",
                    handshake::WS_SECURITY_NONCE_LEN,
                    nonce.len()
                );
            }
            nonce
        }
        None => {
            let mut nonce = vec![0u8; handshake::WS_SECURITY_NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            nonce
        }
    };

    let authorization = handshake::bearer_value(token);
    let signature = handshake::sign(&ctx, &nonce, authorization.as_bytes())?;
    let headers = HandshakeHeaders {
        authorization,
        nonce_hex: Some(hex::encode(&nonce)),
        signature_hex: Some(hex::encode(signature)),
        totp: None,
    };
    Ok(headers
        .to_pairs()
        .into_iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn build_command(
    key_hex: &str,
    command: &DeviceCommand,
    timestamp_ms: u64,
    seq: u32,
    cbor: bool,
) -> Result<String> {
    let key = decode_secret(key_hex)?;
    let signer = CommandAuthenticator::with_key(&key)?;
    let payload = command.to_document()?;
    let auth = signer.sign_envelope(&payload, PROTOCOL_VERSION, timestamp_ms, &mut OsRng)?;
    let encoded = EnvelopeCodec::new(cbor).encode_with_auth(
        MessageType::Command,
        timestamp_ms,
        seq,
        &payload,
        &auth,
    )?;
    Ok(hex::encode(encoded.bytes))
}

fn decode_envelope(text: &str) -> Result<String> {
    let bytes = hex::decode(text.trim()).context("input is not hex")?;
    let env = decode(&bytes)?;
    let report = json!({
        "format": env.format,
        "v": env.version,
        "type": env.msg_type.as_str(),
        "ts": env.timestamp_ms,
        "seq": env.sequence,
        "crc": env.crc32,
        "crc_valid": env.crc_valid,
        "auth": env.auth,
        "payload": env.payload,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}
