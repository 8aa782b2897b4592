//! Applies received device commands to the hardware seam.

use nodelink_proto::{CommandAck, DeviceCommand, GpioPort, McpDevice, MessagePayload, MessageType};
use thiserror::Error;
use tracing::{info, warn};

use crate::session::Inbound;

/// Failure reported by a device actuator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ActuatorError(pub String);

/// Board I/O reached by commands.
pub trait DeviceActuator {
    /// Sets one PWM channel's duty cycle.
    fn set_pwm_duty(&mut self, channel: u8, duty: u16) -> Result<(), ActuatorError>;

    /// Sets the PWM controller frequency.
    fn set_pwm_frequency(&mut self, freq: u16) -> Result<(), ActuatorError>;

    /// Writes the masked bits of one expander port.
    fn write_gpio(
        &mut self,
        device: McpDevice,
        port: GpioPort,
        mask: u16,
        value: u16,
    ) -> Result<(), ActuatorError>;
}

/// Turns inbound commands into actuator calls and acknowledgements.
#[derive(Debug)]
pub struct CommandExecutor<A: DeviceActuator> {
    actuator: A,
}

impl<A: DeviceActuator> CommandExecutor<A> {
    /// Executor driving `actuator`.
    pub fn new(actuator: A) -> Self {
        Self { actuator }
    }

    /// The actuator.
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Applies an inbound command and returns the acknowledgement to send back.
    ///
    /// Messages with a CRC mismatch are refused; actions run in the order
    /// frequency, duty, GPIO and stop at the first actuator error.
    pub fn execute(&mut self, inbound: &Inbound) -> CommandAck {
        let env = &inbound.envelope;
        let seq = env.sequence;
        if env.msg_type != MessageType::Command {
            return CommandAck::failure(seq, "not a command");
        }
        if !env.crc_valid {
            warn!(seq, "refusing command with CRC mismatch");
            return CommandAck::failure(seq, "crc mismatch");
        }
        let command = match DeviceCommand::from_envelope(env) {
            Ok(command) => command,
            Err(e) => {
                warn!(seq, error = %e, "invalid command payload");
                return CommandAck::failure(seq, "invalid command");
            }
        };

        match self.apply(&command) {
            Ok(()) => {
                info!(seq, "command applied");
                CommandAck::success(seq)
            }
            Err(e) => {
                warn!(seq, error = %e, "command failed");
                CommandAck::failure(seq, &e.0)
            }
        }
    }

    fn apply(&mut self, command: &DeviceCommand) -> Result<(), ActuatorError> {
        if let Some(freq) = command.pwm_freq {
            self.actuator.set_pwm_frequency(freq.freq)?;
        }
        if let Some(pwm) = command.set_pwm {
            self.actuator.set_pwm_duty(pwm.channel, pwm.duty)?;
        }
        if let Some(gpio) = command.write_gpio {
            self.actuator
                .write_gpio(gpio.dev, gpio.port, gpio.mask, gpio.value)?;
        }
        Ok(())
    }
}

/// In-memory board model: PWM duty/frequency and expander port latches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedBoard {
    /// PWM frequency in Hz.
    pub pwm_freq: u16,
    /// Duty per PWM channel.
    pub pwm_duty: [u16; nodelink_proto::messages::PWM_CHANNELS],
    /// Port latches indexed by `[device][port]`.
    pub gpio: [[u16; 2]; 2],
}

impl DeviceActuator for SimulatedBoard {
    fn set_pwm_duty(&mut self, channel: u8, duty: u16) -> Result<(), ActuatorError> {
        let slot = self
            .pwm_duty
            .get_mut(channel as usize)
            .ok_or_else(|| ActuatorError(format!("no PWM channel {}", channel)))?;
        *slot = duty;
        Ok(())
    }

    fn set_pwm_frequency(&mut self, freq: u16) -> Result<(), ActuatorError> {
        if freq == 0 {
            return Err(ActuatorError("PWM frequency must be nonzero".to_string()));
        }
        self.pwm_freq = freq;
        Ok(())
    }

    fn write_gpio(
        &mut self,
        device: McpDevice,
        port: GpioPort,
        mask: u16,
        value: u16,
    ) -> Result<(), ActuatorError> {
        let port_index = match port {
            GpioPort::A => 0,
            GpioPort::B => 1,
        };
        let latch = &mut self.gpio[device.index() as usize][port_index];
        *latch = (*latch & !mask) | (value & mask);
        Ok(())
    }
}
