//! UART bus declarations and the device-level checks run against them

use std::fmt;

use serde::Deserialize;

use crate::config::error::{ConfigError, ConfigResult};

/// Baud rate the CSE7761 is fixed to
pub const REQUIRED_BAUD_RATE: u32 = 38400;

/// A GPIO reference, either a bare number or a board pin name such as `GPIO3`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Pin {
    Number(u32),
    Name(String),
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pin::Number(n) => write!(f, "GPIO{n}"),
            Pin::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Frame format of a bus, as checked at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl UartSettings {
    /// 38400 baud, 8 data bits, even parity, 1 stop bit
    pub const CSE7761: UartSettings = UartSettings {
        baud_rate: REQUIRED_BAUD_RATE,
        data_bits: 8,
        parity: Parity::Even,
        stop_bits: 1,
    };
}

impl fmt::Display for UartSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}

/// One entry of the `uart:` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UartBusConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tx_pin: Option<Pin>,
    #[serde(default)]
    pub rx_pin: Option<Pin>,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_rx_buffer_size() -> usize {
    256
}

impl UartBusConfig {
    /// Name used in messages, the ID when one is set
    pub fn name(&self) -> &str {
        self.id.as_deref().unwrap_or("uart")
    }

    pub fn settings(&self) -> UartSettings {
        UartSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }

    /// Checks that apply to any bus, whatever device sits on it
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, reason: &str| ConfigError::InvalidValue {
            key: format!("uart.{}.{key}", self.name()),
            reason: reason.to_string(),
        };

        if self.tx_pin.is_none() && self.rx_pin.is_none() {
            return Err(invalid("tx_pin", "at least one of tx_pin and rx_pin is required"));
        }
        if self.baud_rate == 0 {
            return Err(invalid("baud_rate", "must be greater than zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(invalid("data_bits", "must be between 5 and 8"));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(invalid("stop_bits", "must be 1 or 2"));
        }
        Ok(())
    }
}

/// Requirements a device puts on the bus it is attached to
#[derive(Debug, Clone, Copy)]
pub struct DeviceRequirements<'a> {
    pub component: &'a str,
    pub baud_rate: Option<u32>,
    pub require_rx: bool,
    pub require_tx: bool,
}

impl DeviceRequirements<'_> {
    /// Final validation of `bus` once every section has been parsed
    pub fn check(&self, bus: &UartBusConfig) -> ConfigResult<()> {
        let missing = |pin: &'static str| ConfigError::MissingUartPin {
            component: self.component.to_string(),
            bus: bus.name().to_string(),
            pin,
        };

        if self.require_rx && bus.rx_pin.is_none() {
            return Err(missing("rx_pin"));
        }
        if self.require_tx && bus.tx_pin.is_none() {
            return Err(missing("tx_pin"));
        }
        if let Some(expected) = self.baud_rate {
            if bus.baud_rate != expected {
                return Err(ConfigError::BaudRate {
                    component: self.component.to_string(),
                    bus: bus.name().to_string(),
                    expected,
                    actual: bus.baud_rate,
                });
            }
        }
        Ok(())
    }
}
