//! Configuration schema of the CSE7761 component
//!
//! A configuration document declares the UART buses, the text sensors the debug services publish
//! to and the `cse7761:` section itself:
//!
//! ```yaml
//! uart:
//!   - id: uart_bus
//!     tx_pin: GPIO1
//!     rx_pin: GPIO3
//!     baud_rate: 38400
//!     parity: EVEN
//!
//! text_sensor:
//!   - id: register_hex
//!
//! cse7761:
//!   update_interval: 10s
//!   voltage:
//!     name: Voltage
//!   current_1:
//!     name: Current
//!   debug_sensor_hex_id: register_hex
//! ```
//!
//! Validation happens in two passes: schema checks on each section, then a final pass tying the
//! component to its bus and to the text sensors it references.

mod error;
mod interval;
mod uart;

pub use error::{ConfigError, ConfigResult};
pub use interval::{UpdateInterval, DEFAULT_UPDATE_INTERVAL};
pub use uart::{
    DeviceRequirements, Parity, Pin, UartBusConfig, UartSettings, REQUIRED_BAUD_RATE,
};

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Deserializer};

use crate::sensor::{DebugKey, DeviceClass, SensorKey, StateClass};

/// ID given to the component when none is configured
pub const DEFAULT_COMPONENT_ID: &str = "cse7761_component";

/// Highest accepted `accuracy_decimals`
pub const MAX_ACCURACY_DECIMALS: u8 = 6;

const COMPONENT: &str = "cse7761";

/// Options shared by every sensor entry; descriptor fields override the key's defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub accuracy_decimals: Option<u8>,
    #[serde(default)]
    pub device_class: Option<DeviceClass>,
    #[serde(default)]
    pub state_class: Option<StateClass>,
}

/// A sensor entry with every default filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSensor {
    pub key: SensorKey,
    pub id: String,
    pub name: Option<String>,
    pub internal: bool,
    pub icon: Option<String>,
    pub unit_of_measurement: String,
    pub accuracy_decimals: u8,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
}

impl SensorConfig {
    pub fn resolve(&self, key: SensorKey, component_id: &str) -> ResolvedSensor {
        let descriptor = key.descriptor();
        ResolvedSensor {
            key,
            id: self
                .id
                .clone()
                .unwrap_or_else(|| format!("{component_id}_{key}")),
            name: self.name.clone(),
            internal: self.internal,
            icon: self.icon.clone(),
            unit_of_measurement: self
                .unit_of_measurement
                .clone()
                .unwrap_or_else(|| descriptor.unit_of_measurement.to_string()),
            accuracy_decimals: self
                .accuracy_decimals
                .unwrap_or(descriptor.accuracy_decimals),
            device_class: self.device_class.unwrap_or(descriptor.device_class),
            state_class: self.state_class.unwrap_or(descriptor.state_class),
        }
    }
}

/// A key that is present, even with an empty value, yields a sensor
fn present<'de, D>(deserializer: D) -> Result<Option<SensorConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SensorConfig>::deserialize(deserializer).map(|config| Some(config.unwrap_or_default()))
}

/// The `cse7761:` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cse7761Config {
    #[serde(default = "default_component_id")]
    pub id: String,

    #[serde(default)]
    pub uart_id: Option<String>,

    #[serde(default)]
    pub update_interval: UpdateInterval,

    /// Overrides the component's default setup priority
    #[serde(default)]
    pub setup_priority: Option<f32>,

    #[serde(default, deserialize_with = "present")]
    pub voltage: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub current_1: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub current_2: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub active_power_1: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub active_power_2: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub energy_received: Option<SensorConfig>,

    #[serde(default, deserialize_with = "present")]
    pub energy_exported: Option<SensorConfig>,

    /// Text sensor receiving raw register reads in hexadecimal
    #[serde(default)]
    pub debug_sensor_hex_id: Option<String>,

    /// Text sensor receiving raw register reads in binary
    #[serde(default)]
    pub debug_sensor_bin_id: Option<String>,
}

fn default_component_id() -> String {
    DEFAULT_COMPONENT_ID.to_string()
}

impl Default for Cse7761Config {
    fn default() -> Self {
        Self {
            id: default_component_id(),
            uart_id: None,
            update_interval: UpdateInterval::default(),
            setup_priority: None,
            voltage: None,
            current_1: None,
            current_2: None,
            active_power_1: None,
            active_power_2: None,
            energy_received: None,
            energy_exported: None,
            debug_sensor_hex_id: None,
            debug_sensor_bin_id: None,
        }
    }
}

impl Cse7761Config {
    pub fn sensor(&self, key: SensorKey) -> Option<&SensorConfig> {
        match key {
            SensorKey::Voltage => self.voltage.as_ref(),
            SensorKey::Current1 => self.current_1.as_ref(),
            SensorKey::Current2 => self.current_2.as_ref(),
            SensorKey::ActivePower1 => self.active_power_1.as_ref(),
            SensorKey::ActivePower2 => self.active_power_2.as_ref(),
            SensorKey::EnergyReceived => self.energy_received.as_ref(),
            SensorKey::EnergyExported => self.energy_exported.as_ref(),
        }
    }

    pub fn debug_sensor(&self, key: DebugKey) -> Option<&str> {
        match key {
            DebugKey::Hex => self.debug_sensor_hex_id.as_deref(),
            DebugKey::Bin => self.debug_sensor_bin_id.as_deref(),
        }
    }

    /// Configured sensors with their defaults applied, in registration order
    pub fn sensors(&self) -> Vec<ResolvedSensor> {
        SensorKey::ALL
            .into_iter()
            .filter_map(|key| self.sensor(key).map(|config| config.resolve(key, &self.id)))
            .collect()
    }

    /// Schema checks that need no other section
    pub fn validate(&self) -> ConfigResult<()> {
        validate_id(&self.id)?;
        if let Some(uart_id) = &self.uart_id {
            validate_id(uart_id)?;
        }
        if matches!(self.setup_priority, Some(priority) if !priority.is_finite()) {
            return Err(ConfigError::InvalidValue {
                key: format!("{COMPONENT}.setup_priority"),
                reason: "must be a finite number".to_string(),
            });
        }

        for key in SensorKey::ALL {
            let Some(config) = self.sensor(key) else {
                continue;
            };
            if let Some(id) = &config.id {
                validate_id(id)?;
            }
            if let Some(decimals) = config.accuracy_decimals {
                if decimals > MAX_ACCURACY_DECIMALS {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{COMPONENT}.{key}.accuracy_decimals"),
                        reason: format!("must be at most {MAX_ACCURACY_DECIMALS}"),
                    });
                }
            }
            if matches!(&config.unit_of_measurement, Some(unit) if unit.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{COMPONENT}.{key}.unit_of_measurement"),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        for key in DebugKey::ALL {
            if let Some(id) = self.debug_sensor(key) {
                validate_id(id)?;
            }
        }

        Ok(())
    }
}

/// A text sensor declared elsewhere in the document; only its ID matters here
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextSensorConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A whole configuration document. Sections this component does not use are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub uart: Vec<UartBusConfig>,

    #[serde(default)]
    pub text_sensor: Vec<TextSensorConfig>,

    pub cse7761: Cse7761Config,
}

/// A configuration that passed every check, tied to its bus
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub component: Cse7761Config,
    pub bus: UartBusConfig,
}

impl ValidatedConfig {
    pub fn sensors(&self) -> Vec<ResolvedSensor> {
        self.component.sensors()
    }
}

/// Bus requirements of the CSE7761
pub fn device_requirements() -> DeviceRequirements<'static> {
    DeviceRequirements {
        component: COMPONENT,
        baud_rate: Some(REQUIRED_BAUD_RATE),
        require_rx: true,
        require_tx: true,
    }
}

/// Parse and validate a configuration document
pub fn load_str(yaml: &str) -> ConfigResult<ValidatedConfig> {
    let document: Document =
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::ParseYaml { source })?;
    document.validate()
}

/// Read, parse and validate a configuration file
pub fn load_file(path: &Path) -> ConfigResult<ValidatedConfig> {
    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    load_str(&content)
}

impl Document {
    pub fn validate(self) -> ConfigResult<ValidatedConfig> {
        for bus in &self.uart {
            if let Some(id) = &bus.id {
                validate_id(id)?;
            }
            bus.validate()?;
        }
        for text_sensor in &self.text_sensor {
            validate_id(&text_sensor.id)?;
        }
        self.cse7761.validate()?;
        self.check_unique_ids()?;

        for key in DebugKey::ALL {
            if let Some(id) = self.cse7761.debug_sensor(key) {
                if !self.text_sensor.iter().any(|t| t.id == id) {
                    return Err(ConfigError::UnknownTextSensor {
                        key: key.to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }

        let bus = self.resolve_bus()?.clone();
        device_requirements().check(&bus)?;

        info!(
            "Validated {} '{}' on UART bus '{}' with {} sensor(s)",
            COMPONENT,
            self.cse7761.id,
            bus.name(),
            self.cse7761.sensors().len()
        );

        Ok(ValidatedConfig {
            component: self.cse7761,
            bus,
        })
    }

    fn resolve_bus(&self) -> ConfigResult<&UartBusConfig> {
        let component = self.cse7761.id.clone();
        match &self.cse7761.uart_id {
            Some(id) => self
                .uart
                .iter()
                .find(|bus| bus.id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| ConfigError::UnknownUartBus {
                    component,
                    id: id.clone(),
                }),
            None => match self.uart.as_slice() {
                [] => Err(ConfigError::NoUartBus { component }),
                [bus] => Ok(bus),
                buses => Err(ConfigError::AmbiguousUartBus {
                    component,
                    count: buses.len(),
                }),
            },
        }
    }

    fn check_unique_ids(&self) -> ConfigResult<()> {
        let sensors = self.cse7761.sensors();
        let ids = std::iter::once(self.cse7761.id.as_str())
            .chain(self.uart.iter().filter_map(|bus| bus.id.as_deref()))
            .chain(self.text_sensor.iter().map(|t| t.id.as_str()))
            .chain(sensors.iter().map(|s| s.id.as_str()));

        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateId { id: id.to_string() });
            }
        }
        Ok(())
    }
}

/// IDs must be C-style identifiers
pub fn validate_id(id: &str) -> ConfigResult<()> {
    let mut chars = id.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidId { id: id.to_string() })
    }
}
