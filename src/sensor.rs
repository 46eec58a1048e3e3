//! Sensor entities published by the component and their schema descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A numeric entity the component publishes readings to.
pub trait Sensor {
    fn publish_state(&self, value: f32);
}

/// A text entity, used for the raw register debug output.
pub trait TextSensor {
    fn publish_state(&self, value: &str);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Voltage,
    Current,
    Power,
    Energy,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// Default presentation of a sensor key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub unit_of_measurement: &'static str,
    pub accuracy_decimals: u8,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
}

pub const UNIT_VOLT: &str = "V";
pub const UNIT_AMPERE: &str = "A";
pub const UNIT_WATT: &str = "W";
pub const UNIT_KILOWATT_HOURS: &str = "kWh";

/// Sensor keys accepted in the component configuration, in registration order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SensorKey {
    Voltage,
    Current1,
    Current2,
    ActivePower1,
    ActivePower2,
    EnergyReceived,
    EnergyExported,
}

impl SensorKey {
    pub const ALL: [SensorKey; 7] = [
        SensorKey::Voltage,
        SensorKey::Current1,
        SensorKey::Current2,
        SensorKey::ActivePower1,
        SensorKey::ActivePower2,
        SensorKey::EnergyReceived,
        SensorKey::EnergyExported,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SensorKey::Voltage => "voltage",
            SensorKey::Current1 => "current_1",
            SensorKey::Current2 => "current_2",
            SensorKey::ActivePower1 => "active_power_1",
            SensorKey::ActivePower2 => "active_power_2",
            SensorKey::EnergyReceived => "energy_received",
            SensorKey::EnergyExported => "energy_exported",
        }
    }

    /// Name of the component setter bound to this key.
    pub fn setter(self) -> &'static str {
        match self {
            SensorKey::Voltage => "set_voltage_sensor",
            SensorKey::Current1 => "set_current_1_sensor",
            SensorKey::Current2 => "set_current_2_sensor",
            SensorKey::ActivePower1 => "set_active_power_1_sensor",
            SensorKey::ActivePower2 => "set_active_power_2_sensor",
            SensorKey::EnergyReceived => "set_energy_received_sensor",
            SensorKey::EnergyExported => "set_energy_exported_sensor",
        }
    }

    pub fn descriptor(self) -> SensorDescriptor {
        match self {
            SensorKey::Voltage => SensorDescriptor {
                unit_of_measurement: UNIT_VOLT,
                accuracy_decimals: 1,
                device_class: DeviceClass::Voltage,
                state_class: StateClass::Measurement,
            },
            SensorKey::Current1 | SensorKey::Current2 => SensorDescriptor {
                unit_of_measurement: UNIT_AMPERE,
                accuracy_decimals: 2,
                device_class: DeviceClass::Current,
                state_class: StateClass::Measurement,
            },
            SensorKey::ActivePower1 | SensorKey::ActivePower2 => SensorDescriptor {
                unit_of_measurement: UNIT_WATT,
                accuracy_decimals: 1,
                device_class: DeviceClass::Power,
                state_class: StateClass::Measurement,
            },
            SensorKey::EnergyReceived | SensorKey::EnergyExported => SensorDescriptor {
                unit_of_measurement: UNIT_KILOWATT_HOURS,
                accuracy_decimals: 3,
                device_class: DeviceClass::Energy,
                state_class: StateClass::TotalIncreasing,
            },
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Text sensor references used for debug output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DebugKey {
    Hex,
    Bin,
}

impl DebugKey {
    pub const ALL: [DebugKey; 2] = [DebugKey::Hex, DebugKey::Bin];

    pub fn key(self) -> &'static str {
        match self {
            DebugKey::Hex => "debug_sensor_hex_id",
            DebugKey::Bin => "debug_sensor_bin_id",
        }
    }

    pub fn setter(self) -> &'static str {
        match self {
            DebugKey::Hex => "set_debug_text_sensor_hex",
            DebugKey::Bin => "set_debug_text_sensor_bin",
        }
    }
}

impl fmt::Display for DebugKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
