//!
//! A platform-agnostic driver for the CSE7761 dual-channel energy metering chip, as found on the
//! Sonoff Dual R3 and POWCT boards. Built using embedded-hal.
//!
//! The core (register map, UART framing, driver, calibration and energy accounting) works without
//! `std`. The `std` feature, on by default, adds the YAML configuration schema, sensor entities,
//! registration of a configuration against a component and the polling [`CSE7761Component`] with
//! its raw register services.
//!

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod calibration;
pub mod driver;
pub mod energy;
pub mod frame;
pub mod register;

#[cfg(feature = "std")]
pub mod component;
#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod debug;
#[cfg(feature = "std")]
pub mod registration;
#[cfg(feature = "std")]
pub mod sensor;

#[cfg(test)]
mod mock_serial;

pub use calibration::{Calibration, Offsets};
pub use driver::*;
pub use energy::{EnergyMeter, EnergyStore, EnergyTotals, Flow};
pub use register::{Coefficient, Command, Register};

#[cfg(feature = "std")]
pub use component::{CSE7761Component, ServiceError};
#[cfg(feature = "std")]
pub use config::{load_file, load_str, ConfigError, Cse7761Config, ValidatedConfig};
#[cfg(feature = "std")]
pub use registration::{Cse7761Setters, EntityRegistry, SensorFactory};
#[cfg(feature = "std")]
pub use sensor::{Sensor, SensorKey, TextSensor};
