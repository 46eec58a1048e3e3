//! The polling component publishing CSE7761 readings to sensor entities.

use std::mem;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::{Read, Write};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::calibration::Calibration;
use crate::config::{UartSettings, UpdateInterval, ValidatedConfig};
use crate::debug::{self as raw, NumberError};
use crate::driver::{CSE7761Driver, Channel};
use crate::energy::{EnergyMeter, EnergyStore, Flow};
use crate::frame::MAX_PAYLOAD;
use crate::registration::{self, Cse7761Setters, EntityRegistry, RegistrationError, SensorFactory};
use crate::sensor::{Sensor, TextSensor};

/// Setup priority of components that read sensor data
pub const SETUP_PRIORITY_DATA: f32 = 600.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("invalid register: {0}")]
    Register(NumberError),
    #[error("invalid value: {0}")]
    Value(NumberError),
    #[error("invalid register size {0}, expected 1 to 4 bytes")]
    Size(i32),
    #[error("CSE7761 is not ready")]
    NotReady,
    #[error("{0}")]
    Driver(String),
}

enum State<UART, Delay> {
    Pending(UART, Delay),
    Ready(CSE7761Driver<UART, Delay>),
    Failed,
}

pub struct CSE7761Component<UART, Delay> {
    id: String,
    update_interval: UpdateInterval,
    setup_priority: f32,
    uart_settings: Option<UartSettings>,
    state: State<UART, Delay>,

    voltage_sensor: Option<Rc<dyn Sensor>>,
    current_sensor_1: Option<Rc<dyn Sensor>>,
    current_sensor_2: Option<Rc<dyn Sensor>>,
    power_sensor_1: Option<Rc<dyn Sensor>>,
    power_sensor_2: Option<Rc<dyn Sensor>>,
    energy_received_sensor: Option<Rc<dyn Sensor>>,
    energy_exported_sensor: Option<Rc<dyn Sensor>>,
    debug_sensor_hex: Option<Rc<dyn TextSensor>>,
    debug_sensor_bin: Option<Rc<dyn TextSensor>>,

    calibration: Calibration,
    energy: EnergyMeter,
    energy_store: Option<Box<dyn EnergyStore>>,
}

fn publish(sensor: &Option<Rc<dyn Sensor>>, value: f64) {
    if let Some(sensor) = sensor {
        sensor.publish_state(value as f32);
    }
}

impl<UART, Delay> CSE7761Component<UART, Delay> {
    pub fn new(id: impl Into<String>, uart: UART, delay: Delay) -> Self {
        Self {
            id: id.into(),
            update_interval: UpdateInterval::default(),
            setup_priority: SETUP_PRIORITY_DATA,
            uart_settings: None,
            state: State::Pending(uart, delay),
            voltage_sensor: None,
            current_sensor_1: None,
            current_sensor_2: None,
            power_sensor_1: None,
            power_sensor_2: None,
            energy_received_sensor: None,
            energy_exported_sensor: None,
            debug_sensor_hex: None,
            debug_sensor_bin: None,
            calibration: Calibration::default(),
            energy: EnergyMeter::default(),
            energy_store: None,
        }
    }

    /// Build a component from a validated configuration and perform its setter calls.
    pub fn from_config(
        config: &ValidatedConfig,
        uart: UART,
        delay: Delay,
        factory: &mut dyn SensorFactory,
        registry: &dyn EntityRegistry,
    ) -> Result<Self, RegistrationError> {
        let mut component = Self::new(config.component.id.clone(), uart, delay);
        component.set_update_interval(config.component.update_interval);
        if let Some(priority) = config.component.setup_priority {
            component.set_setup_priority(priority);
        }
        component.set_uart_settings(config.bus.settings());

        let calls = registration::plan(&config.component);
        registration::apply(&calls, &mut component, factory, registry)?;
        Ok(component)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn update_interval(&self) -> UpdateInterval {
        self.update_interval
    }

    pub fn set_update_interval(&mut self, interval: UpdateInterval) {
        self.update_interval = interval;
    }

    /// Frame format of the bus the UART was opened with, checked by [`dump_config`](Self::dump_config)
    pub fn set_uart_settings(&mut self, settings: UartSettings) {
        self.uart_settings = Some(settings);
    }

    pub fn set_energy_store(&mut self, store: Box<dyn EnergyStore>) {
        self.energy_store = Some(store);
    }

    /// Defaults to [`SETUP_PRIORITY_DATA`]
    pub fn setup_priority(&self) -> f32 {
        self.setup_priority
    }

    pub fn set_setup_priority(&mut self, priority: f32) {
        self.setup_priority = priority;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn set_calibration_mode(&mut self, enabled: bool) {
        self.calibration.set_enabled(enabled);
    }

    /// Hand back the serial port and delay, unless setup failed with them.
    pub fn release(self) -> Option<(UART, Delay)> {
        match self.state {
            State::Pending(uart, delay) => Some((uart, delay)),
            State::Ready(driver) => Some(driver.release()),
            State::Failed => None,
        }
    }

    fn publish_debug(&self, hex: &str, bin: &str) {
        if let Some(sensor) = &self.debug_sensor_hex {
            sensor.publish_state(hex);
        }
        if let Some(sensor) = &self.debug_sensor_bin {
            sensor.publish_state(bin);
        }
    }
}

impl<UART, Delay> Cse7761Setters for CSE7761Component<UART, Delay> {
    fn set_voltage_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.voltage_sensor = Some(sensor);
    }

    fn set_current_1_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.current_sensor_1 = Some(sensor);
    }

    fn set_current_2_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.current_sensor_2 = Some(sensor);
    }

    fn set_active_power_1_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.power_sensor_1 = Some(sensor);
    }

    fn set_active_power_2_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.power_sensor_2 = Some(sensor);
    }

    fn set_energy_received_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.energy_received_sensor = Some(sensor);
    }

    fn set_energy_exported_sensor(&mut self, sensor: Rc<dyn Sensor>) {
        self.energy_exported_sensor = Some(sensor);
    }

    fn set_debug_text_sensor_hex(&mut self, sensor: Rc<dyn TextSensor>) {
        self.debug_sensor_hex = Some(sensor);
    }

    fn set_debug_text_sensor_bin(&mut self, sensor: Rc<dyn TextSensor>) {
        self.debug_sensor_bin = Some(sensor);
    }
}

impl<UART, Delay> CSE7761Component<UART, Delay>
where
    UART: Read<u8> + Write<u8>,
    Delay: DelayNs,
{
    /// Bring up the chip and restore the saved energy totals. A chip that does not answer marks
    /// the component failed.
    pub fn setup(&mut self) {
        let (uart, delay) = match mem::replace(&mut self.state, State::Failed) {
            State::Pending(uart, delay) => (uart, delay),
            other => {
                self.state = other;
                return;
            }
        };

        match CSE7761Driver::new(uart, delay) {
            Ok(driver) => {
                self.state = State::Ready(driver);
                let saved = self.energy_store.as_mut().and_then(|store| store.load());
                match saved {
                    Some(totals) => {
                        info!(
                            "Loaded accumulated energy: {:.3} Wh (Received), {:.3} Wh (Exported)",
                            totals.received_wh, totals.exported_wh
                        );
                        self.energy = EnergyMeter::new(totals);
                    }
                    None => info!("No accumulated energy found, starting from 0.0 Wh."),
                }
            }
            Err(err) => error!("Setting up '{}' failed: {err}", self.id),
        }
    }

    /// Read every measurement and publish it. `now_ms` is a monotonic timestamp used for energy
    /// integration and the persistence schedule.
    pub fn update(&mut self, now_ms: u64) {
        let State::Ready(driver) = &mut self.state else {
            return;
        };
        let offsets = self.calibration.offsets();

        match driver.get_voltage() {
            Ok(voltage) => publish(&self.voltage_sensor, f64::from(voltage)),
            Err(err) => warn!("Voltage read failed: {err}"),
        }

        if let Ok(current) = driver.get_current(Channel::A) {
            publish(&self.current_sensor_1, f64::from(current) + offsets.current_a);
        }

        let current_b = driver
            .get_current(Channel::B)
            .map(|current| f64::from(current) + offsets.current_b);
        if let Ok(current) = current_b {
            publish(&self.current_sensor_2, current);
        }

        if let Ok(power) = driver.get_active_power(Channel::A) {
            let power = f64::from(power) + offsets.power_a;
            publish(&self.power_sensor_1, power);

            match self.energy.record(power, now_ms) {
                Some(Flow::Received) => publish(
                    &self.energy_received_sensor,
                    self.energy.totals().received_wh / 1000.0,
                ),
                Some(Flow::Exported) => publish(
                    &self.energy_exported_sensor,
                    self.energy.totals().exported_wh / 1000.0,
                ),
                None => {}
            }
        }

        let power_b = driver
            .get_active_power(Channel::B)
            .map(|power| f64::from(power) + offsets.power_b);
        if let Ok(power) = power_b {
            publish(&self.power_sensor_2, power);
        }

        if let (Ok(current), Ok(power)) = (current_b, power_b) {
            self.calibration.record(current, power);
        }

        if let Some(store) = self.energy_store.as_deref_mut() {
            self.energy.persist(store, now_ms);
        }
    }

    pub fn dump_config(&self) {
        info!("CSE7761 '{}':", self.id);
        if self.is_failed() {
            error!("Communication with CSE7761 failed!");
        }
        info!("  Update Interval: {}", self.update_interval);
        for (name, sensor) in [
            ("Voltage", &self.voltage_sensor),
            ("Current 1", &self.current_sensor_1),
            ("Current 2", &self.current_sensor_2),
            ("Active Power 1", &self.power_sensor_1),
            ("Active Power 2", &self.power_sensor_2),
            ("Energy Received", &self.energy_received_sensor),
            ("Energy Exported", &self.energy_exported_sensor),
        ] {
            if sensor.is_some() {
                info!("  {name} sensor configured");
            }
        }
        if let Some(settings) = self.uart_settings {
            if settings != UartSettings::CSE7761 {
                warn!(
                    "  UART settings {settings} do not match the required {}",
                    UartSettings::CSE7761
                );
            }
        }
    }

    /// Read `size` raw bytes of a register given as a number string (`0x24`, `36`, `044`) and
    /// publish them to the debug text sensors.
    ///
    /// Errors are published to the debug text sensors as well.
    pub fn read_register_service(
        &mut self,
        register: &str,
        size: i32,
    ) -> Result<Vec<u8>, ServiceError> {
        debug!("Service called: read register {register} ({size} bytes)");
        let result = self.read_register(register, size);
        match &result {
            Ok((address, bytes)) => {
                let hex = raw::format_hex(bytes);
                let bin = raw::format_bin(bytes);
                info!("Register {address:#04X}: {hex}= {bin}");
                self.publish_debug(&hex, &bin);
            }
            Err(err) => {
                error!("Reading register '{register}' failed: {err}");
                let message = format!("Error: {err}");
                self.publish_debug(&message, &message);
            }
        }
        result.map(|(_, bytes)| bytes)
    }

    /// Write a 16 bit value to a protected register, both given as number strings.
    ///
    /// The register is written with the write flag set, between write enable and write close
    /// commands. A zero value sends a bare request the chip treats as a read.
    pub fn write_register_service(&mut self, register: &str, value: &str) -> Result<(), ServiceError> {
        debug!("Service called: write register {register} with value {value}");
        match self.write_register(register, value) {
            Ok((address, value)) => {
                let message = format!("OK: wrote {value:#06X} to register {address:#04X}");
                info!("{message}");
                self.publish_debug(&message, &message);
                Ok(())
            }
            Err(err) => {
                error!("Writing register '{register}' failed: {err}");
                let message = format!("Error: {err}");
                self.publish_debug(&message, &message);
                Err(err)
            }
        }
    }

    fn read_register(&mut self, register: &str, size: i32) -> Result<(u8, Vec<u8>), ServiceError> {
        let address = raw::parse_bounded(register, 0xFF).map_err(ServiceError::Register)? as u8;
        let size = usize::try_from(size)
            .ok()
            .filter(|size| (1..=MAX_PAYLOAD).contains(size))
            .ok_or(ServiceError::Size(size))?;
        let State::Ready(driver) = &mut self.state else {
            return Err(ServiceError::NotReady);
        };

        let mut bytes = vec![0u8; size];
        driver
            .read_raw(address, &mut bytes)
            .map_err(|err| ServiceError::Driver(err.to_string()))?;
        Ok((address, bytes))
    }

    fn write_register(&mut self, register: &str, value: &str) -> Result<(u8, u16), ServiceError> {
        let address = raw::parse_bounded(register, 0xFF).map_err(ServiceError::Register)? as u8;
        let value = raw::parse_bounded(value, 0xFFFF).map_err(ServiceError::Value)? as u16;
        let State::Ready(driver) = &mut self.state else {
            return Err(ServiceError::NotReady);
        };

        driver
            .write_register(address, value)
            .map_err(|err| ServiceError::Driver(err.to_string()))?;
        Ok((address, value))
    }
}
