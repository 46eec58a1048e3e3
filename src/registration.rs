//! Wiring a validated configuration into a component.
//!
//! [`plan`] lists the setter calls a configuration asks for, one per configured key and none for
//! absent keys. [`apply`] performs them against anything implementing [`Cse7761Setters`], creating
//! sensors through a [`SensorFactory`] and looking up the externally declared debug text sensors in
//! an [`EntityRegistry`].

use std::fmt;
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::config::{Cse7761Config, ResolvedSensor};
use crate::sensor::{DebugKey, Sensor, SensorKey, TextSensor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("text sensor '{id}' referenced by '{key}' is not registered")]
    UnknownTextSensor { key: DebugKey, id: String },
}

/// What a setter call binds
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A sensor created from its configuration
    Sensor(ResolvedSensor),
    /// A text sensor declared elsewhere, by ID
    TextSensor { key: DebugKey, id: String },
}

/// One setter invocation on the component
#[derive(Debug, Clone, PartialEq)]
pub struct SetterCall {
    pub setter: &'static str,
    pub binding: Binding,
}

impl fmt::Display for SetterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Binding::Sensor(sensor) => write!(f, "{}({})", self.setter, sensor.id),
            Binding::TextSensor { id, .. } => write!(f, "{}({id})", self.setter),
        }
    }
}

/// Setters a configuration may call
pub trait Cse7761Setters {
    fn set_voltage_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_current_1_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_current_2_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_active_power_1_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_active_power_2_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_energy_received_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_energy_exported_sensor(&mut self, sensor: Rc<dyn Sensor>);
    fn set_debug_text_sensor_hex(&mut self, sensor: Rc<dyn TextSensor>);
    fn set_debug_text_sensor_bin(&mut self, sensor: Rc<dyn TextSensor>);

    fn set_sensor(&mut self, key: SensorKey, sensor: Rc<dyn Sensor>) {
        match key {
            SensorKey::Voltage => self.set_voltage_sensor(sensor),
            SensorKey::Current1 => self.set_current_1_sensor(sensor),
            SensorKey::Current2 => self.set_current_2_sensor(sensor),
            SensorKey::ActivePower1 => self.set_active_power_1_sensor(sensor),
            SensorKey::ActivePower2 => self.set_active_power_2_sensor(sensor),
            SensorKey::EnergyReceived => self.set_energy_received_sensor(sensor),
            SensorKey::EnergyExported => self.set_energy_exported_sensor(sensor),
        }
    }

    fn set_debug_text_sensor(&mut self, key: DebugKey, sensor: Rc<dyn TextSensor>) {
        match key {
            DebugKey::Hex => self.set_debug_text_sensor_hex(sensor),
            DebugKey::Bin => self.set_debug_text_sensor_bin(sensor),
        }
    }
}

/// Creates the host's sensor entities
pub trait SensorFactory {
    fn new_sensor(&mut self, config: &ResolvedSensor) -> Rc<dyn Sensor>;
}

/// Entities already declared by the host, looked up by ID
pub trait EntityRegistry {
    fn text_sensor(&self, id: &str) -> Option<Rc<dyn TextSensor>>;
}

/// Setter calls requested by `config`: sensors first, then the debug text sensors.
pub fn plan(config: &Cse7761Config) -> Vec<SetterCall> {
    let sensors = config.sensors().into_iter().map(|sensor| SetterCall {
        setter: sensor.key.setter(),
        binding: Binding::Sensor(sensor),
    });
    let debug_sensors = DebugKey::ALL.into_iter().filter_map(|key| {
        config.debug_sensor(key).map(|id| SetterCall {
            setter: key.setter(),
            binding: Binding::TextSensor {
                key,
                id: id.to_string(),
            },
        })
    });
    sensors.chain(debug_sensors).collect()
}

/// Perform `calls` on `target`.
///
/// Every text sensor is resolved before the first setter runs, so a failed registration leaves
/// `target` untouched.
pub fn apply<T>(
    calls: &[SetterCall],
    target: &mut T,
    factory: &mut dyn SensorFactory,
    registry: &dyn EntityRegistry,
) -> Result<(), RegistrationError>
where
    T: Cse7761Setters + ?Sized,
{
    let mut text_sensors = Vec::new();
    for call in calls {
        if let Binding::TextSensor { key, id } = &call.binding {
            let sensor = registry
                .text_sensor(id)
                .ok_or_else(|| RegistrationError::UnknownTextSensor {
                    key: *key,
                    id: id.clone(),
                })?;
            text_sensors.push((call, *key, sensor));
        }
    }

    for call in calls {
        if let Binding::Sensor(config) = &call.binding {
            debug!("{call}");
            target.set_sensor(config.key, factory.new_sensor(config));
        }
    }
    for (call, key, sensor) in text_sensors {
        debug!("{call}");
        target.set_debug_text_sensor(key, sensor);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct NullSensor;

    impl Sensor for NullSensor {
        fn publish_state(&self, _value: f32) {}
    }

    impl TextSensor for NullSensor {
        fn publish_state(&self, _value: &str) {}
    }

    #[derive(Default)]
    struct Factory {
        created: Vec<String>,
    }

    impl SensorFactory for Factory {
        fn new_sensor(&mut self, config: &ResolvedSensor) -> Rc<dyn Sensor> {
            self.created.push(config.id.clone());
            Rc::new(NullSensor)
        }
    }

    struct Registry(Vec<&'static str>);

    impl EntityRegistry for Registry {
        fn text_sensor(&self, id: &str) -> Option<Rc<dyn TextSensor>> {
            self.0
                .iter()
                .any(|known| *known == id)
                .then(|| Rc::new(NullSensor) as Rc<dyn TextSensor>)
        }
    }

    /// Counts how often each setter is called
    #[derive(Default)]
    struct Recorder {
        calls: HashMap<&'static str, usize>,
    }

    impl Recorder {
        fn hit(&mut self, setter: &'static str) {
            *self.calls.entry(setter).or_default() += 1;
        }
    }

    impl Cse7761Setters for Recorder {
        fn set_voltage_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_voltage_sensor");
        }
        fn set_current_1_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_current_1_sensor");
        }
        fn set_current_2_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_current_2_sensor");
        }
        fn set_active_power_1_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_active_power_1_sensor");
        }
        fn set_active_power_2_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_active_power_2_sensor");
        }
        fn set_energy_received_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_energy_received_sensor");
        }
        fn set_energy_exported_sensor(&mut self, _: Rc<dyn Sensor>) {
            self.hit("set_energy_exported_sensor");
        }
        fn set_debug_text_sensor_hex(&mut self, _: Rc<dyn TextSensor>) {
            self.hit("set_debug_text_sensor_hex");
        }
        fn set_debug_text_sensor_bin(&mut self, _: Rc<dyn TextSensor>) {
            self.hit("set_debug_text_sensor_bin");
        }
    }

    fn config(yaml: &str) -> Cse7761Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn run(config: &Cse7761Config) -> (Recorder, Factory) {
        let mut recorder = Recorder::default();
        let mut factory = Factory::default();
        let registry = Registry(vec!["dbg_hex", "dbg_bin"]);
        apply(&plan(config), &mut recorder, &mut factory, &registry).unwrap();
        (recorder, factory)
    }

    #[test]
    fn empty_config_calls_nothing() {
        let (recorder, factory) = run(&config("{}"));
        assert!(recorder.calls.is_empty());
        assert!(factory.created.is_empty());
    }

    #[test]
    fn each_present_key_calls_its_setter_once() {
        let full = config(
            r#"
voltage: {}
current_1: {}
current_2: {}
active_power_1: {}
active_power_2: {}
energy_received: {}
energy_exported: {}
debug_sensor_hex_id: dbg_hex
debug_sensor_bin_id: dbg_bin
"#,
        );
        let (recorder, factory) = run(&full);

        for key in SensorKey::ALL {
            assert_eq!(recorder.calls.get(key.setter()), Some(&1), "{key}");
        }
        for key in DebugKey::ALL {
            assert_eq!(recorder.calls.get(key.setter()), Some(&1), "{key}");
        }
        assert_eq!(factory.created.len(), SensorKey::ALL.len());
    }

    #[test]
    fn absent_keys_call_nothing() {
        let (recorder, _) = run(&config("current_2:\ndebug_sensor_bin_id: dbg_bin\n"));
        assert_eq!(recorder.calls.len(), 2);
        assert_eq!(recorder.calls.get("set_current_2_sensor"), Some(&1));
        assert_eq!(recorder.calls.get("set_debug_text_sensor_bin"), Some(&1));
        assert_eq!(recorder.calls.get("set_voltage_sensor"), None);
        assert_eq!(recorder.calls.get("set_debug_text_sensor_hex"), None);
    }

    #[test]
    fn plan_orders_and_names_calls() {
        let calls = plan(&config(
            "id: meter\ndebug_sensor_hex_id: dbg_hex\nactive_power_1: {}\nvoltage: {}\n",
        ));
        let rendered: Vec<String> = calls.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "set_voltage_sensor(meter_voltage)",
                "set_active_power_1_sensor(meter_active_power_1)",
                "set_debug_text_sensor_hex(dbg_hex)",
            ]
        );
    }

    #[test]
    fn text_sensor_calls_name_the_bound_id() {
        let calls = plan(&config("debug_sensor_bin_id: dbg_bin\n"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to_string(), "set_debug_text_sensor_bin(dbg_bin)");
        assert!(!calls[0].to_string().contains(DebugKey::Bin.key()));
    }

    #[test]
    fn unknown_text_sensor_leaves_target_untouched() {
        let mut recorder = Recorder::default();
        let mut factory = Factory::default();
        let calls = plan(&config("voltage: {}\ndebug_sensor_hex_id: other\n"));

        let err = apply(&calls, &mut recorder, &mut factory, &Registry(vec![])).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::UnknownTextSensor {
                key: DebugKey::Hex,
                id: "other".to_string()
            }
        );
        assert!(recorder.calls.is_empty());
    }
}
