//! Catalogue of Function kinds
//!
//! Built-in kinds (conditional, PID, triggers, spacer, action list) are
//! fixed. Custom controllers are described by JSON descriptors loaded at
//! startup; each declares its default options, measurements, channels and
//! the dependencies it needs installed.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::models::errors::AppResult;
use crate::models::types::ActionType;

/// Built-in Function types and their display names
pub const BUILTIN_FUNCTIONS: &[(&str, &str)] = &[
    ("conditional_conditional", "Conditional: Conditional Statement"),
    ("pid_pid", "PID Controller"),
    ("trigger_edge", "Trigger: Edge"),
    ("trigger_output", "Trigger: Output (On/Off)"),
    ("trigger_output_pwm", "Trigger: Output (PWM)"),
    ("trigger_timer_daily_time_point", "Trigger: Timer (Daily Point)"),
    ("trigger_timer_daily_time_span", "Trigger: Timer (Daily Span)"),
    ("trigger_timer_duration", "Trigger: Timer (Duration)"),
    ("trigger_run_pwm_method", "Trigger: Run PWM Method"),
    ("trigger_sunrise_sunset", "Trigger: Sunrise/Sunset"),
    ("function_spacer", "Spacer"),
    ("function_actions", "Execute Actions"),
];

/// Measurement channels every PID controller records
pub struct PidMeasurement {
    pub channel: u32,
    pub name: &'static str,
    pub measurement: &'static str,
    pub unit: &'static str,
    pub measurement_type: Option<&'static str>,
}

pub const PID_MEASUREMENTS: &[PidMeasurement] = &[
    PidMeasurement { channel: 0, name: "Setpoint", measurement: "", unit: "", measurement_type: Some("setpoint") },
    PidMeasurement { channel: 1, name: "Setpoint (Band Min)", measurement: "", unit: "", measurement_type: Some("setpoint") },
    PidMeasurement { channel: 2, name: "Setpoint (Band Max)", measurement: "", unit: "", measurement_type: Some("setpoint") },
    PidMeasurement { channel: 3, name: "P-value", measurement: "pid_p_value", unit: "pid_value", measurement_type: None },
    PidMeasurement { channel: 4, name: "I-value", measurement: "pid_i_value", unit: "pid_value", measurement_type: None },
    PidMeasurement { channel: 5, name: "D-value", measurement: "pid_d_value", unit: "pid_value", measurement_type: None },
    PidMeasurement { channel: 6, name: "Output (Duration)", measurement: "duration_time", unit: "s", measurement_type: None },
    PidMeasurement { channel: 7, name: "Output (Duty Cycle)", measurement: "duty_cycle", unit: "percent", measurement_type: None },
    PidMeasurement { channel: 8, name: "Output (Volume)", measurement: "volume", unit: "ml", measurement_type: None },
];

/// Statement a new Conditional starts with
pub const CONDITIONAL_TEMPLATE: &str = r#"
# Read a Condition and act on it. Replace the IDs in braces with your own.

measurement = self.condition("{asdf1234}")
self.logger.info("Condition value: {}".format(measurement))

if measurement is not None:
    if measurement < 23:
        self.message += "Measurement too low: {}\n".format(measurement)
        self.run_all_actions(message=self.message)
    elif measurement > 27:
        self.message += "Measurement too high: {}\n".format(measurement)
        self.run_action("{qwer5678}", message=self.message)"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    /// Installer family, e.g. `pip-pypi` or `apt`
    pub kind: String,
    /// Identifier checked against the installed set
    pub name: String,
    #[serde(default)]
    pub install: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionDefault {
    pub id: String,
    #[serde(default)]
    pub default_value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementDefault {
    pub channel: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub measurement: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDefault {
    pub channel: u32,
    #[serde(default)]
    pub custom_options: Vec<OptionDefault>,
}

/// Descriptor of a custom controller module
#[derive(Debug, Clone, Deserialize)]
pub struct CustomController {
    pub device: String,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub custom_options: Vec<OptionDefault>,
    #[serde(default)]
    pub measurements: Vec<MeasurementDefault>,
    #[serde(default)]
    pub measurements_variable_amount: bool,
    #[serde(default)]
    pub channels: Vec<ChannelDefault>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl CustomController {
    /// Default options as a JSON object keyed by option id
    pub fn default_options(&self) -> serde_json::Value {
        options_object(&self.custom_options)
    }
}

/// JSON object of option defaults
pub fn options_object(options: &[OptionDefault]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = options
        .iter()
        .map(|o| (o.id.clone(), o.default_value.clone()))
        .collect();
    serde_json::Value::Object(map)
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    custom: BTreeMap<String, CustomController>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_controller(mut self, controller: CustomController) -> Self {
        self.custom.insert(controller.device.clone(), controller);
        self
    }

    /// Load every `*.json` descriptor in `dir`; unreadable files are skipped
    pub fn load_dir(dir: &Path) -> AppResult<Self> {
        let mut registry = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    serde_json::from_slice::<CustomController>(&raw).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(controller) => {
                    info!(device = %controller.device, "Custom controller registered");
                    registry = registry.with_controller(controller);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping controller descriptor"),
            }
        }
        Ok(registry)
    }

    pub fn builtin_name(function_type: &str) -> Option<&'static str> {
        BUILTIN_FUNCTIONS
            .iter()
            .find(|(t, _)| *t == function_type)
            .map(|(_, name)| *name)
    }

    pub fn custom(&self, device: &str) -> Option<&CustomController> {
        self.custom.get(device)
    }

    pub fn custom_devices(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    /// Dependency names of a Function type or Action type not in `installed`
    pub fn unmet_dependencies(&self, device: &str, installed: &HashSet<String>) -> Vec<String> {
        let declared: Vec<&str> = match self.custom.get(device) {
            Some(controller) => controller.dependencies.iter().map(|d| d.name.as_str()).collect(),
            None => action_dependencies(device).to_vec(),
        };
        declared
            .into_iter()
            .filter(|name| !installed.contains(*name))
            .map(str::to_string)
            .collect()
    }
}

/// Libraries an Action type needs at runtime
fn action_dependencies(action_type: &str) -> &'static [&'static str] {
    match action_type.parse::<ActionType>() {
        Ok(ActionType::MqttPublish) => &["paho-mqtt"],
        Ok(ActionType::Video | ActionType::VideoEmail) => &["ffmpeg"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CustomController {
        serde_json::from_value(serde_json::json!({
            "device": "fan_curve",
            "function_name": "Fan Curve",
            "custom_options": [{ "id": "period", "default_value": 30 }],
            "measurements": [{ "channel": 0, "name": "Speed", "measurement": "duty_cycle", "unit": "percent" }],
            "channels": [{ "channel": 0, "custom_options": [{ "id": "name", "default_value": "" }] }],
            "dependencies": [{ "kind": "pip-pypi", "name": "numpy" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(FunctionRegistry::builtin_name("pid_pid"), Some("PID Controller"));
        assert_eq!(FunctionRegistry::builtin_name("trigger_edge"), Some("Trigger: Edge"));
        assert_eq!(FunctionRegistry::builtin_name("nope"), None);
    }

    #[test]
    fn test_default_options() {
        let controller = sample();
        assert_eq!(controller.default_options(), serde_json::json!({ "period": 30 }));
    }

    #[test]
    fn test_unmet_dependencies() {
        let registry = FunctionRegistry::new().with_controller(sample());
        let mut installed = HashSet::new();
        assert_eq!(registry.unmet_dependencies("fan_curve", &installed), vec!["numpy"]);
        installed.insert("numpy".to_string());
        assert!(registry.unmet_dependencies("fan_curve", &installed).is_empty());
        assert_eq!(registry.unmet_dependencies("mqtt_publish", &installed), vec!["paho-mqtt"]);
        assert!(registry.unmet_dependencies("email", &installed).is_empty());
    }

    #[test]
    fn test_load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            serde_json::json!({ "device": "good_one" }).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = FunctionRegistry::load_dir(dir.path()).unwrap();
        let devices: Vec<_> = registry.custom_devices().collect();
        assert_eq!(devices, vec!["good_one"]);
    }

    #[test]
    fn test_pid_measurement_channels_are_unique() {
        let mut channels: Vec<u32> = PID_MEASUREMENTS.iter().map(|m| m.channel).collect();
        channels.dedup();
        assert_eq!(channels.len(), PID_MEASUREMENTS.len());
    }
}
