//! Output drivers
//!
//! An output module turns abstract on/off/dispense requests into hardware
//! writes. Each module publishes an [`OutputInformation`] record the UI
//! uses to render its options; switching and state queries go through
//! [`OutputModule`].

pub mod grove_motor;

use serde::Serialize;
use tracing::info;

use crate::models::errors::AppResult;

pub use grove_motor::{GpioBridge, GroveI2cBridge, GroveMotorOutput, MotorBridge, MotorChannelOptions};

// ============================================
// Information records
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Volume,
    OnOff,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurementSpec {
    pub channel: u32,
    pub measurement: &'static str,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSpec {
    pub channel: u32,
    pub name: &'static str,
    pub types: &'static [OutputType],
    /// Measurement channels this output channel records into
    pub measurements: &'static [u32],
}

/// Check applied to a numeric option before it is saved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Positive,
    PositiveOrZero,
    Percent,
}

impl Constraint {
    pub fn check(&self, value: f64) -> Result<(), String> {
        let passed = match self {
            Constraint::Positive => value > 0.0,
            Constraint::PositiveOrZero => value >= 0.0,
            Constraint::Percent => (0.0..=100.0).contains(&value),
        };
        if passed {
            Ok(())
        } else if *self == Constraint::Percent {
            Err("Must be a value between 0 and 100".to_string())
        } else {
            Err("Must be a positive value".to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Text(&'static str),
    Integer(i64),
    Float(f64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "options_select", rename_all = "snake_case")]
pub enum OptionKind {
    Text,
    Integer,
    Float,
    Select(&'static [(i64, &'static str)]),
}

/// A per-channel option the user can set
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOption {
    pub id: &'static str,
    #[serde(flatten)]
    pub kind: OptionKind,
    pub default_value: OptionValue,
    pub constraint: Option<Constraint>,
    pub name: &'static str,
    pub phrase: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputInformation {
    pub output_name_unique: &'static str,
    pub output_name: &'static str,
    pub output_library: &'static str,
    pub measurements: &'static [MeasurementSpec],
    pub channels: &'static [ChannelSpec],
    pub output_types: &'static [OutputType],
    pub message: &'static str,
    pub interfaces: &'static [&'static str],
    pub i2c_location: &'static [&'static str],
    pub i2c_address_default: &'static str,
    pub custom_channel_options: &'static [ChannelOption],
}

/// Every output module compiled in
pub fn output_catalogue() -> Vec<&'static OutputInformation> {
    vec![&grove_motor::OUTPUT_INFORMATION]
}

// ============================================
// Switching
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

/// What the amount of an `on` request measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountKind {
    /// Millilitres to dispense
    Vol,
    /// Seconds to run
    Sec,
}

pub trait OutputModule: Send + Sync {
    fn information(&self) -> &'static OutputInformation;

    /// Prepare every channel whose backend is available
    fn setup_output(&self);

    fn output_switch(
        &self,
        state: SwitchState,
        output_type: Option<AmountKind>,
        amount: Option<f64>,
        channel: usize,
    ) -> AppResult<()>;

    /// `None` when the channel is not set up
    fn is_on(&self, channel: usize) -> Option<bool>;

    /// A specific channel, or any channel when `None`
    fn is_setup(&self, channel: Option<usize>) -> bool;

    fn stop_output(&self);
}

// ============================================
// Measurement recording
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementValue {
    pub channel: u32,
    pub measurement: &'static str,
    pub unit: &'static str,
    pub value: f64,
}

/// Where outputs record what they did
pub trait MeasurementSink: Send + Sync {
    fn record(&self, device_id: &str, values: &[MeasurementValue]);
}

/// Sink writing measurements to the log
#[derive(Debug, Default)]
pub struct TracingSink;

impl MeasurementSink for TracingSink {
    fn record(&self, device_id: &str, values: &[MeasurementValue]) {
        for v in values {
            info!(
                device_id,
                channel = v.channel,
                measurement = v.measurement,
                unit = v.unit,
                value = v.value,
                "Measurement"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints() {
        assert!(Constraint::Positive.check(0.1).is_ok());
        assert!(Constraint::Positive.check(0.0).is_err());
        assert!(Constraint::PositiveOrZero.check(0.0).is_ok());
        assert!(Constraint::PositiveOrZero.check(-1.0).is_err());
        assert!(Constraint::Percent.check(100.0).is_ok());
        assert!(Constraint::Percent.check(101.0).is_err());
        assert!(Constraint::Percent.check(-1.0).is_err());
    }

    #[test]
    fn test_catalogue_serializes() {
        let json = serde_json::to_value(output_catalogue()).unwrap();
        assert_eq!(json[0]["output_name_unique"], "GROVE_I2C_MOTOR");
        assert_eq!(json[0]["output_types"], serde_json::json!(["volume", "on_off"]));
        let speed = &json[0]["custom_channel_options"][1];
        assert_eq!(speed["id"], "motor_speed");
        assert_eq!(speed["type"], "integer");
        assert_eq!(speed["default_value"], 50);
        assert_eq!(speed["constraint"], "percent");
    }
}
