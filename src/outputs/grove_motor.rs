//! Two-channel DC motor output
//!
//! Drives a Grove I2C motor driver (or a plain GPIO H-bridge) whose motors
//! usually turn peristaltic pumps. With a flow rate set, a channel can
//! dispense a volume: the motor runs for `amount / flow_rate * 60` seconds
//! on a background thread, then the run time and volume are recorded.

use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use embedded_hal::pwm::SetDutyCycle;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::{
    AmountKind, ChannelOption, ChannelSpec, Constraint, MeasurementSink, MeasurementSpec,
    MeasurementValue, OptionKind, OptionValue, OutputInformation, OutputModule, OutputType,
    SwitchState,
};
use crate::models::errors::{AppError, AppResult, ErrorCode};

pub const CHANNEL_COUNT: usize = 2;

/// Interval the dispense loop checks for cancellation
const DISPENSE_POLL: Duration = Duration::from_millis(10);

pub static OUTPUT_INFORMATION: OutputInformation = OutputInformation {
    output_name_unique: "GROVE_I2C_MOTOR",
    output_name: "DC Motor Controller: I2C_MOTOR",
    output_library: "embedded-hal",
    measurements: &[
        MeasurementSpec { channel: 0, measurement: "duration_time", unit: "s" },
        MeasurementSpec { channel: 1, measurement: "volume", unit: "ml" },
        MeasurementSpec { channel: 2, measurement: "duration_time", unit: "s" },
        MeasurementSpec { channel: 3, measurement: "volume", unit: "ml" },
    ],
    channels: &[
        ChannelSpec {
            channel: 0,
            name: "Motor A",
            types: &[OutputType::Volume, OutputType::OnOff],
            measurements: &[0, 1],
        },
        ChannelSpec {
            channel: 1,
            name: "Motor B",
            types: &[OutputType::Volume, OutputType::OnOff],
            measurements: &[2, 3],
        },
    ],
    output_types: &[OutputType::Volume, OutputType::OnOff],
    message: "The Grove I2C motor controller can control 2 DC motors. If these motors control \
              peristaltic pumps, set the Flow Rate and the output can be instructed to dispense \
              volumes in addition to being turned on for durations.",
    interfaces: &["I2C"],
    i2c_location: &["0x28"],
    i2c_address_default: "0x28",
    custom_channel_options: &[
        ChannelOption {
            id: "name",
            kind: OptionKind::Text,
            default_value: OptionValue::Text(""),
            constraint: None,
            name: "Name",
            phrase: "A name for this motor",
        },
        ChannelOption {
            id: "motor_speed",
            kind: OptionKind::Integer,
            default_value: OptionValue::Integer(50),
            constraint: Some(Constraint::Percent),
            name: "Speed",
            phrase: "The speed of the motor (value, 0 - 100%)",
        },
        ChannelOption {
            id: "direction",
            kind: OptionKind::Select(&[(1, "Forward"), (0, "Backward")]),
            default_value: OptionValue::Integer(1),
            constraint: None,
            name: "Direction",
            phrase: "The direction to turn the motor",
        },
        ChannelOption {
            id: "flow_rate_ml_min",
            kind: OptionKind::Float,
            default_value: OptionValue::Float(150.0),
            constraint: Some(Constraint::Positive),
            name: "Volume Rate (ml/min)",
            phrase: "If a pump, the measured flow rate (ml/min) at the set Duty Cycle",
        },
    ],
};

// ============================================
// Channel options
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct MotorChannelOptions {
    pub name: String,
    /// Percent of full speed
    pub motor_speed: u8,
    pub forward: bool,
    pub flow_rate_ml_min: f64,
}

impl Default for MotorChannelOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            motor_speed: 50,
            forward: true,
            flow_rate_ml_min: 150.0,
        }
    }
}

impl MotorChannelOptions {
    /// Read saved channel options, applying defaults and constraints
    pub fn from_json(options: &Value) -> Result<Self, Vec<String>> {
        let defaults = Self::default();
        let mut errors = Vec::new();

        let number = |id: &str, default: f64| options.get(id).and_then(Value::as_f64).unwrap_or(default);

        let motor_speed = number("motor_speed", f64::from(defaults.motor_speed));
        if let Err(e) = Constraint::Percent.check(motor_speed) {
            errors.push(format!("Speed: {}", e));
        }
        let flow_rate_ml_min = number("flow_rate_ml_min", defaults.flow_rate_ml_min);
        if let Err(e) = Constraint::Positive.check(flow_rate_ml_min) {
            errors.push(format!("Volume Rate (ml/min): {}", e));
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self {
            name: options
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            motor_speed: motor_speed.round() as u8,
            forward: number("direction", 1.0) != 0.0,
            flow_rate_ml_min,
        })
    }
}

// ============================================
// Backends
// ============================================

/// Hardware that actually turns the motors
pub trait MotorBridge: Send + 'static {
    /// Whether the backend is wired for `channel`
    fn available(&self, channel: usize) -> bool;

    fn set_speed(&mut self, channel: usize, percent: u8) -> Result<(), String>;

    fn run(&mut self, channel: usize, forward: bool) -> Result<(), String>;

    fn stop(&mut self, channel: usize) -> Result<(), String>;
}

/// One H-bridge channel: two direction pins and a PWM enable line
pub struct HBridge<P, E> {
    pub pin_1: P,
    pub pin_2: P,
    pub enable: E,
}

/// Motors on plain GPIO H-bridges
pub struct GpioBridge<P, E> {
    channels: [Option<HBridge<P, E>>; CHANNEL_COUNT],
}

impl<P, E> GpioBridge<P, E>
where
    P: OutputPin,
    E: SetDutyCycle,
{
    pub fn new(motor_a: Option<HBridge<P, E>>, motor_b: Option<HBridge<P, E>>) -> Self {
        Self {
            channels: [motor_a, motor_b],
        }
    }

    fn channel(&mut self, channel: usize) -> Result<&mut HBridge<P, E>, String> {
        self.channels
            .get_mut(channel)
            .and_then(Option::as_mut)
            .ok_or_else(|| format!("No H-bridge wired for channel {}", channel))
    }
}

fn pin_error(e: impl embedded_hal::digital::Error) -> String {
    format!("GPIO error: {:?}", e.kind())
}

impl<P, E> MotorBridge for GpioBridge<P, E>
where
    P: OutputPin + Send + 'static,
    E: SetDutyCycle + Send + 'static,
{
    fn available(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(Option::is_some)
    }

    fn set_speed(&mut self, channel: usize, percent: u8) -> Result<(), String> {
        self.channel(channel)?
            .enable
            .set_duty_cycle_percent(percent.min(100))
            .map_err(|e| format!("PWM error: {:?}", embedded_hal::pwm::Error::kind(&e)))
    }

    fn run(&mut self, channel: usize, forward: bool) -> Result<(), String> {
        let bridge = self.channel(channel)?;
        if forward {
            bridge.pin_1.set_high().map_err(pin_error)?;
            bridge.pin_2.set_low().map_err(pin_error)
        } else {
            bridge.pin_1.set_low().map_err(pin_error)?;
            bridge.pin_2.set_high().map_err(pin_error)
        }
    }

    fn stop(&mut self, channel: usize) -> Result<(), String> {
        let bridge = self.channel(channel)?;
        bridge.pin_1.set_low().map_err(pin_error)?;
        bridge.pin_2.set_low().map_err(pin_error)
    }
}

/// Grove I2C motor driver registers
pub mod registers {
    pub const SET_PWM_AB: u8 = 0x82;
    pub const SET_FREQ: u8 = 0x84;
    pub const CHANGE_ADDRESS: u8 = 0x83;
    pub const CHANNEL_SET: u8 = 0xaa;
    pub const MOTOR1_SPEED: u8 = 0xa1;
    pub const MOTOR2_SPEED: u8 = 0xa5;

    /// Trailing byte every command carries
    pub const NOTHING: u8 = 0x01;

    /// PWM prescaler giving ~3.9 kHz
    pub const FREQ_3921HZ: u8 = 0x02;

    pub const DEFAULT_ADDRESS: u8 = 0x28;
}

/// Direction bits of each motor in the CHANNEL_SET byte
const DIRECTION_BITS: [(u8, u8); CHANNEL_COUNT] = [(0b0010, 0b0001), (0b1000, 0b0100)];

/// Motors on a Grove I2C motor driver
pub struct GroveI2cBridge<I> {
    i2c: I,
    address: u8,
    speeds: [u8; CHANNEL_COUNT],
    direction: u8,
    frequency_set: bool,
}

impl<I: I2c> GroveI2cBridge<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            speeds: [0; CHANNEL_COUNT],
            direction: 0,
            frequency_set: false,
        }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn write(&mut self, bytes: [u8; 3]) -> Result<(), String> {
        self.i2c
            .write(self.address, &bytes)
            .map_err(|e| format!("I2C error at 0x{:02x}: {:?}", self.address, embedded_hal::i2c::Error::kind(&e)))
    }

    fn write_direction(&mut self) -> Result<(), String> {
        self.write([registers::CHANNEL_SET, self.direction, registers::NOTHING])
    }
}

impl<I: I2c + Send + 'static> MotorBridge for GroveI2cBridge<I> {
    fn available(&self, channel: usize) -> bool {
        channel < CHANNEL_COUNT
    }

    fn set_speed(&mut self, channel: usize, percent: u8) -> Result<(), String> {
        if !self.frequency_set {
            self.write([registers::SET_FREQ, registers::FREQ_3921HZ, registers::NOTHING])?;
            self.frequency_set = true;
        }
        let Some(speed) = self.speeds.get_mut(channel) else {
            return Err(format!("Invalid channel {}", channel));
        };
        *speed = (u16::from(percent.min(100)) * 255 / 100) as u8;
        let [a, b] = self.speeds;
        self.write([registers::SET_PWM_AB, a, b])
    }

    fn run(&mut self, channel: usize, forward: bool) -> Result<(), String> {
        let (fwd, back) = DIRECTION_BITS
            .get(channel)
            .copied()
            .ok_or_else(|| format!("Invalid channel {}", channel))?;
        self.direction &= !(fwd | back);
        self.direction |= if forward { fwd } else { back };
        self.write_direction()
    }

    fn stop(&mut self, channel: usize) -> Result<(), String> {
        let (fwd, back) = DIRECTION_BITS
            .get(channel)
            .copied()
            .ok_or_else(|| format!("Invalid channel {}", channel))?;
        self.direction &= !(fwd | back);
        self.write_direction()
    }
}

// ============================================
// Output module
// ============================================

#[derive(Debug, Clone, Copy, Default)]
struct ChannelStatus {
    setup: bool,
    on: bool,
}

struct Shared<B> {
    unique_id: String,
    bridge: Mutex<B>,
    options: [MotorChannelOptions; CHANNEL_COUNT],
    status: Mutex<[ChannelStatus; CHANNEL_COUNT]>,
    /// Bumped by every command; a dispense only runs while its number is current
    generation: [AtomicU64; CHANNEL_COUNT],
    sink: Arc<dyn MeasurementSink>,
}

impl<B: MotorBridge> Shared<B> {
    fn run(&self, channel: usize) -> Result<(), String> {
        let forward = self.options[channel].forward;
        self.bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .run(channel, forward)?;
        self.set_on(channel, true);
        Ok(())
    }

    fn stop(&self, channel: usize) -> Result<(), String> {
        self.bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop(channel)?;
        self.set_on(channel, false);
        Ok(())
    }

    fn set_on(&self, channel: usize, on: bool) {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)[channel].on = on;
    }

    fn status(&self, channel: usize) -> Option<ChannelStatus> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .copied()
    }

    /// Invalidate any running dispense on `channel`
    fn bump(&self, channel: usize) -> u64 {
        self.generation[channel].fetch_add(1, Ordering::SeqCst) + 1
    }

    fn dispense(&self, channel: usize, amount: f64, duration: Duration, generation: u64) {
        let current = || self.generation[channel].load(Ordering::SeqCst) == generation;
        let started = Instant::now();
        let Some(deadline) = started.checked_add(duration) else {
            error!(output = %self.unique_id, channel, "Dispense duration out of range");
            return;
        };

        if let Err(e) = self.run(channel) {
            error!(output = %self.unique_id, channel, error = %e, "Cannot start dispense");
            return;
        }
        debug!(output = %self.unique_id, channel, "Output turned on");

        while Instant::now() < deadline && current() {
            thread::sleep(DISPENSE_POLL);
        }

        // A newer command owns the motor once the generation moved on
        if current() {
            if let Err(e) = self.stop(channel) {
                error!(output = %self.unique_id, channel, error = %e, "Cannot stop motor");
            }
            debug!(output = %self.unique_id, channel, "Output turned off");
        }

        let seconds = duration.as_secs_f64();
        let ran = started.elapsed().as_secs_f64().min(seconds);
        let dispensed = if seconds > 0.0 { amount * ran / seconds } else { amount };
        self.record_dispersal(channel, ran, dispensed);
    }

    fn record_dispersal(&self, channel: usize, seconds: f64, volume: f64) {
        let Some(spec) = OUTPUT_INFORMATION.channels.get(channel) else {
            return;
        };
        let values: Vec<MeasurementValue> = spec
            .measurements
            .iter()
            .zip([seconds, volume])
            .filter_map(|(index, value)| {
                OUTPUT_INFORMATION
                    .measurements
                    .iter()
                    .find(|m| m.channel == *index)
                    .map(|m| MeasurementValue {
                        channel: m.channel,
                        measurement: m.measurement,
                        unit: m.unit,
                        value,
                    })
            })
            .collect();
        self.sink.record(&self.unique_id, &values);
    }
}

/// Two-channel motor output over any [`MotorBridge`]
pub struct GroveMotorOutput<B> {
    shared: Arc<Shared<B>>,
}

impl<B: MotorBridge> GroveMotorOutput<B> {
    /// Fails when a channel's flow rate is not a finite positive number
    pub fn new(
        unique_id: impl Into<String>,
        bridge: B,
        options: [MotorChannelOptions; CHANNEL_COUNT],
        sink: Arc<dyn MeasurementSink>,
    ) -> AppResult<Self> {
        for (channel, option) in options.iter().enumerate() {
            let rate = option.flow_rate_ml_min;
            if !(rate.is_finite() && rate > 0.0) {
                return Err(AppError::new(
                    ErrorCode::OutputInvalidAmount,
                    format!("Channel {} Volume Rate (ml/min): Must be a positive value", channel),
                ));
            }
        }
        Ok(Self {
            shared: Arc::new(Shared {
                unique_id: unique_id.into(),
                bridge: Mutex::new(bridge),
                options,
                status: Mutex::new([ChannelStatus::default(); CHANNEL_COUNT]),
                generation: [AtomicU64::new(0), AtomicU64::new(0)],
                sink,
            }),
        })
    }

    fn setup_channel(&self, channel: usize) -> Result<(), String> {
        let mut bridge = self.shared.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        if !bridge.available(channel) {
            return Err("Cannot initialize Output channel until all options are set".to_string());
        }
        bridge.stop(channel)?;
        bridge.set_speed(channel, self.shared.options[channel].motor_speed)
    }
}

impl<B: MotorBridge> OutputModule for GroveMotorOutput<B> {
    fn information(&self) -> &'static OutputInformation {
        &OUTPUT_INFORMATION
    }

    fn setup_output(&self) {
        for channel in 0..CHANNEL_COUNT {
            let setup = match self.setup_channel(channel) {
                Ok(()) => true,
                Err(e) => {
                    error!(output = %self.shared.unique_id, channel, error = %e, "Output channel not set up");
                    false
                }
            };
            let mut status = self.shared.status.lock().unwrap_or_else(PoisonError::into_inner);
            status[channel] = ChannelStatus { setup, on: false };
        }
        info!(output = %self.shared.unique_id, ready = self.is_setup(None), "Motor output set up");
    }

    fn output_switch(
        &self,
        state: SwitchState,
        output_type: Option<AmountKind>,
        amount: Option<f64>,
        channel: usize,
    ) -> AppResult<()> {
        if !self.is_setup(Some(channel)) {
            let msg = format!("Output channel {} not set up, cannot turn it on or off.", channel);
            error!(output = %self.shared.unique_id, "{}", msg);
            return Err(AppError::new(ErrorCode::OutputNotSetup, msg));
        }
        if let Some(amount) = amount {
            if !amount.is_finite() {
                return Err(AppError::new(
                    ErrorCode::OutputInvalidAmount,
                    "Amount must be a finite number",
                ));
            }
            if amount < 0.0 {
                return Err(AppError::new(
                    ErrorCode::OutputInvalidAmount,
                    "Amount cannot be less than 0",
                ));
            }
        }

        let hardware = |e: String| AppError::new(ErrorCode::OutputBus, e);

        match (state, output_type, amount) {
            (SwitchState::On, Some(AmountKind::Vol), Some(amount)) if amount > 0.0 => {
                let rate = self.shared.options[channel].flow_rate_ml_min;
                let seconds = amount / rate * 60.0;
                let duration = Duration::try_from_secs_f64(seconds)
                    .ok()
                    .filter(|d| Instant::now().checked_add(*d).is_some())
                    .ok_or_else(|| {
                        AppError::new(
                            ErrorCode::OutputInvalidAmount,
                            format!("Cannot dispense {} ml at {} ml/min", amount, rate),
                        )
                    })?;
                debug!(
                    output = %self.shared.unique_id,
                    "Turning pump on for {:.1} seconds to dispense {:.1} ml (at {:.1} ml/min).",
                    seconds, amount, rate
                );
                let generation = self.shared.bump(channel);
                let shared = Arc::clone(&self.shared);
                thread::spawn(move || shared.dispense(channel, amount, duration, generation));
                Ok(())
            }
            (SwitchState::On, Some(AmountKind::Sec), _) => {
                self.shared.bump(channel);
                self.shared.run(channel).map_err(hardware)
            }
            (SwitchState::Off, _, _) => {
                self.shared.bump(channel);
                self.shared.stop(channel).map_err(hardware)
            }
            _ => Ok(()),
        }
    }

    fn is_on(&self, channel: usize) -> Option<bool> {
        self.shared
            .status(channel)
            .filter(|s| s.setup)
            .map(|s| s.on)
    }

    fn is_setup(&self, channel: Option<usize>) -> bool {
        match channel {
            Some(channel) => self.shared.status(channel).is_some_and(|s| s.setup),
            None => (0..CHANNEL_COUNT).any(|c| self.shared.status(c).is_some_and(|s| s.setup)),
        }
    }

    fn stop_output(&self) {
        for channel in 0..CHANNEL_COUNT {
            self.shared.bump(channel);
            if let Err(e) = self.shared.stop(channel) {
                error!(output = %self.shared.unique_id, channel, error = %e, "Cannot stop motor");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::ErrorType as PinErrorType;
    use embedded_hal::i2c::{ErrorType as I2cErrorType, Operation};
    use embedded_hal::pwm::ErrorType as PwmErrorType;
    use std::convert::Infallible;

    type Log = Arc<Mutex<Vec<String>>>;

    struct MockPin {
        name: &'static str,
        log: Log,
    }

    impl PinErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.log.lock().unwrap().push(format!("{}=low", self.name));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.log.lock().unwrap().push(format!("{}=high", self.name));
            Ok(())
        }
    }

    struct MockPwm {
        log: Log,
    }

    impl PwmErrorType for MockPwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            100
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.log.lock().unwrap().push(format!("duty={}", duty));
            Ok(())
        }
    }

    struct MockBus {
        writes: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    }

    impl I2cErrorType for MockBus {
        type Error = Infallible;
    }

    impl I2c for MockBus {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            for op in operations {
                if let Operation::Write(bytes) = op {
                    self.writes.lock().unwrap().push((address, bytes.to_vec()));
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, Vec<MeasurementValue>)>>,
    }

    impl MeasurementSink for RecordingSink {
        fn record(&self, device_id: &str, values: &[MeasurementValue]) {
            self.records
                .lock()
                .unwrap()
                .push((device_id.to_string(), values.to_vec()));
        }
    }

    fn h_bridge(log: &Log, prefix: &'static str, enable: bool) -> Option<HBridge<MockPin, MockPwm>> {
        enable.then(|| HBridge {
            pin_1: MockPin { name: if prefix == "a" { "a1" } else { "b1" }, log: log.clone() },
            pin_2: MockPin { name: if prefix == "a" { "a2" } else { "b2" }, log: log.clone() },
            enable: MockPwm { log: log.clone() },
        })
    }

    fn options(flow_rate_ml_min: f64) -> [MotorChannelOptions; CHANNEL_COUNT] {
        let option = MotorChannelOptions {
            flow_rate_ml_min,
            ..MotorChannelOptions::default()
        };
        [option.clone(), option]
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_channel_options_from_json() {
        let parsed = MotorChannelOptions::from_json(&serde_json::json!({
            "name": "Nutrient A", "motor_speed": 80, "direction": 0, "flow_rate_ml_min": 30.0
        }))
        .unwrap();
        assert_eq!(parsed.motor_speed, 80);
        assert!(!parsed.forward);
        assert_eq!(MotorChannelOptions::from_json(&serde_json::json!({})).unwrap(), MotorChannelOptions::default());

        let errors = MotorChannelOptions::from_json(&serde_json::json!({
            "motor_speed": 120, "flow_rate_ml_min": 0
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_setup_skips_unwired_channel() {
        let log: Log = Arc::default();
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", false));
        let output = GroveMotorOutput::new("out-1", bridge, options(150.0), Arc::new(RecordingSink::default())).unwrap();
        output.setup_output();

        assert!(output.is_setup(Some(0)));
        assert!(!output.is_setup(Some(1)));
        assert!(output.is_setup(None));
        assert_eq!(output.is_on(0), Some(false));
        assert_eq!(output.is_on(1), None);
        assert_eq!(*log.lock().unwrap(), vec!["a1=low", "a2=low", "duty=50"]);

        let err = output.output_switch(SwitchState::On, Some(AmountKind::Sec), None, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutputNotSetup);
        assert_eq!(err.message, "Output channel 1 not set up, cannot turn it on or off.");
    }

    #[test]
    fn test_gpio_run_and_stop() {
        let log: Log = Arc::default();
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
        let output = GroveMotorOutput::new("out-1", bridge, options(150.0), Arc::new(RecordingSink::default())).unwrap();
        output.setup_output();
        log.lock().unwrap().clear();

        output.output_switch(SwitchState::On, Some(AmountKind::Sec), Some(5.0), 0).unwrap();
        assert_eq!(output.is_on(0), Some(true));
        output.output_switch(SwitchState::Off, None, None, 0).unwrap();
        assert_eq!(output.is_on(0), Some(false));
        assert_eq!(*log.lock().unwrap(), vec!["a1=high", "a2=low", "a1=low", "a2=low"]);

        let err = output.output_switch(SwitchState::On, Some(AmountKind::Vol), Some(-1.0), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutputInvalidAmount);
    }

    #[test]
    fn test_dispense_records_duration_and_volume() {
        let log: Log = Arc::default();
        let sink = Arc::new(RecordingSink::default());
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
        // 6000 ml/min: 5 ml takes 50 ms
        let output = GroveMotorOutput::new("pump", bridge, options(6000.0), sink.clone()).unwrap();
        output.setup_output();

        output.output_switch(SwitchState::On, Some(AmountKind::Vol), Some(5.0), 1).unwrap();
        wait_for(|| !sink.records.lock().unwrap().is_empty());

        let records = sink.records.lock().unwrap().clone();
        let (device, values) = &records[0];
        assert_eq!(device, "pump");
        assert_eq!(values[0].channel, 2);
        assert_eq!(values[0].measurement, "duration_time");
        assert!((values[0].value - 0.05).abs() < 1e-9);
        assert_eq!(values[1].channel, 3);
        assert!((values[1].value - 5.0).abs() < 1e-9);
        assert_eq!(output.is_on(1), Some(false));
    }

    #[test]
    fn test_off_cancels_dispense() {
        let log: Log = Arc::default();
        let sink = Arc::new(RecordingSink::default());
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
        // 1 ml/min: 10 ml would take ten minutes
        let output = GroveMotorOutput::new("pump", bridge, options(1.0), sink.clone()).unwrap();
        output.setup_output();

        output.output_switch(SwitchState::On, Some(AmountKind::Vol), Some(10.0), 0).unwrap();
        wait_for(|| output.is_on(0) == Some(true));
        output.output_switch(SwitchState::Off, None, None, 0).unwrap();
        wait_for(|| !sink.records.lock().unwrap().is_empty());

        let records = sink.records.lock().unwrap().clone();
        assert!(records[0].1[1].value < 10.0);
        assert_eq!(output.is_on(0), Some(false));
    }

    #[test]
    fn test_new_dispense_overrides_running_one() {
        let log: Log = Arc::default();
        let sink = Arc::new(RecordingSink::default());
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
        // 60 ml/min: one ml per second
        let output = GroveMotorOutput::new("pump", bridge, options(60.0), sink.clone()).unwrap();
        output.setup_output();

        output.output_switch(SwitchState::On, Some(AmountKind::Vol), Some(600.0), 0).unwrap();
        wait_for(|| output.is_on(0) == Some(true));
        log.lock().unwrap().clear();
        output.output_switch(SwitchState::On, Some(AmountKind::Vol), Some(0.3), 0).unwrap();

        // The first run records what it dispensed and leaves the motor running
        wait_for(|| sink.records.lock().unwrap().len() == 1);
        let first = sink.records.lock().unwrap()[0].1.clone();
        assert!(first[0].value < 600.0);
        assert!(first[1].value > 0.0 && first[1].value < 600.0);
        assert_eq!(output.is_on(0), Some(true));
        assert!(!log.lock().unwrap().iter().any(|entry| entry == "a1=low"));

        wait_for(|| sink.records.lock().unwrap().len() == 2);
        let second = sink.records.lock().unwrap()[1].1.clone();
        assert!((second[0].value - 0.3).abs() < 1e-9);
        assert!((second[1].value - 0.3).abs() < 1e-9);
        assert_eq!(output.is_on(0), Some(false));
    }

    #[test]
    fn test_out_of_range_dispense_rejected() {
        let log: Log = Arc::default();
        let sink = Arc::new(RecordingSink::default());
        let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
        let output = GroveMotorOutput::new("pump", bridge, options(150.0), sink.clone()).unwrap();
        output.setup_output();
        log.lock().unwrap().clear();

        for (amount, channel) in [(1e300, 0), (f64::INFINITY, 1), (f64::NAN, 0)] {
            let err = output
                .output_switch(SwitchState::On, Some(AmountKind::Vol), Some(amount), channel)
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::OutputInvalidAmount);
            assert_eq!(output.is_on(channel), Some(false));
        }
        thread::sleep(Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty());
        assert!(sink.records.lock().unwrap().is_empty());

        for rate in [0.0, -5.0, f64::INFINITY] {
            let bridge = GpioBridge::new(h_bridge(&log, "a", true), h_bridge(&log, "b", true));
            match GroveMotorOutput::new("pump", bridge, options(rate), sink.clone()) {
                Err(e) => assert_eq!(e.code, ErrorCode::OutputInvalidAmount),
                Ok(_) => panic!("flow rate {} accepted", rate),
            }
        }
    }

    #[test]
    fn test_grove_i2c_commands() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let bridge = GroveI2cBridge::new(MockBus { writes: writes.clone() }, registers::DEFAULT_ADDRESS);
        let mut opts = options(150.0);
        opts[1].forward = false;
        opts[1].motor_speed = 100;
        let output = GroveMotorOutput::new("grove", bridge, opts, Arc::new(RecordingSink::default())).unwrap();
        output.setup_output();
        assert!(output.is_setup(Some(0)) && output.is_setup(Some(1)));

        output.output_switch(SwitchState::On, Some(AmountKind::Sec), None, 0).unwrap();
        output.output_switch(SwitchState::On, Some(AmountKind::Sec), None, 1).unwrap();
        output.stop_output();

        let writes = writes.lock().unwrap().clone();
        assert!(writes.iter().all(|(addr, _)| *addr == 0x28));
        let bytes: Vec<Vec<u8>> = writes.into_iter().map(|(_, b)| b).collect();
        assert_eq!(
            bytes,
            vec![
                vec![registers::CHANNEL_SET, 0b0000, 0x01],
                vec![registers::SET_FREQ, registers::FREQ_3921HZ, 0x01],
                vec![registers::SET_PWM_AB, 127, 0],
                vec![registers::CHANNEL_SET, 0b0000, 0x01],
                vec![registers::SET_PWM_AB, 127, 255],
                vec![registers::CHANNEL_SET, 0b0010, 0x01],
                vec![registers::CHANNEL_SET, 0b0110, 0x01],
                vec![registers::CHANNEL_SET, 0b0100, 0x01],
                vec![registers::CHANNEL_SET, 0b0000, 0x01],
            ]
        );
    }
}
