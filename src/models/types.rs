//! Record definitions for users, Functions, Actions and their bookkeeping

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::errors::{AppError, ErrorCode};

/// Fresh random unique id for a record
pub fn new_unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================
// Users & Roles
// ============================================

/// User role, stored by numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Editor,
    Monitor,
    Guest,
}

/// Things a role may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    EditSettings,
    EditControllers,
    EditUsers,
    ViewSettings,
}

impl Role {
    pub fn id(&self) -> u8 {
        match self {
            Role::Admin => 1,
            Role::Editor => 2,
            Role::Monitor => 3,
            Role::Guest => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Editor),
            3 => Some(Role::Monitor),
            4 => Some(Role::Guest),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Editor => "Editor",
            Role::Monitor => "Monitor",
            Role::Guest => "Guest",
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        match permission {
            Permission::EditSettings | Permission::EditUsers => *self == Role::Admin,
            Permission::EditControllers => matches!(self, Role::Admin | Role::Editor),
            Permission::ViewSettings => *self != Role::Guest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub unique_id: String,
    /// Always lower-case
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub theme: String,
    #[serde(default)]
    pub remember_token: Option<String>,
}

// ============================================
// Functions
// ============================================

/// Concrete controller behind a Function record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionKind {
    Conditional { statement: String },
    Pid,
    Trigger { trigger_type: String },
    Spacer,
    ActionList,
    Custom {
        device: String,
        custom_options: serde_json::Value,
    },
}

/// The table a Function lives in; Action forms address Functions by family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionFamily {
    Conditional,
    Pid,
    Trigger,
    Function,
    Custom,
}

impl FunctionFamily {
    /// Family named by an Action form's `function_type`
    pub fn from_action_form(function_type: &str) -> Option<Self> {
        match function_type {
            "conditional" => Some(Self::Conditional),
            "trigger" => Some(Self::Trigger),
            "function_actions" => Some(Self::Function),
            _ => None,
        }
    }

    /// Conditionals, PIDs, Triggers and custom controllers run in the daemon
    /// and carry an activation flag; plain Functions do not.
    pub fn has_activation(&self) -> bool {
        !matches!(self, Self::Function)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Conditional => "Conditional",
            Self::Pid => "PID",
            Self::Trigger => "Trigger",
            Self::Function | Self::Custom => "Function",
        }
    }
}

impl FunctionKind {
    pub fn family(&self) -> FunctionFamily {
        match self {
            FunctionKind::Conditional { .. } => FunctionFamily::Conditional,
            FunctionKind::Pid => FunctionFamily::Pid,
            FunctionKind::Trigger { .. } => FunctionFamily::Trigger,
            FunctionKind::Spacer | FunctionKind::ActionList => FunctionFamily::Function,
            FunctionKind::Custom { .. } => FunctionFamily::Custom,
        }
    }

    /// The `function_type` string this kind was created from
    pub fn type_name(&self) -> &str {
        match self {
            FunctionKind::Conditional { .. } => "conditional_conditional",
            FunctionKind::Pid => "pid_pid",
            FunctionKind::Trigger { trigger_type } => trigger_type,
            FunctionKind::Spacer => "function_spacer",
            FunctionKind::ActionList => "function_actions",
            FunctionKind::Custom { device, .. } => device,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub unique_id: String,
    pub name: String,
    pub kind: FunctionKind,
    #[serde(default)]
    pub is_activated: bool,
    #[serde(default)]
    pub log_level_debug: bool,
}

impl FunctionRecord {
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            unique_id: new_unique_id(),
            name: name.into(),
            kind,
            is_activated: false,
            log_level_debug: false,
        }
    }

    pub fn family(&self) -> FunctionFamily {
        self.kind.family()
    }
}

// ============================================
// Actions
// ============================================

/// Everything an Action can do when its Function fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PauseActions,
    Output,
    OutputPwm,
    OutputRampPwm,
    OutputValue,
    OutputVolume,
    ActivateController,
    DeactivateController,
    ActivatePid,
    DeactivatePid,
    ResumePid,
    PausePid,
    ActivateTimer,
    DeactivateTimer,
    ClearTotalVolume,
    InputForceMeasurements,
    SetpointPid,
    SetpointPidRaise,
    SetpointPidLower,
    MethodPid,
    Email,
    EmailMultiple,
    PhotoEmail,
    VideoEmail,
    FlashLcdOn,
    FlashLcdOff,
    LcdBacklightOff,
    LcdBacklightOn,
    LcdBacklightColor,
    Photo,
    Video,
    Command,
    CreateNote,
    SystemRestart,
    SystemShutdown,
    MqttPublish,
}

impl ActionType {
    pub const ALL: [ActionType; 36] = [
        ActionType::PauseActions,
        ActionType::Output,
        ActionType::OutputPwm,
        ActionType::OutputRampPwm,
        ActionType::OutputValue,
        ActionType::OutputVolume,
        ActionType::ActivateController,
        ActionType::DeactivateController,
        ActionType::ActivatePid,
        ActionType::DeactivatePid,
        ActionType::ResumePid,
        ActionType::PausePid,
        ActionType::ActivateTimer,
        ActionType::DeactivateTimer,
        ActionType::ClearTotalVolume,
        ActionType::InputForceMeasurements,
        ActionType::SetpointPid,
        ActionType::SetpointPidRaise,
        ActionType::SetpointPidLower,
        ActionType::MethodPid,
        ActionType::Email,
        ActionType::EmailMultiple,
        ActionType::PhotoEmail,
        ActionType::VideoEmail,
        ActionType::FlashLcdOn,
        ActionType::FlashLcdOff,
        ActionType::LcdBacklightOff,
        ActionType::LcdBacklightOn,
        ActionType::LcdBacklightColor,
        ActionType::Photo,
        ActionType::Video,
        ActionType::Command,
        ActionType::CreateNote,
        ActionType::SystemRestart,
        ActionType::SystemShutdown,
        ActionType::MqttPublish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PauseActions => "pause_actions",
            ActionType::Output => "output",
            ActionType::OutputPwm => "output_pwm",
            ActionType::OutputRampPwm => "output_ramp_pwm",
            ActionType::OutputValue => "output_value",
            ActionType::OutputVolume => "output_volume",
            ActionType::ActivateController => "activate_controller",
            ActionType::DeactivateController => "deactivate_controller",
            ActionType::ActivatePid => "activate_pid",
            ActionType::DeactivatePid => "deactivate_pid",
            ActionType::ResumePid => "resume_pid",
            ActionType::PausePid => "pause_pid",
            ActionType::ActivateTimer => "activate_timer",
            ActionType::DeactivateTimer => "deactivate_timer",
            ActionType::ClearTotalVolume => "clear_total_volume",
            ActionType::InputForceMeasurements => "input_force_measurements",
            ActionType::SetpointPid => "setpoint_pid",
            ActionType::SetpointPidRaise => "setpoint_pid_raise",
            ActionType::SetpointPidLower => "setpoint_pid_lower",
            ActionType::MethodPid => "method_pid",
            ActionType::Email => "email",
            ActionType::EmailMultiple => "email_multiple",
            ActionType::PhotoEmail => "photo_email",
            ActionType::VideoEmail => "video_email",
            ActionType::FlashLcdOn => "flash_lcd_on",
            ActionType::FlashLcdOff => "flash_lcd_off",
            ActionType::LcdBacklightOff => "lcd_backlight_off",
            ActionType::LcdBacklightOn => "lcd_backlight_on",
            ActionType::LcdBacklightColor => "lcd_backlight_color",
            ActionType::Photo => "photo",
            ActionType::Video => "video",
            ActionType::Command => "command",
            ActionType::CreateNote => "create_note",
            ActionType::SystemRestart => "system_restart",
            ActionType::SystemShutdown => "system_shutdown",
            ActionType::MqttPublish => "mqtt_publish",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                AppError::new(ErrorCode::ActionInvalid, format!("Unknown action type: '{}'", s))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub unique_id: String,
    pub function_id: String,
    pub function_type: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub pause_duration: Option<f64>,
    #[serde(default)]
    pub do_unique_id: Option<String>,
    #[serde(default)]
    pub do_output_state: Option<String>,
    #[serde(default)]
    pub do_output_duration: Option<f64>,
    #[serde(default)]
    pub do_output_pwm: Option<f64>,
    #[serde(default)]
    pub do_output_pwm2: Option<f64>,
    #[serde(default)]
    pub do_output_amount: Option<f64>,
    #[serde(default)]
    pub do_action_string: Option<String>,
    #[serde(default)]
    pub do_camera_duration: Option<f64>,
    #[serde(default)]
    pub custom_options: Option<serde_json::Value>,
}

impl Action {
    pub fn new(function_id: &str, function_type: &str, action_type: ActionType) -> Self {
        Self {
            unique_id: new_unique_id(),
            function_id: function_id.to_string(),
            function_type: function_type.to_string(),
            action_type,
            pause_duration: None,
            do_unique_id: None,
            do_output_state: None,
            do_output_duration: None,
            do_output_pwm: None,
            do_output_pwm2: None,
            do_output_amount: None,
            do_action_string: None,
            do_camera_duration: None,
            custom_options: None,
        }
    }
}

// ============================================
// Measurements, channels & misc records
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMeasurement {
    pub unique_id: String,
    pub device_id: String,
    pub name: String,
    pub measurement: String,
    pub unit: String,
    pub channel: u32,
    #[serde(default)]
    pub measurement_type: Option<String>,
}

impl DeviceMeasurement {
    pub fn new(device_id: &str, channel: u32) -> Self {
        Self {
            unique_id: new_unique_id(),
            device_id: device_id.to_string(),
            name: String::new(),
            measurement: String::new(),
            unit: String::new(),
            channel,
            measurement_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionChannel {
    pub unique_id: String,
    pub function_id: String,
    pub channel: u32,
    pub custom_options: serde_json::Value,
}

/// Another installation this one can administer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHost {
    pub unique_id: String,
    pub host: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub unique_id: String,
    pub name: String,
    /// Capture library; only `picamera` can record video
    pub library: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Misc {
    pub dismiss_notification: bool,
}

/// Ordering of items on the Function and remote-host pages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOrder {
    #[serde(with = "crate::utils::display_order::csv")]
    pub function: Vec<String>,
    #[serde(with = "crate::utils::display_order::csv")]
    pub remote_host: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permissions() {
        assert!(Role::Admin.has(Permission::EditSettings));
        assert!(!Role::Editor.has(Permission::EditSettings));
        assert!(Role::Editor.has(Permission::EditControllers));
        assert!(!Role::Monitor.has(Permission::EditControllers));
        assert!(!Role::Guest.has(Permission::ViewSettings));
        assert_eq!(Role::from_id(Role::Monitor.id()), Some(Role::Monitor));
    }

    #[test]
    fn test_action_type_names_round_trip() {
        for action_type in ActionType::ALL {
            let parsed: ActionType = action_type.as_str().parse().unwrap();
            assert_eq!(parsed, action_type);
        }
        assert!("teleport".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_type_serde_matches_as_str() {
        let json = serde_json::to_string(&ActionType::OutputRampPwm).unwrap();
        assert_eq!(json, "\"output_ramp_pwm\"");
    }

    #[test]
    fn test_function_family() {
        assert_eq!(
            FunctionFamily::from_action_form("function_actions"),
            Some(FunctionFamily::Function)
        );
        assert_eq!(FunctionFamily::from_action_form("pid"), None);
        assert!(!FunctionKind::Spacer.family().has_activation());
        assert!(FunctionKind::Pid.family().has_activation());
        assert_eq!(FunctionKind::ActionList.type_name(), "function_actions");
    }

    #[test]
    fn test_display_order_serializes_as_csv() {
        let order = DisplayOrder {
            function: vec!["a".into(), "b".into()],
            remote_host: vec![],
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["function"], "a,b");
        assert_eq!(json["remote_host"], "");
        let back: DisplayOrder = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
