//! Function Action management
//!
//! Actions hang off Conditionals, Triggers and plain action-list Functions.
//! What each field means depends on the action type, so both modification
//! and validation branch on it.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{CoreContext, Outcome};
use crate::models::errors::AppError;
use crate::models::types::{Action, ActionType, FunctionFamily, FunctionRecord};
use crate::providers::DaemonControl;
use crate::store::Tables;

pub const TITLE_ADD: &str = "Add Function Actions";
pub const TITLE_MODIFY: &str = "Modify Function Actions";
pub const TITLE_DELETE: &str = "Delete Function Actions";

/// Fields posted by the Action forms
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionForm {
    pub function_id: String,
    pub function_type: String,
    pub function_action_id: String,
    pub action_type: String,
    pub pause_duration: Option<f64>,
    pub do_unique_id: Option<String>,
    pub do_output_state: Option<String>,
    pub do_output_duration: Option<f64>,
    pub do_output_pwm: Option<f64>,
    pub do_output_pwm2: Option<f64>,
    pub do_output_amount: Option<f64>,
    pub do_action_string: Option<String>,
    pub do_camera_duration: Option<f64>,
    pub log_level_debug: bool,
}

/// Default broker settings of a new MQTT publish Action
pub fn default_mqtt_options() -> Value {
    json!({
        "hostname": "localhost",
        "port": 1883,
        "topic": "paho/test/single",
        "keepalive": 60,
        "clientid": "verdant_mqtt_client",
        "login": false,
        "username": "user",
        "password": ""
    })
}

fn lookup_function<'t>(
    tables: &'t Tables,
    family: FunctionFamily,
    function_id: &str,
) -> Option<&'t FunctionRecord> {
    tables
        .function(function_id)
        .filter(|f| f.family() == family)
}

// ============================================
// Add / modify / delete
// ============================================

pub fn action_add(ctx: &CoreContext<'_>, form: &ActionForm) -> Outcome {
    let mut outcome = Outcome::new(TITLE_ADD);

    let unmet = ctx.unmet_dependencies(&form.action_type);
    if !unmet.is_empty() {
        outcome.dependencies_unmet = true;
        outcome.error(format!(
            "The {} device you're trying to add has unmet dependencies: {}",
            form.function_type,
            unmet.join(", ")
        ));
    }

    match FunctionFamily::from_action_form(&form.function_type) {
        Some(family) => {
            match ctx.db.read(|t| lookup_function(t, family, &form.function_id).cloned()) {
                Some(function) if family.has_activation() && function.is_activated => {
                    outcome.error("Deactivate before adding an Action")
                }
                Some(_) => {}
                None => outcome.error(AppError::function_not_found(&form.function_id).message),
            }
        }
        None => outcome.error(format!("Invalid Function type: {}", form.function_type)),
    }

    let action_type = if form.action_type.is_empty() {
        outcome.error("Must select an action");
        None
    } else {
        match form.action_type.parse::<ActionType>() {
            Ok(t) => Some(t),
            Err(e) => {
                outcome.error(e.message);
                None
            }
        }
    };

    let (Some(action_type), true) = (action_type, outcome.is_ok()) else {
        return outcome;
    };

    let mut action = Action::new(&form.function_id, &form.function_type, action_type);
    match action_type {
        ActionType::Command => action.do_output_state = Some(ctx.config.command_user.clone()),
        ActionType::MqttPublish => action.custom_options = Some(default_mqtt_options()),
        _ => {}
    }

    let action_id = action.unique_id.clone();
    match ctx.db.transaction(|t| {
        t.actions.push(action);
        Ok(())
    }) {
        Ok(()) => {
            info!(action_id = %action_id, function_id = %form.function_id, %action_type, "Action added");
            outcome.unique_id = Some(action_id);
        }
        Err(e) => {
            error!(error = %e, "Add Action failed");
            outcome.error(e.message);
        }
    }
    outcome
}

/// Copy the form fields `action_type` uses onto `action`
fn apply_form(action: &mut Action, form: &ActionForm, raw: &Map<String, Value>, errors: &mut Vec<String>) {
    use ActionType::*;

    match action.action_type {
        PauseActions => action.pause_duration = form.pause_duration,
        Output => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_output_state = form.do_output_state.clone();
            action.do_output_duration = form.do_output_duration;
        }
        OutputPwm => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_output_pwm = form.do_output_pwm;
        }
        OutputRampPwm => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_output_pwm = form.do_output_pwm;
            action.do_output_pwm2 = form.do_output_pwm2;
            action.do_action_string = form.do_action_string.clone();
            action.do_output_duration = form.do_output_duration;
        }
        OutputValue | OutputVolume => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_output_amount = form.do_output_amount;
        }
        ActivateController | DeactivateController | ActivatePid | DeactivatePid | ResumePid
        | PausePid | ActivateTimer | DeactivateTimer | ClearTotalVolume
        | InputForceMeasurements => action.do_unique_id = form.do_unique_id.clone(),
        SetpointPid | SetpointPidRaise | SetpointPidLower => {
            if !is_float(form.do_action_string.as_deref().unwrap_or("")) {
                errors.push("Setpoint value must be an integer or float value".to_string());
            }
            action.do_unique_id = form.do_unique_id.clone();
            action.do_action_string = form.do_action_string.clone();
        }
        MethodPid | LcdBacklightColor => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_action_string = form.do_action_string.clone();
        }
        Email | EmailMultiple | CreateNote => action.do_action_string = form.do_action_string.clone(),
        PhotoEmail | VideoEmail => {
            action.do_action_string = form.do_action_string.clone();
            action.do_unique_id = form.do_unique_id.clone();
            action.do_camera_duration = form.do_camera_duration;
        }
        FlashLcdOn | FlashLcdOff | LcdBacklightOff | LcdBacklightOn | Photo => {
            action.do_unique_id = form.do_unique_id.clone()
        }
        Video => {
            action.do_unique_id = form.do_unique_id.clone();
            action.do_camera_duration = form.do_camera_duration;
        }
        Command => {
            action.do_action_string = form.do_action_string.clone();
            action.do_output_state = form.do_output_state.clone();
        }
        SystemRestart | SystemShutdown => {}
        MqttPublish => match mqtt_options(raw) {
            Ok(options) => action.custom_options = Some(options),
            Err(e) => errors.push(e),
        },
    }
}

/// Broker settings posted alongside an MQTT publish Action
pub fn mqtt_options(raw: &Map<String, Value>) -> Result<Value, String> {
    let text = |key: &str| -> Result<String, String> {
        match raw.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(format!("MQTT option missing: {}", key)),
        }
    };
    let integer = |key: &str| -> Result<i64, String> {
        let value = text(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("MQTT option must be an integer: {}", key))
    };

    Ok(json!({
        "hostname": text("hostname")?,
        "port": integer("port")?,
        "topic": text("topic")?,
        "keepalive": integer("keepalive")?,
        "clientid": text("clientid")?,
        "login": raw.contains_key("login"),
        "username": text("username")?,
        "password": text("password")?,
    }))
}

/// Update an Action from its form; nothing is stored if any check fails
pub fn action_mod(ctx: &CoreContext<'_>, form: &ActionForm, raw: &Map<String, Value>) -> Outcome {
    let mut outcome = Outcome::new(TITLE_MODIFY);

    let stored = ctx.db.read(|t| {
        t.action(&form.function_action_id)
            .filter(|a| a.function_id == form.function_id)
            .cloned()
    });
    let Some(mut action) = stored else {
        outcome.error(AppError::action_not_found(&form.function_action_id).message);
        return outcome;
    };

    outcome.errors = ctx.db.read(|t| check_form_actions(t, action.action_type, form));
    apply_form(&mut action, form, raw, &mut outcome.errors);
    if !outcome.is_ok() {
        return outcome;
    }

    let action_id = action.unique_id.clone();
    let result = ctx.db.transaction(|t| {
        let stored = t
            .action_mut(&action_id)
            .ok_or_else(|| AppError::action_not_found(&action_id))?;
        *stored = action;
        Ok(())
    });
    match result {
        Ok(()) => outcome.unique_id = Some(action_id),
        Err(e) => outcome.error(e.message),
    }
    outcome
}

pub fn action_del(ctx: &CoreContext<'_>, function_id: &str, action_id: &str) -> Outcome {
    let mut outcome = Outcome::new(TITLE_DELETE);

    let owner_active = ctx.db.read(|t| {
        t.function(function_id).is_some_and(|f| {
            matches!(f.family(), FunctionFamily::Conditional | FunctionFamily::Trigger)
                && f.is_activated
        })
    });
    if owner_active {
        outcome.error("Deactivate the Conditional before deleting an Action");
        return outcome;
    }

    let result = ctx.db.transaction(|t| {
        let before = t.actions.len();
        t.actions
            .retain(|a| !(a.unique_id == action_id && a.function_id == function_id));
        if t.actions.len() == before {
            return Err(AppError::action_not_found(action_id));
        }
        Ok(())
    });
    match result {
        Ok(()) => {
            info!(action_id, function_id, "Action deleted");
            outcome.unique_id = Some(action_id.to_string());
        }
        Err(e) => outcome.error(e.message),
    }
    outcome
}

// ============================================
// Execute all
// ============================================

/// Ask the daemon to run every Action of a Function.
///
/// The daemon call runs on a background task; the outcome only reflects
/// whether the request could be dispatched.
pub fn action_execute_all(
    ctx: &CoreContext<'_>,
    daemon: Arc<dyn DaemonControl>,
    function_id: &str,
    function_type: &str,
    debug: bool,
) -> Outcome {
    let family = FunctionFamily::from_action_form(function_type);
    let kind = family.map(|f| f.title()).unwrap_or("Function");
    let mut outcome = Outcome::new(format!("Execute All {} Actions", kind));

    let Some(family) = family else {
        outcome.error(format!("Unknown Function type: '{}'", function_type));
        return outcome;
    };

    let (function, incomplete) = ctx.db.read(|t| {
        let function = lookup_function(t, family, function_id).cloned();
        let incomplete: Vec<String> = t
            .actions_for(function_id)
            .into_iter()
            .flat_map(|a| check_actions(t, a))
            .collect();
        (function, incomplete)
    });
    match function {
        None => outcome.error(AppError::function_not_found(function_id).message),
        Some(f) if family.has_activation() && !f.is_activated => {
            outcome.error("Activate the Conditional before testing all Actions")
        }
        Some(_) => {}
    }
    if !outcome.is_ok() {
        return outcome;
    }
    if !incomplete.is_empty() {
        warn!(function_id, problems = ?incomplete, "Executing Actions that are not fully configured");
    }

    let function_id = function_id.to_string();
    let message = format!("Triggering all actions of function {}", function_id);
    tokio::spawn(async move {
        match daemon.trigger_all_actions(&function_id, &message, debug).await {
            Ok(reply) => info!(function_id = %function_id, %reply, "All actions triggered"),
            Err(e) => warn!(function_id = %function_id, error = %e, "Trigger all actions failed"),
        }
    });
    outcome
}

// ============================================
// Validation
// ============================================

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn is_float(value: &str) -> bool {
    value.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

/// Check an `R,G,B` backlight colour
fn check_lcd_color(value: &str, errors: &mut Vec<String>) {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        errors.push(r#"LCD backlight color must be in the R,G,B format "255,255,255""#.to_string());
    }
    for (index, label) in ["Red", "Green", "Blue"].iter().enumerate() {
        let Some(part) = parts.get(index) else {
            errors.push(
                r#"Error parsing LCD backlight color. Must be in the R,G,B format "255,255,255" without quotes."#
                    .to_string(),
            );
            return;
        };
        match part.trim().parse::<i64>() {
            Err(_) => errors.push(format!("{} color does not represent an integer.", label)),
            Ok(v) if !(0..=255).contains(&v) => {
                errors.push(format!("{} color must be >= 0 and <= 255", label))
            }
            Ok(_) => {}
        }
    }
}

fn camera_records_video(tables: &Tables, camera_id: &Option<String>) -> bool {
    camera_id
        .as_deref()
        .and_then(|id| tables.camera(id))
        .map_or(true, |camera| camera.library == "picamera")
}

/// Whether the values a form or record holds are enough to run an Action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckMode {
    /// Values being submitted on the modify form
    Form,
    /// Values already stored, checked before they run
    Stored,
}

fn check_fields(tables: &Tables, action_type: ActionType, fields: &Action, mode: CheckMode) -> Vec<String> {
    use ActionType::*;

    let mut errors = Vec::new();
    let mut require = |missing: bool, message: &str| {
        if missing {
            errors.push(message.to_string());
        }
    };

    match action_type {
        Command => require(blank(&fields.do_action_string), "Command must be set"),
        Output => {
            require(blank(&fields.do_unique_id), "Output must be set");
            require(blank(&fields.do_output_state), "State must be set");
        }
        OutputPwm if mode == CheckMode::Form => {
            require(blank(&fields.do_unique_id), "Output must be set");
            require(
                !fields.do_output_pwm.is_some_and(|pwm| (0.0..=100.0).contains(&pwm)),
                "Duty Cycle must be set (0 <= duty cycle <= 100)",
            );
        }
        OutputValue if mode == CheckMode::Form => {
            require(blank(&fields.do_unique_id), "Output must be set");
            require(fields.do_output_amount.is_none(), "Value must be set");
        }
        OutputVolume if mode == CheckMode::Form => {
            require(blank(&fields.do_unique_id), "Output must be set");
            require(fields.do_output_amount.is_none(), "Volume must be set");
        }
        ActivatePid | DeactivatePid => require(
            blank(&fields.do_unique_id),
            if mode == CheckMode::Form { "ID must be set" } else { "PID must be set" },
        ),
        ResumePid | PausePid if mode == CheckMode::Form => {
            require(blank(&fields.do_unique_id), "ID must be set")
        }
        Email => require(blank(&fields.do_action_string), "Email must be set"),
        PhotoEmail | VideoEmail => {
            require(blank(&fields.do_action_string), "Email must be set");
            require(blank(&fields.do_unique_id), "Camera must be set");
            require(
                action_type == VideoEmail && !camera_records_video(tables, &fields.do_unique_id),
                "Only Pi Cameras can record video",
            );
        }
        FlashLcdOn => require(blank(&fields.do_unique_id), "LCD must be set"),
        LcdBacklightColor => {
            require(blank(&fields.do_unique_id), "LCD must be set");
            check_lcd_color(fields.do_action_string.as_deref().unwrap_or(""), &mut errors);
        }
        Photo | Video => require(blank(&fields.do_unique_id), "Camera must be set"),
        _ => {}
    }
    errors
}

/// Check the values submitted for an Action of `action_type`
pub fn check_form_actions(tables: &Tables, action_type: ActionType, form: &ActionForm) -> Vec<String> {
    let mut fields = Action::new(&form.function_id, &form.function_type, action_type);
    fields.do_unique_id = form.do_unique_id.clone();
    fields.do_output_state = form.do_output_state.clone();
    fields.do_output_pwm = form.do_output_pwm;
    fields.do_output_amount = form.do_output_amount;
    fields.do_action_string = form.do_action_string.clone();
    check_fields(tables, action_type, &fields, CheckMode::Form)
}

/// Check a stored Action is complete enough to run
pub fn check_actions(tables: &Tables, action: &Action) -> Vec<String> {
    check_fields(tables, action.action_type, action, CheckMode::Stored)
}
