//! Function management: add, modify, delete, reorder

use serde::Deserialize;
use tracing::{error, info};

use super::registry::{options_object, FunctionRegistry, CONDITIONAL_TEMPLATE, PID_MEASUREMENTS};
use super::{CoreContext, Outcome};
use crate::models::errors::AppError;
use crate::models::types::{
    new_unique_id, DeviceMeasurement, FunctionChannel, FunctionKind, FunctionRecord,
};
use crate::utils::display_order::{add_display_order, remove_display_order, reorder, Direction};

pub const TITLE_ADD: &str = "Add Function";
pub const TITLE_MODIFY: &str = "Modify Function";
pub const TITLE_DELETE: &str = "Delete Function";
pub const TITLE_REORDER: &str = "Reorder Function";

const TRIGGER_TYPES: [&str; 8] = [
    "trigger_edge",
    "trigger_output",
    "trigger_output_pwm",
    "trigger_timer_daily_time_point",
    "trigger_timer_daily_time_span",
    "trigger_timer_duration",
    "trigger_run_pwm_method",
    "trigger_sunrise_sunset",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionModForm {
    #[serde(default)]
    pub function_id: String,
    pub name: String,
    #[serde(default)]
    pub log_level_debug: bool,
}

/// Records to insert for a new Function
struct NewFunction {
    function: FunctionRecord,
    measurements: Vec<DeviceMeasurement>,
    channels: Vec<FunctionChannel>,
}

fn plan_function(registry: &FunctionRegistry, function_type: &str) -> Result<NewFunction, String> {
    let mut measurements = Vec::new();
    let mut channels = Vec::new();

    let function = match function_type {
        "" => return Err("Must select a function type".to_string()),
        "conditional_conditional" => FunctionRecord::new(
            FunctionRegistry::builtin_name(function_type).unwrap_or("Conditional"),
            FunctionKind::Conditional {
                statement: CONDITIONAL_TEMPLATE.to_string(),
            },
        ),
        "pid_pid" => {
            let function = FunctionRecord::new("PID", FunctionKind::Pid);
            for info in PID_MEASUREMENTS {
                let mut measurement = DeviceMeasurement::new(&function.unique_id, info.channel);
                measurement.name = info.name.to_string();
                measurement.measurement = info.measurement.to_string();
                measurement.unit = info.unit.to_string();
                measurement.measurement_type = info.measurement_type.map(str::to_string);
                measurements.push(measurement);
            }
            function
        }
        t if TRIGGER_TYPES.contains(&t) => FunctionRecord::new(
            FunctionRegistry::builtin_name(t).unwrap_or(t),
            FunctionKind::Trigger {
                trigger_type: t.to_string(),
            },
        ),
        "function_spacer" => FunctionRecord::new("Spacer", FunctionKind::Spacer),
        "function_actions" => FunctionRecord::new("Function", FunctionKind::ActionList),
        device => {
            let controller = registry
                .custom(device)
                .ok_or_else(|| format!("Unknown function type: '{}'", device))?;
            let function = FunctionRecord::new(
                controller
                    .function_name
                    .clone()
                    .unwrap_or_else(|| "Function Name".to_string()),
                FunctionKind::Custom {
                    device: device.to_string(),
                    custom_options: controller.default_options(),
                },
            );

            if !controller.measurements.is_empty() {
                for info in &controller.measurements {
                    let mut measurement = DeviceMeasurement::new(&function.unique_id, info.channel);
                    measurement.name = info.name.clone().unwrap_or_default();
                    measurement.measurement = info.measurement.clone().unwrap_or_default();
                    measurement.unit = info.unit.clone().unwrap_or_default();
                    measurements.push(measurement);
                }
            } else if controller.measurements_variable_amount {
                // One blank measurement the user fills in later
                measurements.push(DeviceMeasurement::new(&function.unique_id, 0));
            }

            for channel in &controller.channels {
                channels.push(FunctionChannel {
                    unique_id: new_unique_id(),
                    function_id: function.unique_id.clone(),
                    channel: channel.channel,
                    custom_options: options_object(&channel.custom_options),
                });
            }
            function
        }
    };

    Ok(NewFunction {
        function,
        measurements,
        channels,
    })
}

/// Create a Function of `function_type` and append it to the display order
pub fn function_add(ctx: &CoreContext<'_>, function_type: &str) -> Outcome {
    let mut outcome = Outcome::new(TITLE_ADD);

    // Testing mode adds Functions without installing their dependencies
    let unmet = if ctx.config.testing {
        Vec::new()
    } else {
        ctx.unmet_dependencies(function_type)
    };
    if !unmet.is_empty() {
        outcome.dependencies_unmet = true;
        outcome.error(format!(
            "The {} device you're trying to add has unmet dependencies: {}",
            function_type,
            unmet.join(", ")
        ));
    }

    let plan = match plan_function(ctx.registry, function_type) {
        Ok(plan) => plan,
        Err(e) => {
            outcome.error(e);
            return outcome;
        }
    };
    if !outcome.is_ok() {
        return outcome;
    }

    let unique_id = plan.function.unique_id.clone();
    let committed = ctx.db.transaction(|t| {
        t.functions.push(plan.function);
        t.device_measurements.extend(plan.measurements);
        t.function_channels.extend(plan.channels);
        add_display_order(&mut t.display_order.function, &unique_id);
        Ok(())
    });

    match committed {
        Ok(()) => {
            info!(function_id = %unique_id, function_type, "Function added");
            outcome.unique_id = Some(unique_id);
        }
        Err(e) => {
            error!(error = %e, function_type, "Add Function failed");
            outcome.error(e.message);
        }
    }
    outcome
}

pub fn function_mod(ctx: &CoreContext<'_>, form: &FunctionModForm) -> Outcome {
    let mut outcome = Outcome::new(TITLE_MODIFY);
    let result = ctx.db.transaction(|t| {
        let function = t
            .function_mut(&form.function_id)
            .ok_or_else(|| AppError::function_not_found(&form.function_id))?;
        function.name = form.name.clone();
        function.log_level_debug = form.log_level_debug;
        Ok(())
    });
    match result {
        Ok(()) => outcome.unique_id = Some(form.function_id.clone()),
        Err(e) => outcome.error(e.message),
    }
    outcome
}

/// Delete a Function with its Actions, measurements and channels
pub fn function_del(ctx: &CoreContext<'_>, function_id: &str) -> Outcome {
    let mut outcome = Outcome::new(TITLE_DELETE);
    let result = ctx.db.transaction(|t| {
        if t.function(function_id).is_none() {
            return Err(AppError::function_not_found(function_id));
        }
        let actions_before = t.actions.len();
        t.actions.retain(|a| a.function_id != function_id);
        t.device_measurements.retain(|m| m.device_id != function_id);
        t.function_channels.retain(|c| c.function_id != function_id);
        t.functions.retain(|f| f.unique_id != function_id);
        remove_display_order(&mut t.display_order.function, function_id);
        Ok(actions_before - t.actions.len())
    });
    match result {
        Ok(actions_removed) => {
            info!(function_id, actions_removed, "Function deleted");
            outcome.unique_id = Some(function_id.to_string());
        }
        Err(e) => outcome.error(e.message),
    }
    outcome
}

/// Move a Function one place up or down the page
pub fn function_reorder(ctx: &CoreContext<'_>, function_id: &str, direction: Direction) -> Outcome {
    let mut outcome = Outcome::new(TITLE_REORDER);
    let result = ctx.db.transaction(|t| {
        let reordered = reorder(&t.display_order.function, function_id, direction)
            .map_err(AppError::bad_request)?;
        t.display_order.function = reordered;
        Ok(())
    });
    if let Err(e) = result {
        outcome.error(e.message);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::CustomController;
    use crate::models::config::AppConfig;
    use crate::models::types::{Action, ActionType};
    use crate::store::Database;

    struct Fixture {
        db: Database,
        registry: FunctionRegistry,
        config: AppConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let controller: CustomController = serde_json::from_value(serde_json::json!({
                "device": "fan_curve",
                "function_name": "Fan Curve",
                "custom_options": [{ "id": "period", "default_value": 30 }],
                "measurements_variable_amount": true,
                "channels": [
                    { "channel": 0, "custom_options": [{ "id": "name", "default_value": "Fan" }] },
                    { "channel": 1 }
                ],
                "dependencies": [{ "kind": "pip-pypi", "name": "numpy" }]
            }))
            .unwrap();
            Self {
                db: Database::in_memory(),
                registry: FunctionRegistry::new().with_controller(controller),
                config: AppConfig::default(),
            }
        }

        fn ctx(&self) -> CoreContext<'_> {
            CoreContext {
                db: &self.db,
                registry: &self.registry,
                config: &self.config,
            }
        }
    }

    #[test]
    fn test_add_pid_creates_measurements() {
        let fx = Fixture::new();
        let outcome = function_add(&fx.ctx(), "pid_pid");
        assert!(outcome.is_ok(), "{:?}", outcome.errors);
        let id = outcome.unique_id.unwrap();
        assert_eq!(fx.db.read(|t| t.measurements_for(&id).len()), PID_MEASUREMENTS.len());
        assert_eq!(fx.db.read(|t| t.display_order.function.clone()), vec![id]);
    }

    #[test]
    fn test_add_trigger_uses_catalogue_name() {
        let fx = Fixture::new();
        let outcome = function_add(&fx.ctx(), "trigger_sunrise_sunset");
        let id = outcome.unique_id.unwrap();
        let function = fx.db.read(|t| t.function(&id).cloned()).unwrap();
        assert_eq!(function.name, "Trigger: Sunrise/Sunset");
        assert_eq!(function.kind.type_name(), "trigger_sunrise_sunset");
    }

    #[test]
    fn test_add_rejects_empty_and_unknown() {
        let fx = Fixture::new();
        let empty = function_add(&fx.ctx(), "");
        assert_eq!(empty.errors, vec!["Must select a function type"]);
        let unknown = function_add(&fx.ctx(), "warp_drive");
        assert_eq!(unknown.errors, vec!["Unknown function type: 'warp_drive'"]);
        assert_eq!(fx.db.read(|t| t.functions.len()), 0);
    }

    #[test]
    fn test_custom_controller_dependencies_block_creation() {
        let fx = Fixture::new();
        let outcome = function_add(&fx.ctx(), "fan_curve");
        assert!(outcome.dependencies_unmet);
        assert!(outcome.errors[0].contains("unmet dependencies: numpy"));
        assert_eq!(fx.db.read(|t| t.functions.len()), 0);
    }

    #[test]
    fn test_custom_controller_in_testing_mode() {
        let mut fx = Fixture::new();
        fx.config.testing = true;
        let outcome = function_add(&fx.ctx(), "fan_curve");
        assert!(outcome.is_ok(), "{:?}", outcome.errors);
        let id = outcome.unique_id.unwrap();

        let function = fx.db.read(|t| t.function(&id).cloned()).unwrap();
        assert_eq!(function.name, "Fan Curve");
        match function.kind {
            FunctionKind::Custom { custom_options, .. } => {
                assert_eq!(custom_options, serde_json::json!({ "period": 30 }))
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(fx.db.read(|t| t.measurements_for(&id).len()), 1);
        let channels = fx.db.read(|t| {
            t.channels_for(&id)
                .iter()
                .map(|c| (c.channel, c.custom_options.clone()))
                .collect::<Vec<_>>()
        });
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].1, serde_json::json!({ "name": "Fan" }));
        assert_eq!(channels[1].1, serde_json::json!({}));
    }

    #[test]
    fn test_modify() {
        let fx = Fixture::new();
        let id = function_add(&fx.ctx(), "function_actions").unique_id.unwrap();
        let form = FunctionModForm {
            function_id: id.clone(),
            name: "Morning routine".to_string(),
            log_level_debug: true,
        };
        assert!(function_mod(&fx.ctx(), &form).is_ok());
        let function = fx.db.read(|t| t.function(&id).cloned()).unwrap();
        assert_eq!(function.name, "Morning routine");
        assert!(function.log_level_debug);

        let missing = FunctionModForm {
            function_id: "nope".to_string(),
            ..form
        };
        assert!(!function_mod(&fx.ctx(), &missing).is_ok());
    }

    #[test]
    fn test_delete_cascades() {
        let fx = Fixture::new();
        let keep = function_add(&fx.ctx(), "function_spacer").unique_id.unwrap();
        let id = function_add(&fx.ctx(), "pid_pid").unique_id.unwrap();
        fx.db
            .transaction(|t| {
                t.actions.push(Action::new(&id, "pid", ActionType::Email));
                t.actions.push(Action::new(&keep, "function_actions", ActionType::Email));
                Ok(())
            })
            .unwrap();

        let outcome = function_del(&fx.ctx(), &id);
        assert!(outcome.is_ok(), "{:?}", outcome.errors);
        fx.db.read(|t| {
            assert!(t.function(&id).is_none());
            assert!(t.actions_for(&id).is_empty());
            assert!(t.measurements_for(&id).is_empty());
            assert_eq!(t.actions.len(), 1);
            assert_eq!(t.display_order.function, vec![keep.clone()]);
        });

        assert!(!function_del(&fx.ctx(), &id).is_ok());
    }

    #[test]
    fn test_reorder() {
        let fx = Fixture::new();
        let a = function_add(&fx.ctx(), "function_spacer").unique_id.unwrap();
        let b = function_add(&fx.ctx(), "function_spacer").unique_id.unwrap();

        assert!(function_reorder(&fx.ctx(), &b, Direction::Up).is_ok());
        assert_eq!(fx.db.read(|t| t.display_order.function.clone()), vec![b.clone(), a.clone()]);

        let edge = function_reorder(&fx.ctx(), &b, Direction::Up);
        assert_eq!(edge.errors, vec!["Cannot move above the first item in the list"]);
    }
}
