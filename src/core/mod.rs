//! Core Module - authentication and Function/Action management
//!
//! Operations here never fail outright: like the forms they serve, they
//! collect every problem into an [`Outcome`] which the HTTP layer turns
//! into flash messages.

pub mod actions;
pub mod auth;
pub mod functions;
pub mod registry;
pub mod remote_hosts;

use crate::models::config::AppConfig;
use crate::store::Database;
use crate::utils::flash::{flash_success_errors, Flashes};

pub use registry::FunctionRegistry;

/// Everything an operation needs besides its form
#[derive(Clone, Copy)]
pub struct CoreContext<'a> {
    pub db: &'a Database,
    pub registry: &'a FunctionRegistry,
    pub config: &'a AppConfig,
}

/// Result of a form-driven operation
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// "Add Function", "Delete Function Actions", ...
    pub title: String,
    pub errors: Vec<String>,
    /// Set when the device needs libraries that are not installed
    pub dependencies_unmet: bool,
    /// Id of the record created or touched
    pub unique_id: Option<String>,
}

impl Outcome {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, message: impl ToString) {
        self.errors.push(message.to_string());
    }

    pub fn flash_into(&self, flashes: &mut Flashes) {
        flash_success_errors(flashes, &self.errors, &self.title);
    }
}

impl<'a> CoreContext<'a> {
    /// Unmet dependencies of a device
    pub fn unmet_dependencies(&self, device: &str) -> Vec<String> {
        self.registry
            .unmet_dependencies(device, &self.config.installed_dependencies)
    }
}
