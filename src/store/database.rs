//! Record store
//!
//! All tables live behind one `RwLock`. Writers work on a copy inside
//! [`Database::transaction`]; the copy replaces the live tables (and is
//! written to the JSON snapshot, when configured) only if the closure
//! returns `Ok`. A failed operation therefore leaves nothing behind.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{
    Action, Camera, DeviceMeasurement, DisplayOrder, FunctionChannel, FunctionRecord, Misc,
    RemoteHost, Role, User,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub functions: Vec<FunctionRecord>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub device_measurements: Vec<DeviceMeasurement>,
    #[serde(default)]
    pub function_channels: Vec<FunctionChannel>,
    #[serde(default)]
    pub remote_hosts: Vec<RemoteHost>,
    #[serde(default)]
    pub cameras: Vec<Camera>,
    #[serde(default)]
    pub misc: Misc,
    #[serde(default)]
    pub display_order: DisplayOrder,
}

impl Tables {
    // ---- users ----

    pub fn admin_count(&self) -> usize {
        self.users.iter().filter(|u| u.role == Role::Admin).count()
    }

    pub fn user(&self, id: u64) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Case-insensitive lookup, as typed on the login form
    pub fn user_by_name_ci(&self, name: &str) -> Option<&User> {
        let name = name.to_lowercase();
        self.users.iter().find(|u| u.name.to_lowercase() == name)
    }

    /// Exact lookup, as sent by remote hosts
    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn insert_user(&mut self, mut user: User) -> AppResult<u64> {
        if self.user_by_name_ci(&user.name).is_some() {
            return Err(AppError::conflict(format!("User name already exists: {}", user.name)));
        }
        user.id = self.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let id = user.id;
        self.users.push(user);
        Ok(id)
    }

    pub fn user_mut(&mut self, id: u64) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    // ---- functions ----

    pub fn function(&self, unique_id: &str) -> Option<&FunctionRecord> {
        self.functions.iter().find(|f| f.unique_id == unique_id)
    }

    pub fn function_mut(&mut self, unique_id: &str) -> Option<&mut FunctionRecord> {
        self.functions.iter_mut().find(|f| f.unique_id == unique_id)
    }

    /// Functions in display order, followed by any missing from the order
    pub fn functions_in_order(&self) -> Vec<&FunctionRecord> {
        let mut ordered: Vec<&FunctionRecord> = self
            .display_order
            .function
            .iter()
            .filter_map(|id| self.function(id))
            .collect();
        for function in &self.functions {
            if !self.display_order.function.contains(&function.unique_id) {
                ordered.push(function);
            }
        }
        ordered
    }

    // ---- actions ----

    pub fn action(&self, unique_id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.unique_id == unique_id)
    }

    pub fn action_mut(&mut self, unique_id: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.unique_id == unique_id)
    }

    pub fn actions_for(&self, function_id: &str) -> Vec<&Action> {
        self.actions.iter().filter(|a| a.function_id == function_id).collect()
    }

    // ---- measurements & channels ----

    pub fn measurements_for(&self, device_id: &str) -> Vec<&DeviceMeasurement> {
        self.device_measurements
            .iter()
            .filter(|m| m.device_id == device_id)
            .collect()
    }

    pub fn channels_for(&self, function_id: &str) -> Vec<&FunctionChannel> {
        self.function_channels
            .iter()
            .filter(|c| c.function_id == function_id)
            .collect()
    }

    // ---- cameras & remote hosts ----

    pub fn camera(&self, unique_id: &str) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.unique_id == unique_id)
    }

    pub fn remote_host(&self, unique_id: &str) -> Option<&RemoteHost> {
        self.remote_hosts.iter().find(|r| r.unique_id == unique_id)
    }
}

pub struct Database {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl Database {
    /// Volatile store, used by tests and throwaway deployments
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
        }
    }

    /// Store backed by a JSON snapshot; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let raw = fs::read(&path)?;
            let tables: Tables = serde_json::from_slice(&raw).map_err(|e| {
                AppError::with_source(
                    ErrorCode::StoreCorrupt,
                    format!("Cannot decode snapshot {}", path.display()),
                    e,
                )
            })?;
            info!(
                path = %path.display(),
                users = tables.users.len(),
                functions = tables.functions.len(),
                "Record store loaded"
            );
            tables
        } else {
            info!(path = %path.display(), "Record store created");
            Tables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
        })
    }

    /// Run a read-only query against the live tables
    pub fn read<R>(&self, query: impl FnOnce(&Tables) -> R) -> R {
        let guard = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        query(&guard)
    }

    /// Apply `change` to a copy of the tables and commit it on success
    pub fn transaction<R>(&self, change: impl FnOnce(&mut Tables) -> AppResult<R>) -> AppResult<R> {
        let mut guard = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = guard.clone();
        let result = change(&mut working)?;
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &working)?;
        }
        *guard = working;
        debug!("Transaction committed");
        Ok(result)
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(tables)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{FunctionKind, new_unique_id};

    fn user(name: &str, role: Role) -> User {
        User {
            id: 0,
            unique_id: new_unique_id(),
            name: name.to_string(),
            email: String::new(),
            password_hash: String::new(),
            role,
            theme: "slate".to_string(),
            remember_token: None,
        }
    }

    #[test]
    fn test_failed_transaction_leaves_tables_untouched() {
        let db = Database::in_memory();
        let result: AppResult<()> = db.transaction(|t| {
            t.functions.push(FunctionRecord::new("x", FunctionKind::Spacer));
            Err(AppError::conflict("nope"))
        });
        assert!(result.is_err());
        assert_eq!(db.read(|t| t.functions.len()), 0);
    }

    #[test]
    fn test_user_ids_and_uniqueness() {
        let db = Database::in_memory();
        let first = db.transaction(|t| t.insert_user(user("alice", Role::Admin))).unwrap();
        let second = db.transaction(|t| t.insert_user(user("bob", Role::Guest))).unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(db.transaction(|t| t.insert_user(user("ALICE", Role::Guest))).is_err());
        assert_eq!(db.read(|t| t.admin_count()), 1);
        assert!(db.read(|t| t.user_by_name_ci("Alice").is_some()));
        assert!(db.read(|t| t.user_by_name("Alice").is_none()));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdant.json");
        {
            let db = Database::open(&path).unwrap();
            db.transaction(|t| {
                let f = FunctionRecord::new("Spacer", FunctionKind::Spacer);
                t.display_order.function.push(f.unique_id.clone());
                t.functions.push(f);
                Ok(())
            })
            .unwrap();
        }
        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.read(|t| t.functions.len()), 1);
        assert_eq!(reopened.read(|t| t.display_order.function.len()), 1);
    }

    #[test]
    fn test_functions_in_order() {
        let db = Database::in_memory();
        db.transaction(|t| {
            let a = FunctionRecord::new("a", FunctionKind::Spacer);
            let b = FunctionRecord::new("b", FunctionKind::ActionList);
            t.display_order.function = vec![b.unique_id.clone()];
            t.functions.push(a);
            t.functions.push(b);
            Ok(())
        })
        .unwrap();
        let names: Vec<String> = db.read(|t| {
            t.functions_in_order().iter().map(|f| f.name.clone()).collect()
        });
        assert_eq!(names, vec!["b", "a"]);
    }
}
