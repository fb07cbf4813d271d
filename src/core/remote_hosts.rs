//! Remote installations administered from this one

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Outcome;
use crate::models::errors::AppError;
use crate::models::types::{new_unique_id, RemoteHost};
use crate::providers::RemoteHostClient;
use crate::store::Database;
use crate::utils::display_order::{add_display_order, remove_display_order};

pub const TITLE_ADD: &str = "Add Remote Host";
pub const TITLE_DELETE: &str = "Delete Remote Host";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSetupForm {
    pub form_name: String,
    pub add: Option<String>,
    pub delete: Option<String>,
    pub host: String,
    pub username: String,
    pub password: String,
    pub remote_id: String,
}

/// Whether a remote host still accepts the stored credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum HostAuth {
    Ok,
    Rejected,
    Unreachable(String),
}

pub async fn remote_host_add(db: &Database, client: &dyn RemoteHostClient, form: &RemoteSetupForm) -> Outcome {
    let mut outcome = Outcome::new(TITLE_ADD);
    let host = form.host.trim();
    if host.is_empty() || form.username.trim().is_empty() || form.password.is_empty() {
        outcome.error("Host, user name and password must be set");
        return outcome;
    }
    if db.read(|t| t.remote_hosts.iter().any(|r| r.host == host)) {
        outcome.error(format!("Remote host already exists: {}", host));
        return outcome;
    }

    let password_hash = match client.fetch_credentials(host, &form.username, &form.password).await {
        Ok(hash) => hash,
        Err(e) => {
            outcome.error(e.message);
            return outcome;
        }
    };

    let remote = RemoteHost {
        unique_id: new_unique_id(),
        host: host.to_string(),
        username: form.username.clone(),
        password_hash,
    };
    let remote_id = remote.unique_id.clone();
    match db.transaction(|t| {
        add_display_order(&mut t.display_order.remote_host, &remote_id);
        t.remote_hosts.push(remote);
        Ok(())
    }) {
        Ok(()) => {
            info!(host, "Remote host added");
            outcome.unique_id = Some(remote_id);
        }
        Err(e) => outcome.error(e.message),
    }
    outcome
}

pub fn remote_host_del(db: &Database, remote_id: &str) -> Outcome {
    let mut outcome = Outcome::new(TITLE_DELETE);
    let result = db.transaction(|t| {
        let Some(host) = t.remote_host(remote_id).map(|r| r.host.clone()) else {
            return Err(AppError::bad_request(format!("Remote host not found: {}", remote_id)));
        };
        t.remote_hosts.retain(|r| r.unique_id != remote_id);
        remove_display_order(&mut t.display_order.remote_host, remote_id);
        Ok(host)
    });
    match result {
        Ok(host) => {
            info!(%host, "Remote host deleted");
            outcome.unique_id = Some(remote_id.to_string());
        }
        Err(e) => outcome.error(e.message),
    }
    outcome
}

/// Ask every remote host whether our stored credentials still work
pub async fn host_auth_statuses(
    db: &Database,
    client: &dyn RemoteHostClient,
) -> Vec<(RemoteHost, HostAuth)> {
    let hosts = db.read(|t| {
        t.display_order
            .remote_host
            .iter()
            .filter_map(|id| t.remote_host(id).cloned())
            .collect::<Vec<_>>()
    });

    let mut statuses = Vec::with_capacity(hosts.len());
    for host in hosts {
        let status = match client
            .check_auth(&host.host, &host.username, &host.password_hash)
            .await
        {
            Ok(true) => HostAuth::Ok,
            Ok(false) => HostAuth::Rejected,
            Err(e) => {
                warn!(host = %host.host, error = %e, "Remote host unreachable");
                HostAuth::Unreachable(e.message)
            }
        };
        statuses.push((host, status));
    }
    statuses
}
