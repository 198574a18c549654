//! Service scope resolution.
//!
//! Every remote entity belongs to one service, matched by system name.

use ostia_system_client::{Service, SystemApi};
use tracing::info;

use crate::error::{Error, Result};

/// Find the service with `system_name`.
///
/// Returns [`Error::ServiceNotFound`] when no such service exists.
pub async fn resolve_service(system: &dyn SystemApi, system_name: &str) -> Result<Service> {
    system
        .list_services()
        .await?
        .into_iter()
        .find(|service| service.system_name == system_name)
        .ok_or_else(|| Error::service_not_found(system_name))
}

/// Find the service with `system_name`, creating it when missing.
pub async fn ensure_service(system: &dyn SystemApi, system_name: &str) -> Result<Service> {
    match resolve_service(system, system_name).await {
        Err(Error::ServiceNotFound { .. }) => {
            let service = system.create_service(system_name, system_name).await?;
            info!(service = system_name, id = %service.id, "Created service");
            Ok(service)
        }
        other => other,
    }
}

/// Delete the service with `system_name`.
///
/// A service that does not exist counts as removed. Returns whether a
/// service was deleted.
pub async fn remove_service(system: &dyn SystemApi, system_name: &str) -> Result<bool> {
    let service = match resolve_service(system, system_name).await {
        Ok(service) => service,
        Err(Error::ServiceNotFound { .. }) => return Ok(false),
        Err(e) => return Err(e),
    };

    match system.delete_service(service.id).await {
        Ok(()) => {
            info!(service = system_name, id = %service.id, "Deleted service");
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
