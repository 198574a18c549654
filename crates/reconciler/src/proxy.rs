//! Gateway proxy phase.
//!
//! Points the proxy at the desired upstream and promotes the latest
//! sandbox configuration to production.

use ostia_core::DesiredState;
use ostia_system_client::{Environment, Proxy};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::PassContext;
use crate::types::{Phase, ReconcileAction};

/// Whether the proxy must be redeployed.
///
/// Changing the routing table also needs a redeploy so the gateway picks up
/// the new mapping rules.
pub fn needs_update(proxy: &Proxy, upstream: &str, rules_changed: bool) -> bool {
    rules_changed || proxy.api_backend.as_deref() != Some(upstream)
}

/// Version to promote, if sandbox is ahead of production.
///
/// A missing production configuration counts as version 0.
pub fn promotion_target(sandbox: Option<u64>, production: Option<u64>) -> Option<u64> {
    let sandbox = sandbox?;
    (sandbox != production.unwrap_or(0)).then_some(sandbox)
}

pub(crate) async fn reconcile(ctx: &mut PassContext<'_>, desired: &DesiredState) -> Result<()> {
    let service = ctx.service;
    let mut applied = false;

    if let Some(upstream) = desired.upstream.as_deref() {
        let proxy = ctx
            .system
            .read_proxy(service.id)
            .await
            .map_err(|e| Error::read_failed(Phase::Proxy, e))?;

        if needs_update(&proxy, upstream, ctx.report.changed(Phase::MappingRules)) {
            let action = ReconcileAction::UpdateProxy {
                api_backend: upstream.to_string(),
            };
            match ctx.system.update_proxy(service.id, upstream).await {
                Ok(_) => {
                    info!(service = %service.system_name, api_backend = upstream, "Updated proxy");
                    ctx.report.record_success(action);
                    applied = true;
                }
                Err(e) => {
                    warn!(service = %service.system_name, error = %e, "Failed to update proxy");
                    ctx.report.record_failure(action, e);
                }
            }
        }
    }

    if ctx.config.promote_proxy {
        let (sandbox, production) = tokio::try_join!(
            ctx.system.latest_proxy_config(service.id, Environment::Sandbox),
            ctx.system.latest_proxy_config(service.id, Environment::Production)
        )
        .map_err(|e| Error::read_failed(Phase::Proxy, e))?;

        if let Some(version) = promotion_target(
            sandbox.map(|c| c.version),
            production.map(|c| c.version),
        ) {
            let action = ReconcileAction::PromoteProxy { version };
            match ctx.system.promote_proxy_config(service.id, version).await {
                Ok(_) => {
                    info!(service = %service.system_name, version, "Promoted proxy configuration");
                    ctx.report.record_success(action);
                    applied = true;
                }
                Err(e) => {
                    warn!(service = %service.system_name, version, error = %e, "Failed to promote proxy configuration");
                    ctx.report.record_failure(action, e);
                }
            }
        }
    }

    if !applied && !ctx.report.actions_failed.iter().any(|(a, _)| a.phase() == Phase::Proxy) {
        debug!(service = %service.system_name, "Proxy in sync");
        ctx.report.skip(Phase::Proxy);
    }

    Ok(())
}
