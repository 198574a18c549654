//! Whole-pass behavior tests against the in-memory backend.
//!
//! These tests drive complete passes and assert on the resulting remote
//! state and the backend's operation journal:
//! - A second pass with unchanged desired state issues no mutation
//! - Quota scenarios update, create and delete exactly what differs
//! - Per-entity failures leave the rest of the service converged
//! - Plan enumeration failure aborts the pass after settling background work

#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use std::error::Error as StdError;
use std::sync::Arc;

use ostia_core::{DesiredState, Endpoint, Endpoints, OperationId, Plan, Plans};
use ostia_reconciler::{ActionKind, Error, Reconciler, ReconcileAction, ReconcilerConfig};
use ostia_system_client::{InMemorySystem, OperationKind, SystemApi};

type TestResult = Result<(), Box<dyn StdError>>;

fn setup() -> (Reconciler, Arc<InMemorySystem>) {
    let system = Arc::new(InMemorySystem::new());
    let reconciler = Reconciler::new(system.clone(), ReconcilerConfig::default());
    (reconciler, system)
}

fn widgets_endpoints() -> Endpoints {
    Endpoints::new()
        .with_endpoint(
            Endpoint::new("/widgets")
                .with_operation(OperationId::new("GET", "/widgets").with_metric("hits", 1))
                .with_operation(
                    OperationId::new("POST", "/widgets")
                        .with_metric("hits", 1)
                        .with_metric("writes", 5),
                ),
        )
        .with_endpoint(
            Endpoint::new("/widgets/{id}")
                .with_operation(OperationId::new("DELETE", "/widgets/{id}").with_metric("writes", 1)),
        )
}

fn full_desired() -> DesiredState {
    DesiredState::from_parts(
        widgets_endpoints(),
        Plans::new()
            .with_plan(Plan::new("basic").as_default().with_limit("hits", "month", 100))
            .with_plan(
                Plan::new("pro")
                    .with_limit("hits", "month", 10_000)
                    .with_limit("writes", "day", 500),
            ),
    )
    .with_upstream("https://widgets.internal:8080")
}

/// Given an empty backend
/// When two passes run with the same desired state
/// Then the second pass issues zero create/update/delete operations
#[tokio::test]
async fn second_pass_is_idempotent() -> TestResult {
    let (reconciler, system) = setup();
    let desired = full_desired();

    let first = reconciler.sync(&desired, "widgets").await?;
    assert!(first.all_succeeded(), "first pass failed: {:?}", first.actions_failed);
    assert!(!first.converged());

    system.clear_journal();
    let second = reconciler.sync(&desired, "widgets").await?;

    assert!(second.converged());
    assert_eq!(system.mutations(), vec![]);
    Ok(())
}

/// Given any ordering of the desired endpoints
/// When a pass runs against an empty backend
/// Then every metric is created before any mapping rule
#[test]
fn metrics_are_created_before_mapping_rules() {
    use proptest::prelude::*;

    let endpoints: Vec<Endpoint> = widgets_endpoints().iter().cloned().collect();

    proptest!(|(order in Just(endpoints).prop_shuffle())| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (reconciler, system) = setup();
        let desired = DesiredState::from_parts(order.into_iter().collect(), Plans::new());

        let report = runtime.block_on(reconciler.sync(&desired, "widgets")).unwrap();
        prop_assert!(report.all_succeeded());

        let journal = system.mutations();
        let last_metric = journal
            .iter()
            .rposition(|op| op.kind == OperationKind::CreateMetric);
        let first_rule = journal
            .iter()
            .position(|op| op.kind == OperationKind::CreateMappingRule);
        prop_assert!(last_metric.is_some() && first_rule.is_some());
        prop_assert!(last_metric < first_rule);
    });
}

/// Given remote plan `basic` with `hits/month = 50`
/// When the desired plan has `hits/month = 100` and `hits/minute = 10`
/// Then the pass updates one limit, creates one, and deletes nothing
#[tokio::test]
async fn basic_plan_limits_update_and_create() -> TestResult {
    let (reconciler, system) = setup();
    let service = system.seed_service("widgets")?;
    let hits = system.seed_metric(service.id, "hits")?;
    system.seed_mapping_rule(service.id, "GET", "/widgets", hits.id, 1)?;
    let basic = system.seed_plan(service.id, "basic")?;
    system.seed_limit(basic.id, hits.id, "month", 50)?;

    let desired = DesiredState::from_parts(
        Endpoints::new().with_endpoint(
            Endpoint::new("/widgets")
                .with_operation(OperationId::new("GET", "/widgets").with_metric("hits", 1)),
        ),
        Plans::new().with_plan(
            Plan::new("basic")
                .with_limit("hits", "month", 100)
                .with_limit("hits", "minute", 10),
        ),
    );

    let report = reconciler.reconcile(&desired, &service).await?;

    assert!(report.all_succeeded());
    assert_eq!(report.taken(ActionKind::Update).len(), 1);
    assert!(matches!(
        report.taken(ActionKind::Update)[0],
        ReconcileAction::UpdateLimit { from: 50, to: 100, .. }
    ));
    assert_eq!(report.taken(ActionKind::Create).len(), 1);
    assert!(matches!(
        report.taken(ActionKind::Create)[0],
        ReconcileAction::CreateLimit { max: 10, .. }
    ));
    assert!(report.taken(ActionKind::Delete).is_empty());
    assert!(system.operations(OperationKind::DeletePlanLimit).is_empty());
    Ok(())
}

/// Given a remote rule `GET /widgets -> hits (+1)`
/// When the desired state no longer references `/widgets` or `hits`
/// Then the rule and the metric are both gone after the pass
#[tokio::test]
async fn unreferenced_route_and_metric_are_removed() -> TestResult {
    let (reconciler, system) = setup();
    let service = system.seed_service("widgets")?;
    let hits = system.seed_metric(service.id, "hits")?;
    system.seed_mapping_rule(service.id, "GET", "/widgets", hits.id, 1)?;

    let desired = DesiredState::from_parts(
        Endpoints::new().with_endpoint(
            Endpoint::new("/gadgets")
                .with_operation(OperationId::new("GET", "/gadgets").with_metric("reads", 1)),
        ),
        Plans::new(),
    );

    let report = reconciler.reconcile(&desired, &service).await?;
    assert!(report.all_succeeded(), "failures: {:?}", report.actions_failed);

    let rules = system.list_mapping_rules(service.id).await?;
    assert!(rules.iter().all(|r| r.pattern != "/widgets"));
    assert_eq!(rules.len(), 1);
    let metrics = system.list_metrics(service.id).await?;
    assert_eq!(
        metrics.iter().map(|m| m.system_name.as_str()).collect::<Vec<_>>(),
        vec!["reads"]
    );
    assert_eq!(system.operations(OperationKind::DeleteMetric)[0].target, "hits");
    Ok(())
}

/// Given an endpoint with two operations that normalize to the same rule
/// When a pass runs
/// Then only one mapping rule is created
#[tokio::test]
async fn duplicate_operations_create_one_rule() -> TestResult {
    let (reconciler, system) = setup();
    let desired = DesiredState::from_parts(
        Endpoints::new().with_endpoint(
            Endpoint::new("/a")
                .with_operation(OperationId::new("get", "/a").with_metric("hits", 1))
                .with_operation(OperationId::new("GET", "/a").with_metric("hits", 1)),
        ),
        Plans::new(),
    );

    reconciler.sync(&desired, "widgets").await?;

    assert_eq!(system.operations(OperationKind::CreateMappingRule).len(), 1);
    Ok(())
}

/// Given a desired plan that repeats `(hits, month)`
/// When a pass runs
/// Then the plan ends with exactly one `hits/month` limit
#[tokio::test]
async fn at_most_one_limit_per_metric_and_period() -> TestResult {
    let (reconciler, system) = setup();
    let desired = DesiredState::from_parts(
        Endpoints::new().with_endpoint(
            Endpoint::new("/a").with_operation(OperationId::new("GET", "/a").with_metric("hits", 1)),
        ),
        Plans::new().with_plan(
            Plan::new("basic")
                .with_limit("hits", "month", 10)
                .with_limit("hits", "month", 20),
        ),
    );

    reconciler.sync(&desired, "widgets").await?;
    reconciler.sync(&desired, "widgets").await?;

    let service = system.list_services().await?.remove(0);
    let plan = system.list_application_plans(service.id).await?.remove(0);
    let limits = system.list_plan_limits(plan.id).await?;
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].value, 10);
    Ok(())
}

/// Given a definition that lists plan `basic` twice with different limits
/// When two passes run
/// Then one `basic` plan exists with the first definition's limits
/// And the second pass issues no mutation
#[tokio::test]
async fn repeated_plan_name_converges_on_first_definition() -> TestResult {
    let (reconciler, system) = setup();
    let desired = DesiredState::from_parts(
        Endpoints::new().with_endpoint(
            Endpoint::new("/a").with_operation(OperationId::new("GET", "/a").with_metric("hits", 1)),
        ),
        Plans::new()
            .with_plan(Plan::new("basic").with_limit("hits", "month", 100))
            .with_plan(Plan::new("basic").with_limit("hits", "day", 10)),
    );

    let first = reconciler.sync(&desired, "widgets").await?;
    assert!(first.all_succeeded(), "first pass failed: {:?}", first.actions_failed);
    assert_eq!(first.ignored.len(), 1);
    assert_eq!(system.operations(OperationKind::CreateApplicationPlan).len(), 1);

    system.clear_journal();
    let second = reconciler.sync(&desired, "widgets").await?;

    assert!(second.converged());
    assert_eq!(system.mutations(), vec![]);

    let service = system.list_services().await?.remove(0);
    let plans = system.list_application_plans(service.id).await?;
    assert_eq!(plans.len(), 1);
    let limits = system.list_plan_limits(plans[0].id).await?;
    assert_eq!(limits.len(), 1);
    assert_eq!((limits[0].period.as_str(), limits[0].value), ("month", 100));
    Ok(())
}

/// Given a backend with unrelated metrics, rules, plans and limits
/// When one pass runs
/// Then the remote projections equal the desired state
#[tokio::test]
async fn one_pass_converges_drifted_service() -> TestResult {
    let (reconciler, system) = setup();
    let service = system.seed_service("widgets")?;
    let legacy = system.seed_metric(service.id, "legacy")?;
    let hits = system.seed_metric(service.id, "hits")?;
    system.seed_mapping_rule(service.id, "POST", "/old", legacy.id, 1)?;
    system.seed_mapping_rule(service.id, "GET", "/widgets", hits.id, 3)?;
    system.seed_mapping_rule(service.id, "GET", "/widgets", hits.id, 1)?;
    let old = system.seed_plan(service.id, "old")?;
    system.seed_limit(old.id, legacy.id, "day", 1)?;
    let basic = system.seed_plan(service.id, "basic")?;
    system.seed_limit(basic.id, hits.id, "year", 7)?;

    let desired = full_desired();
    let report = reconciler.reconcile(&desired, &service).await?;
    assert!(report.all_succeeded(), "failures: {:?}", report.actions_failed);

    let status = reconciler.check(&desired, "widgets").await?;
    assert!(status.in_sync(), "status: {status:?}");
    Ok(())
}

/// Given an injected failure when creating the `writes` metric
/// When a pass runs
/// Then the pass is incomplete, `hits` is fully converged, and the next
/// pass finishes the job
#[tokio::test]
async fn failed_entity_does_not_abort_the_pass() -> TestResult {
    let (reconciler, system) = setup();
    system.fail_on_target(OperationKind::CreateMetric, "writes");
    let desired = DesiredState::from_parts(widgets_endpoints(), Plans::new());

    let report = reconciler.sync(&desired, "widgets").await?;

    assert!(!report.all_succeeded());
    assert!(report
        .actions_failed
        .iter()
        .any(|(a, _)| matches!(a, ReconcileAction::CreateMetric { metric } if metric == "writes")));
    assert!(report
        .actions_failed
        .iter()
        .any(|(a, _)| matches!(a, ReconcileAction::CreateMappingRule { metric, .. } if metric == "writes")));
    // GET /widgets and POST /widgets both use hits.
    let hits_rules = report
        .taken(ActionKind::Create)
        .into_iter()
        .filter(|a| matches!(a, ReconcileAction::CreateMappingRule { metric, .. } if metric == "hits"))
        .count();
    assert_eq!(hits_rules, 2);
    assert!(matches!(report.into_result(), Err(Error::PassIncomplete { .. })));

    system.clear_failures();
    let retry = reconciler.sync(&desired, "widgets").await?;
    assert!(retry.all_succeeded());
    assert!(reconciler.check(&desired, "widgets").await?.endpoints);
    Ok(())
}

/// Given a backend that cannot list application plans
/// When a pass with a pending background delete runs
/// Then the pass fails with PlanEnumerationFailed after the delete landed
#[tokio::test]
async fn plan_enumeration_failure_is_fatal() -> TestResult {
    let (reconciler, system) = setup();
    let service = system.seed_service("widgets")?;
    system.seed_metric(service.id, "legacy")?;
    system.fail_on(OperationKind::ListApplicationPlans);

    let result = reconciler.reconcile(&DesiredState::new(), &service).await;

    assert!(matches!(result, Err(Error::PlanEnumerationFailed { .. })));
    assert_eq!(system.operations(OperationKind::DeleteMetric).len(), 1);
    assert!(system.list_metrics(service.id).await?.is_empty());
    assert!(system.operations(OperationKind::LatestProxyConfig).is_empty());
    Ok(())
}

/// Given a desired plan marked default
/// When a pass runs
/// Then that plan is the only default plan remotely
#[tokio::test]
async fn desired_default_plan_is_applied() -> TestResult {
    let (reconciler, system) = setup();
    let desired = full_desired();

    reconciler.sync(&desired, "widgets").await?;

    let service = system.list_services().await?.remove(0);
    let defaults: Vec<_> = system
        .list_application_plans(service.id)
        .await?
        .into_iter()
        .filter(|p| p.default)
        .map(|p| p.name)
        .collect();
    assert_eq!(defaults, vec!["basic".to_string()]);
    assert_eq!(system.operations(OperationKind::SetDefaultApplicationPlan).len(), 1);
    Ok(())
}

/// Given a desired upstream
/// When a pass creates mapping rules
/// Then the proxy points at the upstream and production runs the new config
#[tokio::test]
async fn proxy_is_updated_and_promoted() -> TestResult {
    let (reconciler, system) = setup();
    let desired = full_desired();

    let report = reconciler.sync(&desired, "widgets").await?;

    let service = system.list_services().await?.remove(0);
    let proxy = system.proxy_status(service.id).unwrap();
    assert_eq!(proxy.api_backend.as_deref(), Some("https://widgets.internal:8080"));
    assert!(!proxy.pending_changes);
    assert_eq!(proxy.production_version, Some(proxy.sandbox_version));
    assert!(report
        .actions_taken
        .contains(&ReconcileAction::PromoteProxy { version: 1 }));
    Ok(())
}

/// Given promotion disabled
/// When a pass deploys a new proxy config
/// Then production is left untouched
#[tokio::test]
async fn promotion_can_be_disabled() -> TestResult {
    let system = Arc::new(InMemorySystem::new());
    let reconciler = Reconciler::new(
        system.clone(),
        ReconcilerConfig::default().promote_proxy(false),
    );

    reconciler.sync(&full_desired(), "widgets").await?;

    let service = system.list_services().await?.remove(0);
    assert_eq!(system.proxy_status(service.id).unwrap().production_version, None);
    assert!(system.operations(OperationKind::PromoteProxyConfig).is_empty());
    Ok(())
}
