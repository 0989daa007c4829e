//! Application startup and lifecycle management.

use axum::{
    middleware::from_fn,
    routing::{delete, get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{AccessConfig, GrantPolicy, SchemaValidation};
use crate::handlers::{entitlements, health, preflight, requests, target_groups};
use crate::services::{
    AccessService, ArgOptionCache, ArgOptionSource, Authorizer, Clock, CompatibilityChecker,
    EventPutter, GroupAuthorizer, HttpArgOptionSource, HttpProviderRegistry, LocalWorkflow,
    MongoStore, PreflightService, ProviderRegistry, Store, SystemClock, TargetGroupService,
    TracingEventPutter, Workflow,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub authorizer: Arc<dyn Authorizer>,
    pub target_groups: Arc<TargetGroupService>,
    pub preflights: Arc<PreflightService>,
    pub access: Arc<AccessService>,
    pub arg_options: Arc<ArgOptionCache>,
}

/// External collaborators the services are built from. Production wires the
/// HTTP and MongoDB implementations; tests wire the in-process ones.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub registry: Arc<dyn ProviderRegistry>,
    pub arg_source: Arc<dyn ArgOptionSource>,
    pub workflow: Arc<dyn Workflow>,
    pub authorizer: Arc<dyn Authorizer>,
    pub events: Arc<dyn EventPutter>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        collaborators: Collaborators,
        schema_validation: SchemaValidation,
        grant_policy: GrantPolicy,
    ) -> Self {
        let Collaborators {
            store,
            registry,
            arg_source,
            workflow,
            authorizer,
            events,
            clock,
        } = collaborators;

        let checker = Arc::new(CompatibilityChecker::new(registry));

        Self {
            target_groups: Arc::new(TargetGroupService::new(
                store.clone(),
                checker,
                clock.clone(),
                schema_validation,
            )),
            preflights: Arc::new(PreflightService::new(
                store.clone(),
                authorizer.clone(),
                clock.clone(),
            )),
            access: Arc::new(AccessService::new(
                store.clone(),
                workflow,
                authorizer.clone(),
                events,
                clock.clone(),
                grant_policy,
            )),
            arg_options: Arc::new(ArgOptionCache::new(store.clone(), arg_source, clock)),
            store,
            authorizer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/target-groups",
            post(target_groups::create_target_group).get(target_groups::list_target_groups),
        )
        .route("/target-groups/:id", get(target_groups::get_target_group))
        .route("/target-groups/:id/links", post(target_groups::link_deployment))
        .route(
            "/target-groups/:id/links/:deployment_id",
            delete(target_groups::unlink_deployment),
        )
        .route("/deployments", post(target_groups::register_deployment))
        .route("/targets/:id", put(entitlements::put_target))
        .route("/requests", get(requests::list_all_requests));

    let api = Router::new()
        .route("/target-groups", get(target_groups::list_target_groups))
        .route("/targets", get(entitlements::list_targets))
        .route(
            "/providers/:provider_id/args/:arg_id/options",
            get(entitlements::list_arg_options),
        )
        .route("/preflights", post(preflight::create_preflight))
        .route("/preflights/:id", get(preflight::get_preflight))
        .route(
            "/requests",
            post(requests::create_request).get(requests::list_my_requests),
        )
        .route("/requests/:id", get(requests::get_request))
        .route("/requests/:id/revoke", post(requests::revoke_request))
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_endpoint))
        .nest("/v1", api)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: AccessConfig) -> Result<Self, AppError> {
        let store = MongoStore::connect(
            &config.mongodb.uri,
            &config.mongodb.database,
            config.mongodb.page_size,
        )
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;

        store.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let store: Arc<dyn Store> = Arc::new(store);

        let registry = HttpProviderRegistry::new(&config.registry.url, config.registry.timeout())
            .map_err(|e| AppError::ConfigError(e.into()))?;
        let arg_source = HttpArgOptionSource::new(&config.arg_options.url, config.registry.timeout())
            .map_err(AppError::ConfigError)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let state = AppState::new(
            Collaborators {
                store: store.clone(),
                registry: Arc::new(registry),
                arg_source: Arc::new(arg_source),
                workflow: Arc::new(LocalWorkflow::new(clock.clone())),
                authorizer: Arc::new(GroupAuthorizer::new(store, config.admin_group.clone())),
                events: Arc::new(TracingEventPutter),
                clock,
            },
            config.link_schema_validation,
            config.grants,
        );

        tracing::info!(
            schema_validation = ?config.link_schema_validation,
            admin_group = %config.admin_group,
            "Access services initialized"
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Access service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
