mod auth;
mod handlers;
mod responses;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::domain::ports::{DeliveryStore, EndpointStore, EventStore, WorkQueue};
use crate::infrastructure::InMemoryStore;
use crate::outbound::webhook::{
    DeliveryQueue, DeliveryService, Dispatcher, RetryStrategy, RetrySweeper, WebhookHttpClient,
};
use crate::server::handlers::deliveries::{delivery_stats, list_deliveries, show_delivery};
use crate::server::handlers::endpoints::{
    create_endpoint, delete_endpoint, list_endpoints, show_endpoint, update_endpoint,
};
use crate::server::handlers::events::{
    create_event, delete_event, list_events, show_event, update_event,
};
use crate::server::handlers::health::health_check;
use crate::server::handlers::root::home;
use crate::server::handlers::webhooks::{retry_delivery, trigger};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use auth::USER_ID_HEADER;

#[derive(Clone)]
/// The global application state shared between all request handlers.
struct AppState {
    endpoints: Arc<dyn EndpointStore>,
    events: Arc<dyn EventStore>,
    deliveries: Arc<dyn DeliveryStore>,
    dispatcher: Arc<Dispatcher>,
}

/// Background half of the platform: delivery workers and the retry sweep.
struct Engine {
    queue: Arc<DeliveryQueue>,
    service: Arc<DeliveryService>,
    sweeper: Arc<RetrySweeper>,
    worker_count: usize,
    sweep_interval: std::time::Duration,
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    engine: Engine,
}

impl Server {
    /// Creates the HTTP server together with the delivery engine it feeds.
    pub async fn new(config: &Config) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ]);

        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(DeliveryQueue::with_lane(config.delivery.queue_lane.clone()));
        let work_queue: Arc<dyn WorkQueue> = queue.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            store.clone(),
            store.clone(),
            work_queue.clone(),
        ));

        let http_client = WebhookHttpClient::with_settings(
            config.delivery.request_timeout(),
            &config.delivery.user_agent,
            config.delivery.response_body_limit,
        )
        .wrap_err("Failed to build webhook HTTP client")?;

        let service = Arc::new(
            DeliveryService::new(
                store.clone(),
                store.clone(),
                store.clone(),
                work_queue.clone(),
                http_client,
            )
            .with_retry_strategy(RetryStrategy::new(config.delivery.max_tries))
            .with_max_exceptions(config.delivery.max_exceptions),
        );

        let sweeper = Arc::new(
            RetrySweeper::new(store.clone(), work_queue, config.delivery.max_tries)
                .with_stale_after(config.sweep.stale_after()),
        );

        let state = AppState {
            endpoints: store.clone(),
            events: store.clone(),
            deliveries: store,
            dispatcher,
        };

        let api = Router::new()
            .route("/endpoints", get(list_endpoints).post(create_endpoint))
            .route(
                "/endpoints/{id}",
                get(show_endpoint).put(update_endpoint).delete(delete_endpoint),
            )
            .route("/events", get(list_events).post(create_event))
            .route(
                "/events/{id}",
                get(show_event).put(update_event).delete(delete_event),
            )
            .route("/webhooks/trigger/{event_name}", post(trigger))
            .route("/deliveries", get(list_deliveries))
            .route("/deliveries/stats", get(delivery_stats))
            .route("/deliveries/{id}", get(show_delivery))
            .route("/deliveries/{id}/retry", post(retry_delivery));

        let router = Router::new()
            .route("/", get(home))
            .route("/health", get(health_check))
            .nest("/api", api)
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;

        let engine = Engine {
            queue,
            service,
            sweeper,
            worker_count: config.delivery.worker_count,
            sweep_interval: config.sweep.interval(),
        };

        Ok(Self {
            router,
            listener,
            engine,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map_or(0, |addr| addr.port())
    }

    /// Runs the HTTP server, the delivery workers and the retry sweep until Ctrl-C.
    ///
    /// On shutdown the queue is closed and in-flight attempts are allowed to finish.
    pub async fn run(self) -> Result<()> {
        let Engine {
            queue,
            service,
            sweeper,
            worker_count,
            sweep_interval,
        } = self.engine;

        let workers = service.start(worker_count);
        let sweep = sweeper.start(sweep_interval);

        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweep.abort();
        queue.close().await;
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Delivery worker ended abnormally");
            }
        }

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
