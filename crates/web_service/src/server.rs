use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use std::sync::Arc;

use bus_client::{BusConnection, ConsumerManager, MemoryBus};
use chat_core::OrchestratorConfig;
use session_manager::{SessionCatalog, TranscriptStore, UserRegistry};
use upstream_client::{UpstreamClient, UpstreamConfig};

use crate::controllers::{
    auth_controller, chat_controller, events_controller, session_controller, stop_controller,
};
use crate::services::{ActiveStreamTable, PushFanout};

/// Shared application state, one instance per process
#[derive(Clone)]
pub struct AppState {
    pub config: OrchestratorConfig,
    pub registry: UserRegistry,
    pub catalog: SessionCatalog,
    pub transcripts: TranscriptStore,
    pub upstream: Arc<UpstreamClient>,
    pub bus: Arc<dyn BusConnection>,
    pub consumers: Arc<ConsumerManager>,
    pub fanout: Arc<PushFanout>,
    pub streams: ActiveStreamTable,
}

impl AppState {
    pub fn new(
        config: OrchestratorConfig,
        upstream: Arc<UpstreamClient>,
        bus: Arc<dyn BusConnection>,
    ) -> Self {
        let consumers = Arc::new(ConsumerManager::new(bus.clone()));
        Self {
            catalog: SessionCatalog::new(config.session_window),
            config,
            registry: UserRegistry::new(),
            transcripts: TranscriptStore::new(),
            upstream,
            bus,
            consumers,
            fanout: Arc::new(PushFanout::new()),
            streams: ActiveStreamTable::new(),
        }
    }

    /// Logout reset: every catalog, transcript, counter, buffer, consumer, and
    /// the bound user are cleared
    pub async fn flush_all(&self) {
        self.consumers.force_cleanup_all().await;
        self.streams.flush().await;
        self.catalog.flush().await;
        self.transcripts.flush().await;
        self.fanout.flush().await;
        self.registry.clear().await;
    }
}

/// Route registration, shared between `run` and the integration tests
pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.configure(chat_controller::config)
        .configure(session_controller::config)
        .configure(stop_controller::config)
        .configure(auth_controller::config)
        .configure(events_controller::config);
}

pub async fn run(config: OrchestratorConfig) -> Result<(), String> {
    info!("Starting chat orchestrator...");

    let mut upstream_config = UpstreamConfig::new(config.upstream_base_url.clone());
    upstream_config.metadata_deadline = config.upstream_metadata_deadline;
    upstream_config.history_deadline = config.upstream_history_deadline;
    upstream_config.chat_deadline = config.upstream_chat_deadline;
    upstream_config.stop_deadline = config.upstream_stop_deadline;
    let upstream = Arc::new(UpstreamClient::new(upstream_config));

    let bus: Arc<dyn BusConnection> = Arc::new(MemoryBus::new());
    let state = AppState::new(config.clone(), upstream, bus);
    let state_data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .configure(app_config)
    })
    .bind(format!("127.0.0.1:{}", config.port))
    .map_err(|e| format!("Failed to bind server: {}", e))?
    .run();

    info!(
        "Chat orchestrator listening on http://127.0.0.1:{}",
        config.port
    );

    server
        .await
        .map_err(|e| format!("Web server error: {}", e))
}
