//! The server-scoped component container.
//!
//! Every core component is created exactly once here and shared through
//! `Arc<AppState>` as the router state. Tests build the same container
//! over an in-memory store and scripted tools.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use symphony_core::approval::ApprovalStore;
use symphony_core::bus::EventBus;
use symphony_core::conductor::{Conductor, ConductorConfig};
use symphony_core::instrument::{InstrumentCatalog, LoopSpec};
use symphony_core::manager::TaskManager;
use symphony_core::notify::{Notifier, TelegramNotifier};
use symphony_core::rooms::client::RoomClientConfig;
use symphony_core::rooms::{KeywordClassifier, RoomClient, RoomRegistry};
use symphony_core::scheduler::{Scheduler, SchedulerConfig};
use symphony_core::termination::TerminationConfig;
use symphony_core::tools::ToolRegistry;
use symphony_core::trust::TrustTracker;
use symphony_db::models::App;
use symphony_db::store::Store;

use crate::config::ServerConfig;

/// Api key under which unauthenticated task submissions are grouped.
const ANONYMOUS_API_KEY: &str = "anonymous";
const LOCAL_ROOM_ID: &str = "local-server";

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub conductor: Arc<Conductor>,
    pub bus: Arc<EventBus>,
    pub manager: Arc<TaskManager>,
    pub trust: Arc<TrustTracker>,
    pub rooms: Arc<RoomRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub tools: Arc<ToolRegistry>,
    pub anonymous_app: App,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the full component graph over the given store and tool
    /// registry.
    pub async fn build(
        store: Arc<dyn Store>,
        tools: ToolRegistry,
        loop_specs: &[LoopSpec],
        config: &ServerConfig,
    ) -> Result<Arc<Self>> {
        let tools = Arc::new(tools);
        let catalog = InstrumentCatalog::build(&tools, TerminationConfig::default(), loop_specs)
            .map_err(|e| anyhow::anyhow!("instrument catalog failed to build: {e}"))?;

        let bus = Arc::new(EventBus::default());
        let manager = Arc::new(TaskManager::new());
        let trust = Arc::new(TrustTracker::new(Arc::clone(&store)));
        let approvals = Arc::new(ApprovalStore::new());

        // The server is itself a room: local execution competes in room
        // scoring like any sibling.
        let rooms = Arc::new(RoomRegistry::new());
        let local_capabilities: Vec<String> = catalog
            .names()
            .iter()
            .flat_map(|name| {
                catalog
                    .get(name)
                    .map(|i| i.spec().required_capabilities.clone())
                    .unwrap_or_default()
            })
            .collect();
        rooms.register_local(LOCAL_ROOM_ID, "this server", dedup(local_capabilities));
        let room_client = Arc::new(
            RoomClient::new(RoomClientConfig::default()).context("room client failed to build")?,
        );

        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let (Some(token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        {
            notifiers.push(Arc::new(
                TelegramNotifier::new(token, chat_id).context("telegram notifier")?,
            ));
        }

        let conductor_config = ConductorConfig {
            local_room_id: LOCAL_ROOM_ID.to_string(),
            ..ConductorConfig::default()
        };
        let conductor = Arc::new(
            Conductor::new(
                Arc::clone(&store),
                catalog,
                Arc::clone(&bus),
                Arc::clone(&manager),
                Arc::clone(&trust),
                approvals,
                Arc::new(KeywordClassifier::default()),
                conductor_config,
            )
            .with_rooms(Arc::clone(&rooms), room_client)
            .with_notifiers(notifiers),
        );

        let scheduler_config = SchedulerConfig {
            tick_interval: config.heartbeat_interval,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&conductor),
            Arc::clone(&bus),
            scheduler_config,
        )?);

        // Unauthenticated submissions share one app row.
        let anonymous_app = match store.get_app_by_api_key(ANONYMOUS_API_KEY).await? {
            Some(app) => app,
            None => store.insert_app("anonymous", ANONYMOUS_API_KEY).await?,
        };

        Ok(Arc::new(Self {
            store,
            conductor,
            bus,
            manager,
            trust,
            rooms,
            scheduler,
            tools,
            anonymous_app,
            started_at: Utc::now(),
        }))
    }
}

fn dedup(mut items: Vec<String>) -> Vec<String> {
    items.sort_unstable();
    items.dedup();
    items
}
