use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::config::AppConfig;
use crate::engine::{Engine, EngineParts};
use crate::gateway::whatsapp::WhatsAppGateway;
use crate::gateway::Messenger;
use crate::intent::IntentClassifier;
use crate::meals::{MealLog, MemoryMealLog, PgMealLog};
use crate::reports::{MemoryReportLinks, PgReportLinks, ReportLinks};
use crate::scheduler::{run_idle_worker, TokioScheduler};
use crate::services::HttpAi;
use crate::sessions::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::users::{MemoryUserDirectory, PgUserDirectory, UserDirectory};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub db: Option<PgPool>,
    pub verify_token: String,
}

impl AppState {
    /// Wires the engine from the environment and starts the idle-check worker.
    pub async fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let ai = Arc::new(HttpAi::new(&config.ai)?);
        let gateway = Arc::new(WhatsAppGateway::new(&config.whatsapp));
        let (scheduler, idle_rx) = TokioScheduler::new();
        let cfg = config.engine.clone();

        let db = match (&config.database_url, config.use_memory_store) {
            (Some(url), false) => Some(crate::db::connect(url).await?),
            _ => None,
        };

        let (store, meals, users, reports): (
            Arc<dyn SessionStore>,
            Arc<dyn MealLog>,
            Arc<dyn UserDirectory>,
            Arc<dyn ReportLinks>,
        ) = match &db {
            Some(db) => (
                Arc::new(PgSessionStore::new(db.clone())),
                Arc::new(PgMealLog::new(db.clone())),
                Arc::new(PgUserDirectory::new(db.clone())),
                Arc::new(PgReportLinks::new(db.clone(), cfg.site_url.clone())),
            ),
            None => {
                let users = MemoryUserDirectory::new();
                for seed in &config.seed_users {
                    users.register(&seed.phone, seed.full_name.as_deref());
                }
                info!(seeded = config.seed_users.len(), "in-memory user directory");
                (
                    Arc::new(MemorySessionStore::new()),
                    Arc::new(MemoryMealLog::new()),
                    Arc::new(users),
                    Arc::new(MemoryReportLinks::new(cfg.site_url.clone())),
                )
            }
        };

        let parts = EngineParts {
            store,
            meals,
            users,
            reports,
            classifier: IntentClassifier::new(ai.clone(), cfg.intent_timeout),
            image_types: ai.clone(),
            foods: ai.clone(),
            analyzer: ai.clone(),
            assistant: ai,
            messenger: Messenger::new(gateway, cfg.send_max_attempts, cfg.send_backoff_base),
            scheduler: Arc::new(scheduler),
        };
        info!(persistent = db.is_some(), "engine wired");

        let engine = Engine::new(parts, cfg);
        tokio::spawn(run_idle_worker(idle_rx, Arc::new(engine.clone())));

        Ok(Self {
            engine,
            db,
            verify_token: config.whatsapp.verify_token.clone(),
        })
    }
}

/// Handles on the in-memory collaborators behind [`AppState::fake`].
#[cfg(test)]
pub struct Fixture {
    pub store: Arc<MemorySessionStore>,
    pub meals: Arc<MemoryMealLog>,
    pub users: Arc<MemoryUserDirectory>,
    pub reports: Arc<MemoryReportLinks>,
    pub gateway: Arc<crate::gateway::recording::RecordingGateway>,
    pub scheduler: Arc<crate::scheduler::ManualScheduler>,
    pub ai: Arc<crate::services::scripted::ScriptedAi>,
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> (Self, Fixture) {
        Self::fake_with(crate::config::EngineConfig::default())
    }

    pub fn fake_with(cfg: crate::config::EngineConfig) -> (Self, Fixture) {
        let fx = Fixture {
            store: Arc::new(MemorySessionStore::new()),
            meals: Arc::new(MemoryMealLog::new()),
            users: Arc::new(MemoryUserDirectory::new()),
            reports: Arc::new(MemoryReportLinks::new(cfg.site_url.clone())),
            gateway: Arc::new(Default::default()),
            scheduler: Arc::new(Default::default()),
            ai: Arc::new(Default::default()),
        };
        let parts = EngineParts {
            store: fx.store.clone(),
            meals: fx.meals.clone(),
            users: fx.users.clone(),
            reports: fx.reports.clone(),
            classifier: IntentClassifier::new(fx.ai.clone(), cfg.intent_timeout),
            image_types: fx.ai.clone(),
            foods: fx.ai.clone(),
            analyzer: fx.ai.clone(),
            assistant: fx.ai.clone(),
            messenger: Messenger::new(
                fx.gateway.clone(),
                cfg.send_max_attempts,
                std::time::Duration::from_millis(1),
            ),
            scheduler: fx.scheduler.clone(),
        };
        let state = Self {
            engine: Engine::new(parts, cfg),
            db: None,
            verify_token: "test-verify".into(),
        };
        (state, fx)
    }
}
