//! The conversational session engine: collaborators plus per-turn context.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{error, instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::Messenger;
use crate::intent::IntentClassifier;
use crate::meals::MealLog;
use crate::reports::ReportLinks;
use crate::scheduler::{IdleCheck, IdleCheckHandler, Scheduler};
use crate::services::{Assistant, ExamAnalyzer, FoodDetector, ImageTypeDetector};
use crate::sessions::SessionStore;
use crate::users::{User, UserDirectory};

/// Everything one turn needs to know about who is talking and when.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user: User,
    pub phone: String,
    pub now: OffsetDateTime,
}

/// Collaborators behind trait objects so tests can swap any of them.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) meals: Arc<dyn MealLog>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) reports: Arc<dyn ReportLinks>,
    pub(crate) classifier: IntentClassifier,
    pub(crate) image_types: Arc<dyn ImageTypeDetector>,
    pub(crate) foods: Arc<dyn FoodDetector>,
    pub(crate) analyzer: Arc<dyn ExamAnalyzer>,
    pub(crate) assistant: Arc<dyn Assistant>,
    pub(crate) messenger: Messenger,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) cfg: EngineConfig,
}

pub struct EngineParts {
    pub store: Arc<dyn SessionStore>,
    pub meals: Arc<dyn MealLog>,
    pub users: Arc<dyn UserDirectory>,
    pub reports: Arc<dyn ReportLinks>,
    pub classifier: IntentClassifier,
    pub image_types: Arc<dyn ImageTypeDetector>,
    pub foods: Arc<dyn FoodDetector>,
    pub analyzer: Arc<dyn ExamAnalyzer>,
    pub assistant: Arc<dyn Assistant>,
    pub messenger: Messenger,
    pub scheduler: Arc<dyn Scheduler>,
}

impl Engine {
    pub fn new(parts: EngineParts, cfg: EngineConfig) -> Self {
        Self {
            store: parts.store,
            meals: parts.meals,
            users: parts.users,
            reports: parts.reports,
            classifier: parts.classifier,
            image_types: parts.image_types,
            foods: parts.foods,
            analyzer: parts.analyzer,
            assistant: parts.assistant,
            messenger: parts.messenger,
            scheduler: parts.scheduler,
            cfg,
        }
    }

    /// Bounds an external call; elapsing counts as a service failure.
    pub(crate) async fn bounded<T>(
        &self,
        service: &'static str,
        limit: Duration,
        call: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(EngineError::external(service, "timed out")))
    }
}

#[async_trait]
impl IdleCheckHandler for Engine {
    #[instrument(skip(self), fields(batch_id = %check.batch_id, expected = check.expected_count))]
    async fn on_idle_check(&self, check: IdleCheck) {
        if let Err(e) = self.prompt_if_idle(check).await {
            error!(error = %e, "idle check failed");
        }
    }
}
