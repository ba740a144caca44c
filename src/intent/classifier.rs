use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::model::{Classified, FoodRef, Intent, IntentSource};
use super::parser::{self, EditCommand};
use super::vocabulary::{exact_keyword, Keyword};
use crate::error::EngineResult;
use crate::sessions::DetectedFood;
use crate::text::fold;

/// What the user is currently being asked; sent to the AI as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyContext {
    AwaitingConfirmation,
    Editing,
    Idle,
}

impl ClassifyContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassifyContext::AwaitingConfirmation => "nutrition_confirmation",
            ClassifyContext::Editing => "nutrition_edit",
            ClassifyContext::Idle => "free_text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentQuery<'a> {
    pub text: &'a str,
    pub context: ClassifyContext,
    pub pending_foods: &'a [DetectedFood],
}

/// Opaque AI-backed intent service.
#[async_trait]
pub trait IntentService: Send + Sync {
    async fn classify(&self, query: &IntentQuery<'_>) -> EngineResult<Classified>;
}

/// AI first, then the edit parser, then fixed keywords.
#[derive(Clone)]
pub struct IntentClassifier {
    service: Arc<dyn IntentService>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(service: Arc<dyn IntentService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn classify(&self, query: &IntentQuery<'_>) -> Classified {
        let ai = match tokio::time::timeout(self.timeout, self.service.classify(query)).await {
            Ok(Ok(c)) => Some(c),
            Ok(Err(e)) => {
                warn!(error = %e, "intent service failed; using deterministic path");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "intent service timed out");
                None
            }
        };

        if let Some(c) = &ai {
            if c.intent.is_food_edit() {
                debug!(intent = %c.intent.name(), "ai edit intent");
                return c.clone();
            }
        }
        if let Some(cmd) = parser::parse(query.text) {
            return from_command(cmd);
        }
        match ai {
            Some(c) if !c.intent.is_unknown() => c,
            _ => classify_deterministic(query.text),
        }
    }
}

fn from_command(cmd: EditCommand) -> Classified {
    let intent = match cmd {
        EditCommand::Add(food) => Intent::AddFood { food },
        EditCommand::Remove(i) => Intent::RemoveFood {
            target: FoodRef::Index(i),
        },
        EditCommand::Replace { index, food } => Intent::ReplaceFood { index, food },
    };
    Classified::new(intent, 0.9, IntentSource::Parser)
}

/// Pure keyword classifier. No I/O, no side effects.
pub fn classify_deterministic(text: &str) -> Classified {
    match exact_keyword(text) {
        Some(Keyword::Confirm) => return Classified::new(Intent::Confirm, 1.0, IntentSource::Keywords),
        Some(Keyword::Cancel) => return Classified::new(Intent::Cancel, 1.0, IntentSource::Keywords),
        Some(Keyword::Edit) => return Classified::new(Intent::Edit, 1.0, IntentSource::Keywords),
        Some(Keyword::Clear) | None => {}
    }
    if let Some(cmd) = parser::parse(text) {
        return from_command(cmd);
    }

    let t = fold(text);
    let has = |stems: &[&str]| t.split(' ').any(|w| stems.iter().any(|s| w.starts_with(s)));
    let intent = if has(&["cancel", "desist"]) {
        Intent::Cancel
    } else if has(&["confirm", "correto", "perfeito"]) {
        Intent::Confirm
    } else if has(&["corrig", "edit", "alter"]) {
        Intent::Edit
    } else {
        return Classified::unknown();
    };
    Classified::new(intent, 0.6, IntentSource::Keywords)
}
