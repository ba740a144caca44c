//! Turn dispatch: buttons, images and text routed to the session flows.
//!
//! Each turn starts with a snapshot of the user's open sessions read from
//! the store; nothing about "the current question" is kept in memory.

use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::engine::{Engine, TurnContext};
use crate::error::{EngineError, EngineResult};
use crate::flows::copy::{self, ids};
use crate::flows::{MedicalAction, NutritionAction};
use crate::intent::vocabulary::{exact_keyword, is_help, looks_like_meal_report, medical_reply, MedicalReply};
use crate::intent::{ClassifyContext, Intent, IntentQuery};
use crate::services::ImageKind;
use crate::sessions::{BatchStatus, PendingMedicalBatch, PendingNutrition};
use crate::webhook::InboundMessage;

/// What became of one inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Handled,
    Ignored,
    UnknownUser,
    /// The turn failed; the user got an apology and the safe menu.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Nutrition(NutritionAction),
    Medical(MedicalAction),
    NewPhoto,
    Help,
    Feeling,
}

const BUTTONS: &[(&str, ButtonAction)] = &[
    (ids::CONFIRM, ButtonAction::Nutrition(NutritionAction::Confirm)),
    (ids::CANCEL, ButtonAction::Nutrition(NutritionAction::Cancel)),
    (ids::EDIT, ButtonAction::Nutrition(NutritionAction::Edit)),
    (ids::CLEAR, ButtonAction::Nutrition(NutritionAction::Clear)),
    (ids::EDIT_DONE, ButtonAction::Nutrition(NutritionAction::EditDone)),
    (ids::ANALYZE, ButtonAction::Medical(MedicalAction::Analyze)),
    (ids::MORE, ButtonAction::Medical(MedicalAction::More)),
    (ids::MEDICAL_CANCEL, ButtonAction::Medical(MedicalAction::Cancel)),
    (ids::WAIT, ButtonAction::Medical(MedicalAction::Wait)),
    (ids::RETRY, ButtonAction::Medical(MedicalAction::Retry)),
    (ids::NEW_PHOTO, ButtonAction::NewPhoto),
    (ids::HELP, ButtonAction::Help),
    (ids::FEELING_GREAT, ButtonAction::Feeling),
    (ids::FEELING_OK, ButtonAction::Feeling),
    (ids::FEELING_BAD, ButtonAction::Feeling),
];

pub fn action_for_button(id: &str) -> Option<ButtonAction> {
    BUTTONS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, action)| *action)
}

/// Open sessions at the start of a turn.
struct Snapshot {
    nutrition: Option<PendingNutrition>,
    batch: Option<PendingMedicalBatch>,
}

impl Snapshot {
    /// A reply goes to the exam prompt when it is the newer question.
    fn medical_first(&self) -> bool {
        match (&self.nutrition, &self.batch) {
            (Some(n), Some(b)) => {
                b.status == BatchStatus::AwaitingConfirm && b.last_image_at > n.created_at
            }
            _ => false,
        }
    }
}

const MEDICAL_BATCH: &str = "medical batch";

fn nothing_to_act_on(e: &EngineError) -> &'static str {
    match e {
        EngineError::Expired(_) => copy::EXPIRED,
        EngineError::NotFound(what) if what == MEDICAL_BATCH => copy::MEDICAL_NOTHING,
        _ => copy::NOTHING_PENDING,
    }
}

impl Engine {
    pub async fn handle(&self, msg: InboundMessage) -> EngineResult<TurnOutcome> {
        self.handle_at(msg, OffsetDateTime::now_utc()).await
    }

    /// Only store failures escape as `Err`; everything else is answered.
    #[instrument(skip(self, msg, now), fields(phone = %msg.phone))]
    pub async fn handle_at(
        &self,
        msg: InboundMessage,
        now: OffsetDateTime,
    ) -> EngineResult<TurnOutcome> {
        if msg.button_id.is_none() && msg.image_url.is_none() && msg.text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        let Some(user) = self.users.find_by_phone(&msg.phone).await? else {
            info!("message from unknown phone");
            return Ok(TurnOutcome::UnknownUser);
        };
        let ctx = TurnContext {
            user,
            phone: msg.phone.clone(),
            now,
        };

        match self.dispatch(&ctx, &msg).await {
            Ok(()) => Ok(TurnOutcome::Handled),
            Err(e @ (EngineError::NotFound(_) | EngineError::Expired(_))) => {
                info!(reason = %e, "nothing to act on");
                self.messenger
                    .interactive(&ctx.phone, &copy::safe_menu(nothing_to_act_on(&e)))
                    .await?;
                Ok(TurnOutcome::Handled)
            }
            Err(e) => {
                error!(user_id = %ctx.user.id, error = %e, retryable = e.is_retryable(), "turn failed");
                if let Err(send) = self
                    .messenger
                    .interactive(&ctx.phone, &copy::safe_menu(copy::APOLOGY))
                    .await
                {
                    warn!(error = %send, "apology not delivered");
                }
                match e {
                    EngineError::Store(_) => Err(e),
                    _ => Ok(TurnOutcome::Failed),
                }
            }
        }
    }

    async fn dispatch(&self, ctx: &TurnContext, msg: &InboundMessage) -> EngineResult<()> {
        if let Some(id) = msg.button_id.as_deref() {
            return self.on_button(ctx, id).await;
        }
        if let (true, Some(url)) = (msg.has_image, msg.image_url.as_deref()) {
            return self.on_image(ctx, url).await;
        }
        if !msg.text.is_empty() {
            return self.on_text(ctx, &msg.text).await;
        }
        Ok(())
    }

    async fn snapshot(&self, ctx: &TurnContext) -> EngineResult<Snapshot> {
        let nutrition = self.store.active_nutrition(ctx.user.id, ctx.now).await?;
        let batch = self
            .store
            .find_batch(ctx.user.id, &BatchStatus::OPEN, ctx.now)
            .await?;
        Ok(Snapshot { nutrition, batch })
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user.id))]
    async fn on_button(&self, ctx: &TurnContext, id: &str) -> EngineResult<()> {
        let Some(action) = action_for_button(id) else {
            warn!("unknown button");
            return self
                .messenger
                .interactive(&ctx.phone, &copy::safe_menu(copy::MENU))
                .await;
        };

        match action {
            ButtonAction::Nutrition(action) => {
                let session = self.require_nutrition(ctx).await?;
                self.nutrition_action(ctx, session, action).await
            }
            ButtonAction::Medical(action) => {
                let batch = self
                    .store
                    .find_batch(ctx.user.id, &BatchStatus::OPEN, ctx.now)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(MEDICAL_BATCH.into()))?;
                self.medical_action(ctx, batch, action).await
            }
            ButtonAction::NewPhoto => self.messenger.text(&ctx.phone, copy::NEW_PHOTO).await,
            ButtonAction::Help => self.messenger.text(&ctx.phone, copy::HELP).await,
            ButtonAction::Feeling => self.messenger.text(&ctx.phone, copy::feeling(id)).await,
        }
    }

    #[instrument(skip(self, ctx, url), fields(user_id = %ctx.user.id))]
    async fn on_image(&self, ctx: &TurnContext, url: &str) -> EngineResult<()> {
        let kind = self
            .bounded(
                "image-type",
                self.cfg.intent_timeout,
                self.image_types.classify_image(url),
            )
            .await;
        info!(kind = ?kind.as_ref().ok(), "image classified");

        match kind {
            Ok(ImageKind::Food) => {
                let detection = self
                    .bounded(
                        "food-detector",
                        self.cfg.analysis_timeout,
                        self.foods.detect_from_image(url),
                    )
                    .await?;
                self.start_nutrition(ctx, detection, Some(url.to_owned()), "image")
                    .await
            }
            Ok(ImageKind::Medical) => self.medical_image(ctx, url).await,
            Ok(ImageKind::Other) => {
                if self.has_appendable_batch(ctx).await? {
                    self.medical_image(ctx, url).await
                } else {
                    self.messenger
                        .interactive(&ctx.phone, &copy::safe_menu(copy::UNKNOWN_PHOTO))
                        .await
                }
            }
            Err(e) => {
                // An open exam batch still claims the photo.
                if self.has_appendable_batch(ctx).await? {
                    warn!(error = %e, "image type unknown; appending to open batch");
                    self.medical_image(ctx, url).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn has_appendable_batch(&self, ctx: &TurnContext) -> EngineResult<bool> {
        Ok(self
            .store
            .find_batch(ctx.user.id, &BatchStatus::APPENDABLE, ctx.now)
            .await?
            .is_some())
    }

    #[instrument(skip(self, ctx, text), fields(user_id = %ctx.user.id))]
    async fn on_text(&self, ctx: &TurnContext, text: &str) -> EngineResult<()> {
        let snap = self.snapshot(ctx).await?;

        if snap.medical_first() {
            if let (Some(reply), Some(batch)) = (medical_reply(text), snap.batch.clone()) {
                return self.medical_action(ctx, batch, reply.into()).await;
            }
        }

        if let Some(session) = snap.nutrition {
            return self.nutrition_text(ctx, session, text).await;
        }

        if let Some(batch) = snap.batch {
            let reply = medical_reply(text);
            match (batch.status, reply) {
                (BatchStatus::AwaitingConfirm, Some(r)) => {
                    return self.medical_action(ctx, batch, r.into()).await
                }
                (BatchStatus::AwaitingConfirm, None) => {
                    return self
                        .messenger
                        .interactive(&ctx.phone, &copy::medical_prompt(batch.images_count))
                        .await
                }
                (BatchStatus::Collecting, Some(MedicalReply::More)) => {
                    return self.messenger.text(&ctx.phone, copy::MEDICAL_MORE).await
                }
                (BatchStatus::Collecting | BatchStatus::Error, Some(MedicalReply::Cancel)) => {
                    return self.medical_action(ctx, batch, MedicalAction::Cancel).await
                }
                (BatchStatus::Collecting, Some(MedicalReply::Ready)) => {
                    return self.medical_action(ctx, batch, MedicalAction::Analyze).await
                }
                (BatchStatus::Error, Some(MedicalReply::Ready)) => {
                    return self.medical_action(ctx, batch, MedicalAction::Retry).await
                }
                (BatchStatus::Processing, _) => {
                    return self.messenger.text(&ctx.phone, copy::MEDICAL_IN_PROGRESS).await
                }
                (BatchStatus::Collecting, None) => {
                    self.messenger
                        .interactive(&ctx.phone, &copy::medical_reminder(batch.images_count))
                        .await?;
                }
                _ => {}
            }
        }

        if exact_keyword(text).is_some() {
            let session = self.require_nutrition(ctx).await?;
            return self.nutrition_text(ctx, session, text).await;
        }

        if is_help(text) {
            return self.messenger.text(&ctx.phone, copy::HELP).await;
        }

        if self.is_meal_report(text).await {
            let detection = self
                .bounded(
                    "food-detector",
                    self.cfg.analysis_timeout,
                    self.foods.detect_from_text(text),
                )
                .await?;
            return self.start_nutrition(ctx, detection, None, "text").await;
        }

        self.answer_free_text(ctx, text).await
    }

    async fn is_meal_report(&self, text: &str) -> bool {
        if looks_like_meal_report(text) {
            return true;
        }
        let classified = self
            .classifier
            .classify(&IntentQuery {
                text,
                context: ClassifyContext::Idle,
                pending_foods: &[],
            })
            .await;
        matches!(classified.intent, Intent::AddFood { .. })
    }

    /// Companion answer for text that belongs to no session.
    pub(crate) async fn answer_free_text(&self, ctx: &TurnContext, text: &str) -> EngineResult<()> {
        let reply = self
            .bounded(
                "assistant",
                self.cfg.intent_timeout,
                self.assistant.reply(ctx.user.first_name(), text),
            )
            .await;
        match reply {
            Ok(answer) if !answer.trim().is_empty() => {
                self.messenger.text(&ctx.phone, answer.trim()).await
            }
            Ok(_) => {
                self.messenger
                    .interactive(&ctx.phone, &copy::safe_menu(copy::ASSISTANT_FALLBACK))
                    .await
            }
            Err(e) => {
                warn!(error = %e, "assistant unavailable");
                self.messenger
                    .interactive(&ctx.phone, &copy::safe_menu(copy::ASSISTANT_FALLBACK))
                    .await
            }
        }
    }
}
