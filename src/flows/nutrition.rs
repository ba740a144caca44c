//! Meal-confirmation state machine.
//!
//! `AWAITING_CONFIRMATION -> {CONFIRMED, CANCELLED, EDITING, CLEARED}` and
//! `EDITING -> AWAITING_CONFIRMATION`. Every finalizing write is conditional
//! on the session still being unprocessed, so repeated confirms are no-ops.

use tracing::{info, instrument, warn};

use super::copy;
use crate::engine::{Engine, TurnContext};
use crate::error::{EngineError, EngineResult};
use crate::intent::vocabulary::{exact_keyword, is_almost_confirmation, is_edit_done, Keyword};
use crate::intent::{ClassifyContext, FoodRef, Intent, IntentQuery};
use crate::meals::nutrition::totals_for;
use crate::meals::NewMealEntry;
use crate::services::FoodDetection;
use crate::sessions::{
    DetectedFood, MealType, NutritionOutcome, NutritionPhase, PendingNutrition,
};
use crate::text::fold;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutritionAction {
    Confirm,
    Cancel,
    Edit,
    Clear,
    EditDone,
}

fn usable(food: &DetectedFood) -> Result<DetectedFood, String> {
    food.clone()
        .checked()
        .ok_or_else(|| format!("Não entendi a quantidade de \"{}\".", food.name))
}

/// Applies one edit intent to the list. `Err` carries a user-facing reason.
pub fn apply_edit(foods: &mut Vec<DetectedFood>, intent: &Intent) -> Result<(), String> {
    match intent {
        Intent::AddFood { food } => {
            foods.push(usable(food)?);
            Ok(())
        }
        Intent::RemoveFood {
            target: FoodRef::Index(i),
        } => {
            if *i == 0 || *i > foods.len() {
                return Err(format!("Não existe o item {i}."));
            }
            foods.remove(i - 1);
            Ok(())
        }
        Intent::RemoveFood {
            target: FoodRef::Name(name),
        } => {
            let wanted = fold(name);
            let pos = foods
                .iter()
                .rposition(|f| fold(&f.name) == wanted)
                .or_else(|| foods.iter().position(|f| fold(&f.name).contains(&wanted)));
            match pos {
                Some(p) => {
                    foods.remove(p);
                    Ok(())
                }
                None => Err(format!("Não encontrei \"{name}\" na lista.")),
            }
        }
        Intent::ReplaceFood { index, food } => {
            if *index == 0 || *index > foods.len() {
                return Err(format!("Não existe o item {index}."));
            }
            foods[index - 1] = usable(food)?;
            Ok(())
        }
        _ => Err("Comando de edição não reconhecido.".into()),
    }
}

impl Engine {
    /// Opens a new session for freshly detected foods, superseding older ones.
    #[instrument(skip(self, ctx, detection), fields(user_id = %ctx.user.id, foods = detection.foods.len()))]
    pub(crate) async fn start_nutrition(
        &self,
        ctx: &TurnContext,
        detection: FoodDetection,
        image_url: Option<String>,
        source: &'static str,
    ) -> EngineResult<()> {
        if detection.foods.is_empty() {
            self.messenger.text(&ctx.phone, copy::NO_FOOD_FOUND).await?;
            return Ok(());
        }

        let superseded = self.store.supersede_nutrition(ctx.user.id).await?;
        if superseded > 0 {
            info!(superseded, "older pending meals superseded");
        }

        let meal_type = MealType::at(ctx.now, self.cfg.local_offset);
        let foods = detection.foods;
        let totals = totals_for(&foods);

        let entry = NewMealEntry {
            user_id: ctx.user.id,
            meal_type,
            meal_date: ctx.now.to_offset(self.cfg.local_offset).date(),
            image_url: image_url.clone(),
            source,
            foods: foods.clone(),
            totals,
            ai_raw: detection.raw,
        };
        let linked_record_id = match self.meals.create_unconfirmed(&entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "meal log row not created; session continues unlinked");
                None
            }
        };

        let session = PendingNutrition {
            id: uuid::Uuid::new_v4(),
            user_id: ctx.user.id,
            phone: ctx.phone.clone(),
            meal_type,
            detected_foods: foods,
            totals,
            linked_record_id,
            image_url,
            waiting_confirmation: true,
            waiting_edit: false,
            confirmed: None,
            is_processed: false,
            outcome: None,
            created_at: ctx.now,
            expires_at: ctx.now + self.cfg.nutrition_ttl,
        };
        self.store.insert_nutrition(&session).await?;
        info!(session_id = %session.id, "nutrition session opened");

        self.messenger
            .interactive(
                &ctx.phone,
                &copy::nutrition_menu(meal_type, &session.detected_foods, &session.totals),
            )
            .await
    }

    /// Text reply while a nutrition session is open.
    #[instrument(skip(self, ctx, session, text), fields(user_id = %ctx.user.id, session_id = %session.id))]
    pub(crate) async fn nutrition_text(
        &self,
        ctx: &TurnContext,
        session: PendingNutrition,
        text: &str,
    ) -> EngineResult<()> {
        let phase = session.phase();

        if phase == NutritionPhase::Editing && is_edit_done(text) {
            return self.nutrition_action(ctx, session, NutritionAction::EditDone).await;
        }
        match exact_keyword(text) {
            Some(Keyword::Confirm) => {
                return self.nutrition_action(ctx, session, NutritionAction::Confirm).await
            }
            Some(Keyword::Cancel) => {
                return self.nutrition_action(ctx, session, NutritionAction::Cancel).await
            }
            Some(Keyword::Edit) => {
                return self.nutrition_action(ctx, session, NutritionAction::Edit).await
            }
            Some(Keyword::Clear) => {
                return self.nutrition_action(ctx, session, NutritionAction::Clear).await
            }
            None => {}
        }

        let context = match phase {
            NutritionPhase::AwaitingConfirmation => ClassifyContext::AwaitingConfirmation,
            NutritionPhase::Editing => ClassifyContext::Editing,
        };
        let classified = self
            .classifier
            .classify(&IntentQuery {
                text,
                context,
                pending_foods: &session.detected_foods,
            })
            .await;
        info!(intent = %classified.intent.name(), source = ?classified.source, "classified");

        match classified.intent {
            Intent::Confirm => self.nutrition_action(ctx, session, NutritionAction::Confirm).await,
            Intent::Cancel => self.nutrition_action(ctx, session, NutritionAction::Cancel).await,
            Intent::Edit => self.nutrition_action(ctx, session, NutritionAction::Edit).await,
            ref edit if edit.is_food_edit() => self.edit_foods(ctx, session, edit).await,
            _ if is_almost_confirmation(text) => {
                self.messenger
                    .interactive(
                        &ctx.phone,
                        &copy::almost_menu(&session.detected_foods, &session.totals),
                    )
                    .await
            }
            _ => {
                // Unconfirmed state is restated before anything else is answered.
                self.messenger
                    .text(&ctx.phone, &copy::pending_reminder(session.meal_type))
                    .await?;
                self.answer_free_text(ctx, text).await
            }
        }
    }

    #[instrument(skip(self, ctx, session), fields(user_id = %ctx.user.id, session_id = %session.id))]
    pub(crate) async fn nutrition_action(
        &self,
        ctx: &TurnContext,
        mut session: PendingNutrition,
        action: NutritionAction,
    ) -> EngineResult<()> {
        match action {
            NutritionAction::Confirm => self.confirm_nutrition(ctx, session).await,
            NutritionAction::Cancel => {
                // Session first: a leftover unconfirmed row never counts towards totals.
                if !self
                    .store
                    .finalize_nutrition(session.id, NutritionOutcome::Cancelled)
                    .await?
                {
                    return Ok(());
                }
                if let Some(id) = session.linked_record_id {
                    self.meals.discard(id).await?;
                }
                self.messenger.text(&ctx.phone, copy::CANCELLED).await
            }
            NutritionAction::Clear => {
                if !self
                    .store
                    .finalize_nutrition(session.id, NutritionOutcome::Cleared)
                    .await?
                {
                    return Ok(());
                }
                if let Some(id) = session.linked_record_id {
                    self.meals.annotate(id, "discarded via whatsapp").await?;
                }
                self.messenger.text(&ctx.phone, copy::CLEARED).await
            }
            NutritionAction::Edit => {
                session.enter_edit();
                self.store.save_nutrition(&session).await?;
                self.messenger
                    .interactive(
                        &ctx.phone,
                        &copy::edit_menu(&session.detected_foods, &session.totals),
                    )
                    .await
            }
            NutritionAction::EditDone => {
                session.leave_edit();
                self.store.save_nutrition(&session).await?;
                self.messenger
                    .interactive(
                        &ctx.phone,
                        &copy::nutrition_menu(
                            session.meal_type,
                            &session.detected_foods,
                            &session.totals,
                        ),
                    )
                    .await
            }
        }
    }

    /// Totals come from the deterministic table over the current list.
    async fn confirm_nutrition(
        &self,
        ctx: &TurnContext,
        session: PendingNutrition,
    ) -> EngineResult<()> {
        let totals = totals_for(&session.detected_foods);
        let record_id = match session.linked_record_id {
            Some(id) => id,
            None => {
                let entry = NewMealEntry {
                    user_id: ctx.user.id,
                    meal_type: session.meal_type,
                    meal_date: session.created_at.to_offset(self.cfg.local_offset).date(),
                    image_url: session.image_url.clone(),
                    source: "whatsapp",
                    foods: session.detected_foods.clone(),
                    totals,
                    ai_raw: None,
                };
                self.meals.create_unconfirmed(&entry).await?
            }
        };
        // Durable row first: if this fails the session stays pending and can be retried.
        self.meals
            .confirm(record_id, &session.detected_foods, &totals)
            .await?;

        if !self
            .store
            .finalize_nutrition(session.id, NutritionOutcome::Confirmed)
            .await?
        {
            info!("session already finalized");
            return Ok(());
        }

        let day = ctx.now.to_offset(self.cfg.local_offset).date();
        let day_total = self.meals.daily_total_kcal(ctx.user.id, day).await?;
        info!(kcal = totals.kcal, day_total, "meal confirmed");
        self.messenger
            .text(&ctx.phone, &copy::confirmed(&totals, day_total))
            .await
    }

    async fn edit_foods(
        &self,
        ctx: &TurnContext,
        mut session: PendingNutrition,
        intent: &Intent,
    ) -> EngineResult<()> {
        if let Err(reason) = apply_edit(&mut session.detected_foods, intent) {
            return self
                .messenger
                .text(&ctx.phone, &copy::edit_error(&reason))
                .await;
        }
        session.totals = totals_for(&session.detected_foods);
        if !self.store.save_nutrition(&session).await? {
            return self.messenger.text(&ctx.phone, copy::NOTHING_PENDING).await;
        }
        if let Some(id) = session.linked_record_id {
            self.meals
                .update_items(id, &session.detected_foods, &session.totals)
                .await?;
        }
        info!(intent = %intent.name(), foods = session.detected_foods.len(), "foods edited");

        let menu = match session.phase() {
            NutritionPhase::Editing => copy::edit_menu(&session.detected_foods, &session.totals),
            NutritionPhase::AwaitingConfirmation => copy::nutrition_menu(
                session.meal_type,
                &session.detected_foods,
                &session.totals,
            ),
        };
        self.messenger.interactive(&ctx.phone, &menu).await
    }

    /// The user's active session, or `Expired`/`NotFound` when there is none.
    /// A lapsed session is closed on the way out.
    pub(crate) async fn require_nutrition(&self, ctx: &TurnContext) -> EngineResult<PendingNutrition> {
        if let Some(session) = self.store.active_nutrition(ctx.user.id, ctx.now).await? {
            return Ok(session);
        }
        match self.store.close_expired_nutrition(ctx.user.id, ctx.now).await? {
            Some(expired) => {
                info!(session_id = %expired.id, "expired session closed on late reply");
                Err(EngineError::Expired(expired.id))
            }
            None => Err(EngineError::NotFound("nutrition session".into())),
        }
    }
}

#[cfg(test)]
mod nutrition_flow_tests {
    use super::*;

    fn list() -> Vec<DetectedFood> {
        vec![
            DetectedFood::new("arroz", 150.0),
            DetectedFood::new("feijão", 100.0),
        ]
    }

    fn sorted(mut v: Vec<DetectedFood>) -> Vec<(String, u64)> {
        let mut out: Vec<_> = v
            .drain(..)
            .map(|f| (f.name, f.grams.to_bits()))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn add_then_remove_by_name_round_trips() {
        for extra in ["banana", "arroz"] {
            let before = list();
            let mut foods = before.clone();
            apply_edit(
                &mut foods,
                &Intent::AddFood {
                    food: DetectedFood::new(extra, 80.0),
                },
            )
            .unwrap();
            apply_edit(
                &mut foods,
                &Intent::RemoveFood {
                    target: FoodRef::Name(extra.into()),
                },
            )
            .unwrap();
            assert_eq!(sorted(foods), sorted(before), "{extra}");
        }
    }

    #[test]
    fn add_then_remove_by_index_round_trips() {
        let mut foods = list();
        apply_edit(
            &mut foods,
            &Intent::AddFood {
                food: DetectedFood::new("ovo", 50.0),
            },
        )
        .unwrap();
        apply_edit(
            &mut foods,
            &Intent::RemoveFood {
                target: FoodRef::Index(3),
            },
        )
        .unwrap();
        assert_eq!(foods, list());
    }

    #[test]
    fn replace_and_bad_indexes() {
        let mut foods = list();
        apply_edit(
            &mut foods,
            &Intent::ReplaceFood {
                index: 1,
                food: DetectedFood::new("banana", 100.0),
            },
        )
        .unwrap();
        assert_eq!(foods[0].name, "banana");

        let err = apply_edit(
            &mut foods,
            &Intent::RemoveFood {
                target: FoodRef::Index(9),
            },
        )
        .unwrap_err();
        assert!(err.contains('9'));
        assert!(apply_edit(
            &mut foods,
            &Intent::ReplaceFood {
                index: 0,
                food: DetectedFood::new("x", 1.0)
            }
        )
        .is_err());
    }

    #[test]
    fn remove_by_name_ignores_accents() {
        let mut foods = list();
        apply_edit(
            &mut foods,
            &Intent::RemoveFood {
                target: FoodRef::Name("FEIJAO".into()),
            },
        )
        .unwrap();
        assert_eq!(foods, vec![DetectedFood::new("arroz", 150.0)]);
    }

    #[test]
    fn unusable_weights_are_rejected_and_huge_ones_capped() {
        let mut foods = list();
        let err = apply_edit(
            &mut foods,
            &Intent::AddFood {
                food: DetectedFood::new("banana", f64::INFINITY),
            },
        )
        .unwrap_err();
        assert!(err.contains("banana"));
        assert_eq!(foods, list());

        apply_edit(
            &mut foods,
            &Intent::ReplaceFood {
                index: 2,
                food: DetectedFood::new("pizza", 1e9),
            },
        )
        .unwrap();
        assert_eq!(foods[1], DetectedFood::new("pizza", 5000.0));
        assert!(totals_for(&foods).kcal.is_finite());
    }
}
