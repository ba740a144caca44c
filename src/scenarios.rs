//! End-to-end turns through the engine with in-memory collaborators.

use std::collections::HashSet;
use std::time::Duration;

use time::macros::datetime;
use time::OffsetDateTime;

use crate::config::EngineConfig;
use crate::engine::{Engine, TurnContext};
use crate::flows::copy::{self, ids};
use crate::gateway::recording::Sent;
use crate::intent::Intent;
use crate::meals::nutrition::totals_for;
use crate::meals::MealLog;
use crate::router::TurnOutcome;
use crate::scheduler::IdleCheckHandler;
use crate::services::ImageKind;
use crate::sessions::{BatchStatus, DetectedFood, NutritionOutcome, PendingMedicalBatch, SessionStore};
use crate::state::{AppState, Fixture};
use crate::users::User;
use crate::webhook::InboundMessage;

const PHONE: &str = "5511988887777";

/// 12:00 in UTC-3, so meals default to lunch.
fn t0() -> OffsetDateTime {
    datetime!(2026-03-10 15:00 UTC)
}

fn secs(n: i64) -> time::Duration {
    time::Duration::seconds(n)
}

fn setup_with(cfg: EngineConfig) -> (Engine, Fixture, User) {
    let (state, fx) = AppState::fake_with(cfg);
    let user = fx.users.register(PHONE, Some("Ana Souza"));
    (state.engine, fx, user)
}

fn setup() -> (Engine, Fixture, User) {
    setup_with(EngineConfig::default())
}

async fn say(engine: &Engine, text: &str, at: OffsetDateTime) -> TurnOutcome {
    engine
        .handle_at(InboundMessage::text(PHONE, text), at)
        .await
        .unwrap()
}

async fn photo(engine: &Engine, url: &str, at: OffsetDateTime) -> TurnOutcome {
    engine
        .handle_at(InboundMessage::image(PHONE, url), at)
        .await
        .unwrap()
}

async fn tap(engine: &Engine, id: &str, at: OffsetDateTime) -> TurnOutcome {
    engine
        .handle_at(InboundMessage::button(PHONE, id), at)
        .await
        .unwrap()
}

fn last(fx: &Fixture) -> Sent {
    fx.gateway.sent().last().cloned().expect("something was sent")
}

async fn fire_idle_checks(engine: &Engine, fx: &Fixture) {
    for check in fx.scheduler.take() {
        engine.on_idle_check(check).await;
    }
}

fn prompts(fx: &Fixture) -> usize {
    fx.gateway
        .sent()
        .iter()
        .filter(|s| s.button_ids().contains(&ids::ANALYZE))
        .count()
}

#[tokio::test]
async fn first_meal_photo_opens_one_pending_session() {
    let (engine, fx, user) = setup();

    assert_eq!(photo(&engine, "https://cdn/lunch.jpg", t0()).await, TurnOutcome::Handled);

    let sessions = fx.store.all_nutrition(user.id);
    assert_eq!(sessions.len(), 1);
    let s = &sessions[0];
    assert!(s.waiting_confirmation && !s.waiting_edit && !s.is_processed);
    assert_eq!(s.image_url.as_deref(), Some("https://cdn/lunch.jpg"));
    assert!(s.linked_record_id.is_some());
    assert_eq!(fx.meals.len(), 1);

    let sent = last(&fx);
    assert_eq!(sent.button_ids(), vec![ids::CONFIRM, ids::CANCEL, ids::EDIT]);
    assert!(sent.body().contains("1. arroz (150g)"));
}

#[tokio::test]
async fn exam_burst_makes_one_batch_and_one_prompt() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);

    for i in 0..12 {
        let url = format!("https://cdn/exam-{i}.jpg");
        photo(&engine, &url, t0() + secs(i * 2)).await;
    }

    let batches = fx.store.all_batches(user.id);
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.images_count, 12);
    assert_eq!(batch.images.len(), 12);
    assert_eq!(batch.images[0].url, "https://cdn/exam-0.jpg");
    assert_eq!(batch.images[11].url, "https://cdn/exam-11.jpg");

    let texts: Vec<String> = fx.gateway.sent().iter().map(|s| s.body().to_owned()).collect();
    assert_eq!(texts[0], copy::MEDICAL_FIRST);
    assert!(texts.contains(&copy::medical_progress(5)));
    assert!(texts.contains(&copy::medical_progress(10)));

    // Every photo scheduled a check; only the last one still matches.
    assert_eq!(fx.scheduler.len(), 12);
    fire_idle_checks(&engine, &fx).await;
    assert_eq!(prompts(&fx), 1);
    assert_eq!(
        fx.store.all_batches(user.id)[0].status,
        BatchStatus::AwaitingConfirm
    );

    // A late duplicate of the winning check changes nothing.
    engine
        .on_idle_check(crate::scheduler::IdleCheck {
            batch_id: batch.id,
            expected_count: 12,
        })
        .await;
    assert_eq!(prompts(&fx), 1);
}

#[tokio::test]
async fn ready_reply_runs_analysis_and_links_report() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    photo(&engine, "https://cdn/a.jpg", t0()).await;
    photo(&engine, "https://cdn/b.jpg", t0() + secs(3)).await;
    fire_idle_checks(&engine, &fx).await;

    say(&engine, "pode analisar", t0() + secs(30)).await;

    assert_eq!(
        *fx.ai.analyzed.lock(),
        vec![vec!["https://cdn/a.jpg".to_owned(), "https://cdn/b.jpg".to_owned()]]
    );
    let batch = fx.store.all_batches(user.id).remove(0);
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(batch.is_processed);
    let token = batch.report_token.expect("report token stored");
    assert_eq!(fx.reports.batch_for(&token), Some(batch.id));

    let done = last(&fx);
    assert!(done.body().contains("Tudo dentro da faixa."));
    assert!(done.body().contains(&format!("/relatorio/{token}")));
}

#[tokio::test]
async fn analyzer_failure_parks_batch_in_error_until_retry() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    *fx.ai.analysis.lock() = None;
    photo(&engine, "https://cdn/a.jpg", t0()).await;
    fire_idle_checks(&engine, &fx).await;

    tap(&engine, ids::ANALYZE, t0() + secs(20)).await;
    let batch = fx.store.all_batches(user.id).remove(0);
    assert_eq!(batch.status, BatchStatus::Error);
    assert!(!batch.is_processed);
    assert!(last(&fx).button_ids().contains(&ids::RETRY));

    *fx.ai.analysis.lock() = Some(serde_json::json!({ "summary": "ok" }));
    tap(&engine, ids::RETRY, t0() + secs(60)).await;
    assert_eq!(
        fx.store.all_batches(user.id)[0].status,
        BatchStatus::Completed
    );
    assert_eq!(fx.ai.analyzed.lock().len(), 2);
}

#[tokio::test]
async fn confirm_uses_the_edited_list() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    say(&engine, "adicionar banana 120g", t0() + secs(10)).await;
    say(&engine, "remover 1", t0() + secs(20)).await;
    let edited = vec![
        DetectedFood::new("feijão", 100.0),
        DetectedFood::new("banana", 120.0),
    ];
    let session = fx.store.all_nutrition(user.id).remove(0);
    assert_eq!(session.detected_foods, edited);
    assert!(last(&fx).body().contains("1. feijão (100g)\n2. banana (120g)"));

    say(&engine, "sim", t0() + secs(30)).await;

    let record = fx
        .meals
        .get(session.linked_record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(record.confirmed);
    let nutrition = record.nutrition.expect("nutrition row");
    assert_eq!(nutrition.totals, totals_for(&edited));
    assert_eq!(nutrition.food_items, edited);

    let closed = fx.store.all_nutrition(user.id).remove(0);
    assert!(closed.is_processed);
    assert_eq!(closed.outcome, Some(NutritionOutcome::Confirmed));
    assert!(last(&fx).body().contains("Total do dia"));
}

#[tokio::test]
async fn second_confirm_is_a_no_op() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    tap(&engine, ids::CONFIRM, t0() + secs(5)).await;
    let day = t0().date();
    let total_once = fx.meals.daily_total_kcal(user.id, day).await.unwrap();
    assert!(total_once > 0.0);

    tap(&engine, ids::CONFIRM, t0() + secs(6)).await;
    say(&engine, "sim", t0() + secs(7)).await;

    assert_eq!(fx.meals.daily_total_kcal(user.id, day).await.unwrap(), total_once);
    let confirmations = fx
        .gateway
        .sent()
        .iter()
        .filter(|s| s.body().starts_with("✅ Refeição registrada"))
        .count();
    assert_eq!(confirmations, 1);
    assert_eq!(last(&fx).body(), copy::NOTHING_PENDING);
}

#[tokio::test]
async fn cancel_deletes_the_log_row_once() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    say(&engine, "não", t0() + secs(5)).await;
    assert!(fx.meals.is_empty());
    let s = fx.store.all_nutrition(user.id).remove(0);
    assert_eq!(s.outcome, Some(NutritionOutcome::Cancelled));
    assert_eq!(s.confirmed, Some(false));
    assert_eq!(last(&fx).body(), copy::CANCELLED);

    tap(&engine, ids::CANCEL, t0() + secs(6)).await;
    assert_eq!(last(&fx).body(), copy::NOTHING_PENDING);
}

#[tokio::test]
async fn late_reply_to_expired_session_is_told_it_expired() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    let later = t0() + time::Duration::hours(3);
    assert!(fx.store.active_nutrition(user.id, later).await.unwrap().is_none());

    say(&engine, "sim", later).await;
    let s = fx.store.all_nutrition(user.id).remove(0);
    assert_eq!(s.outcome, Some(NutritionOutcome::Expired));
    assert_eq!(last(&fx).body(), copy::EXPIRED);
    assert!(!fx.meals.get(s.linked_record_id.unwrap()).await.unwrap().unwrap().confirmed);
}

#[tokio::test]
async fn stuck_batch_is_closed_by_next_photo() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);

    let old_start = t0() - time::Duration::minutes(30);
    let mut old = PendingMedicalBatch::first_image(
        user.id,
        PHONE,
        "https://cdn/old.jpg",
        old_start,
        time::Duration::hours(2),
    );
    old.status = BatchStatus::Processing;
    old.processing_started_at = Some(t0() - time::Duration::minutes(11));
    fx.store.insert_batch(&old).await.unwrap();

    photo(&engine, "https://cdn/new.jpg", t0()).await;

    let batches = fx.store.all_batches(user.id);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].status, BatchStatus::Stuck);
    assert!(batches[0].is_processed);
    assert_eq!(batches[1].status, BatchStatus::Collecting);
    assert_eq!(batches[1].images_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_lose_nothing() {
    let cfg = EngineConfig {
        append_max_attempts: 50,
        append_backoff_base: Duration::from_millis(2),
        ..EngineConfig::default()
    };
    let (engine, fx, user) = setup_with(cfg);
    let ctx = TurnContext {
        user: user.clone(),
        phone: PHONE.into(),
        now: t0(),
    };

    let n = 16;
    let mut tasks = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .append_image(&ctx, &format!("https://cdn/{i}.jpg"))
                .await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let batches = fx.store.all_batches(user.id);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].images_count, n);
    let urls: HashSet<String> = batches[0].image_urls().into_iter().collect();
    let expected: HashSet<String> = (0..n).map(|i| format!("https://cdn/{i}.jpg")).collect();
    assert_eq!(urls, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_photo_turns_fit_the_default_retry_budget() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);

    let n = 12;
    let mut tasks = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let url = format!("https://cdn/exam-{i}.jpg");
        tasks.push(tokio::spawn(async move { photo(&engine, &url, t0()).await }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap(), TurnOutcome::Handled);
    }

    let batches = fx.store.all_batches(user.id);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Collecting);
    assert_eq!(batches[0].images_count, n);
    let urls: HashSet<String> = batches[0].image_urls().into_iter().collect();
    assert_eq!(urls.len(), n as usize);
    assert!(fx.gateway.sent().iter().all(|s| s.body() != copy::APOLOGY));

    fire_idle_checks(&engine, &fx).await;
    assert_eq!(prompts(&fx), 1);
}

#[tokio::test]
async fn classifier_outage_still_resolves_keywords() {
    let (engine, fx, user) = setup();
    *fx.ai.intent.lock() = None;
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    say(&engine, "quero corrigir", t0() + secs(5)).await;
    assert!(fx.store.all_nutrition(user.id)[0].waiting_edit);
    assert!(last(&fx).button_ids().contains(&ids::EDIT_DONE));

    say(&engine, "pronto", t0() + secs(10)).await;
    let s = fx.store.all_nutrition(user.id).remove(0);
    assert!(s.waiting_confirmation && !s.waiting_edit);
}

#[tokio::test]
async fn ai_edit_intent_changes_the_list() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;
    *fx.ai.intent.lock() = Some(Intent::AddFood {
        food: DetectedFood::new("ovo cozido", 50.0),
    });

    say(&engine, "esqueci do ovo", t0() + secs(5)).await;
    let s = fx.store.all_nutrition(user.id).remove(0);
    assert_eq!(s.detected_foods.len(), 3);
    assert_eq!(s.detected_foods[2].name, "ovo cozido");
    assert_eq!(s.totals, totals_for(&s.detected_foods));
}

#[tokio::test]
async fn unrelated_text_restates_pending_meal_first() {
    let (engine, fx, _user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;
    fx.gateway.clear();

    say(&engine, "quantas horas devo dormir por noite?", t0() + secs(5)).await;

    let sent = fx.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].body().contains("aguardando confirmação"));
    assert_eq!(sent[1].body(), "Beba água e durma bem!");
}

#[tokio::test]
async fn truncated_keyword_gets_the_menu_again() {
    let (engine, fx, _user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;
    fx.gateway.clear();

    say(&engine, "edi", t0() + secs(5)).await;
    let sent = fx.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].button_ids(), vec![ids::CONFIRM, ids::CANCEL, ids::EDIT]);
}

#[tokio::test]
async fn numeric_reply_goes_to_the_newer_question() {
    let (engine, fx, user) = setup();
    photo(&engine, "https://cdn/lunch.jpg", t0()).await;

    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    photo(&engine, "https://cdn/exam.jpg", t0() + secs(60)).await;
    fire_idle_checks(&engine, &fx).await;

    say(&engine, "1", t0() + secs(90)).await;

    assert_eq!(fx.store.all_batches(user.id)[0].status, BatchStatus::Completed);
    let meal = fx.store.all_nutrition(user.id).remove(0);
    assert!(!meal.is_processed, "meal session untouched");

    say(&engine, "1", t0() + secs(120)).await;
    let meal = fx.store.all_nutrition(user.id).remove(0);
    assert_eq!(meal.outcome, Some(NutritionOutcome::Confirmed));
}

#[tokio::test]
async fn collecting_batch_can_be_cancelled_by_text() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    photo(&engine, "https://cdn/a.jpg", t0()).await;

    say(&engine, "cancelar", t0() + secs(2)).await;
    let b = fx.store.all_batches(user.id).remove(0);
    assert_eq!(b.status, BatchStatus::Cancelled);
    assert!(b.is_processed);
    assert!(fx.ai.analyzed.lock().is_empty());
    assert_eq!(last(&fx).body(), copy::MEDICAL_CANCELLED);
}

#[tokio::test]
async fn unrelated_text_restates_collecting_batch_first() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    photo(&engine, "https://cdn/a.jpg", t0()).await;
    fx.gateway.clear();

    say(&engine, "quantas horas devo dormir?", t0() + secs(3)).await;

    let sent = fx.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].button_ids(),
        vec![ids::ANALYZE, ids::MEDICAL_CANCEL, ids::MORE]
    );
    assert!(sent[0].body().contains("1 foto "));
    assert_eq!(sent[1].body(), "Beba água e durma bem!");
    assert_eq!(fx.store.all_batches(user.id)[0].status, BatchStatus::Collecting);
}

#[tokio::test]
async fn unclassified_photo_joins_open_batch() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Medical);
    photo(&engine, "https://cdn/a.jpg", t0()).await;

    *fx.ai.image_kind.lock() = Some(ImageKind::Other);
    photo(&engine, "https://cdn/b.jpg", t0() + secs(2)).await;
    *fx.ai.image_kind.lock() = None;
    photo(&engine, "https://cdn/c.jpg", t0() + secs(4)).await;

    assert_eq!(fx.store.all_batches(user.id)[0].images_count, 3);
}

#[tokio::test]
async fn other_photo_without_batch_gets_a_hint() {
    let (engine, fx, user) = setup();
    *fx.ai.image_kind.lock() = Some(ImageKind::Other);
    photo(&engine, "https://cdn/cat.jpg", t0()).await;

    assert!(fx.store.all_batches(user.id).is_empty());
    assert!(fx.store.all_nutrition(user.id).is_empty());
    assert_eq!(last(&fx).body(), copy::UNKNOWN_PHOTO);
}

#[tokio::test]
async fn text_meal_report_opens_a_session() {
    let (engine, fx, user) = setup();
    say(&engine, "comi arroz e feijão", t0()).await;

    let s = fx.store.all_nutrition(user.id);
    assert_eq!(s.len(), 1);
    assert!(s[0].image_url.is_none());
    assert!(s[0].waiting_confirmation);
}

#[tokio::test]
async fn unknown_button_falls_back_to_menu() {
    let (engine, fx, _user) = setup();
    tap(&engine, "promo_2025", t0()).await;

    let sent = last(&fx);
    assert_eq!(sent.body(), copy::MENU);
    assert_eq!(sent.button_ids(), vec![ids::NEW_PHOTO, ids::HELP]);
}

#[tokio::test]
async fn detector_outage_apologizes_with_safe_menu() {
    let (engine, fx, user) = setup();
    *fx.ai.foods.lock() = None;

    assert_eq!(photo(&engine, "https://cdn/lunch.jpg", t0()).await, TurnOutcome::Failed);
    assert!(fx.store.all_nutrition(user.id).is_empty());
    let sent = last(&fx);
    assert_eq!(sent.body(), copy::APOLOGY);
    assert_eq!(sent.button_ids(), vec![ids::NEW_PHOTO, ids::HELP]);
}

#[tokio::test]
async fn assistant_outage_degrades_to_hint() {
    let (engine, fx, _user) = setup();
    *fx.ai.assistant.lock() = None;
    say(&engine, "bom dia", t0()).await;
    assert_eq!(last(&fx).body(), copy::ASSISTANT_FALLBACK);
}

#[tokio::test]
async fn unknown_phone_gets_no_reply() {
    let (engine, fx, _user) = setup();
    let outcome = engine
        .handle_at(InboundMessage::text("5521900001111", "oi"), t0())
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::UnknownUser);
    assert!(fx.gateway.sent().is_empty());
}
