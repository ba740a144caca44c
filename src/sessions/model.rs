use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// Meal slot derived from the local time-of-day at detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Snack,
    Dinner,
    LateNight,
}

impl MealType {
    pub fn from_hour(hour: u8) -> Self {
        match hour {
            5..=9 => MealType::Breakfast,
            10..=14 => MealType::Lunch,
            15..=17 => MealType::Snack,
            18..=21 => MealType::Dinner,
            _ => MealType::LateNight,
        }
    }

    pub fn at(now: OffsetDateTime, offset: UtcOffset) -> Self {
        Self::from_hour(now.to_offset(offset).hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Snack => "snack",
            MealType::Dinner => "dinner",
            MealType::LateNight => "late_night",
        }
    }

    /// Label shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            MealType::Breakfast => "Café da manhã",
            MealType::Lunch => "Almoço",
            MealType::Snack => "Lanche",
            MealType::Dinner => "Jantar",
            MealType::LateNight => "Ceia",
        }
    }
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "snack" => Ok(MealType::Snack),
            "dinner" => Ok(MealType::Dinner),
            "late_night" => Ok(MealType::LateNight),
            other => Err(format!("unknown meal type: {other}")),
        }
    }
}

/// Heaviest single portion a parser or detector may report.
pub const MAX_GRAMS: f64 = 5000.0;

/// A usable portion weight: finite, positive and capped at [`MAX_GRAMS`].
pub fn portion(grams: f64) -> Option<f64> {
    (grams.is_finite() && grams > 0.0).then(|| grams.min(MAX_GRAMS))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFood {
    pub name: String,
    pub grams: f64,
}

impl DetectedFood {
    pub fn new(name: impl Into<String>, grams: f64) -> Self {
        Self {
            name: name.into(),
            grams,
        }
    }

    /// `None` for a blank name or an unusable weight; oversized portions are capped.
    pub fn checked(self) -> Option<Self> {
        let grams = portion(self.grams)?;
        (!self.name.trim().is_empty()).then_some(Self { grams, ..self })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionTotals {
    pub kcal: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
}

/// How a nutrition session left the pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NutritionOutcome {
    Confirmed,
    Cancelled,
    Cleared,
    Expired,
    Superseded,
}

impl NutritionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NutritionOutcome::Confirmed => "confirmed",
            NutritionOutcome::Cancelled => "cancelled",
            NutritionOutcome::Cleared => "cleared",
            NutritionOutcome::Expired => "expired",
            NutritionOutcome::Superseded => "superseded",
        }
    }

    /// Value written to `confirmed` when the session closes.
    pub fn confirmed_flag(&self) -> Option<bool> {
        match self {
            NutritionOutcome::Confirmed => Some(true),
            NutritionOutcome::Cancelled | NutritionOutcome::Cleared => Some(false),
            NutritionOutcome::Expired | NutritionOutcome::Superseded => None,
        }
    }
}

impl FromStr for NutritionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(NutritionOutcome::Confirmed),
            "cancelled" => Ok(NutritionOutcome::Cancelled),
            "cleared" => Ok(NutritionOutcome::Cleared),
            "expired" => Ok(NutritionOutcome::Expired),
            "superseded" => Ok(NutritionOutcome::Superseded),
            other => Err(format!("unknown nutrition outcome: {other}")),
        }
    }
}

/// Which question an open nutrition session is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutritionPhase {
    AwaitingConfirmation,
    Editing,
}

/// One in-flight meal-confirmation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNutrition {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    pub meal_type: MealType,
    pub detected_foods: Vec<DetectedFood>,
    pub totals: NutritionTotals,
    pub linked_record_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub waiting_confirmation: bool,
    pub waiting_edit: bool,
    pub confirmed: Option<bool>,
    pub is_processed: bool,
    pub outcome: Option<NutritionOutcome>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl PendingNutrition {
    pub fn phase(&self) -> NutritionPhase {
        if self.waiting_edit {
            NutritionPhase::Editing
        } else {
            NutritionPhase::AwaitingConfirmation
        }
    }

    pub fn enter_edit(&mut self) {
        self.waiting_edit = true;
        self.waiting_confirmation = false;
    }

    pub fn leave_edit(&mut self) {
        self.waiting_edit = false;
        self.waiting_confirmation = true;
    }

    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.is_processed && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchImage {
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Collecting,
    AwaitingConfirm,
    Processing,
    Completed,
    Error,
    Cancelled,
    Stuck,
}

impl BatchStatus {
    pub const APPENDABLE: [BatchStatus; 2] = [BatchStatus::Collecting, BatchStatus::AwaitingConfirm];
    pub const OPEN: [BatchStatus; 4] = [
        BatchStatus::Collecting,
        BatchStatus::AwaitingConfirm,
        BatchStatus::Processing,
        BatchStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Collecting => "collecting",
            BatchStatus::AwaitingConfirm => "awaiting_confirm",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Error => "error",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Stuck => "stuck",
        }
    }

    /// Statuses that close the batch (`is_processed = true`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Stuck
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting" => Ok(BatchStatus::Collecting),
            "awaiting_confirm" => Ok(BatchStatus::AwaitingConfirm),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "error" => Ok(BatchStatus::Error),
            "cancelled" => Ok(BatchStatus::Cancelled),
            "stuck" => Ok(BatchStatus::Stuck),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// One in-flight exam-photo collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMedicalBatch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    pub images: Vec<BatchImage>,
    /// Always `images.len()`; doubles as the optimistic-lock version.
    pub images_count: i32,
    pub status: BatchStatus,
    pub confirmed: Option<bool>,
    pub is_processed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_image_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_started_at: Option<OffsetDateTime>,
    pub analysis_result: Option<serde_json::Value>,
    pub report_token: Option<String>,
}

impl PendingMedicalBatch {
    pub fn first_image(
        user_id: Uuid,
        phone: &str,
        url: &str,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            phone: phone.to_string(),
            images: vec![BatchImage {
                url: url.to_string(),
                received_at: now,
            }],
            images_count: 1,
            status: BatchStatus::Collecting,
            confirmed: None,
            is_processed: false,
            created_at: now,
            last_image_at: now,
            expires_at: now + ttl,
            processing_started_at: None,
            analysis_result: None,
            report_token: None,
        }
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.images.iter().map(|i| i.url.clone()).collect()
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn meal_type_follows_local_clock() {
        // 11:30 UTC is 08:30 in UTC-3
        let now = datetime!(2026-03-10 11:30 UTC);
        let offset = UtcOffset::from_hms(-3, 0, 0).unwrap();
        assert_eq!(MealType::at(now, offset), MealType::Breakfast);
        assert_eq!(MealType::from_hour(12), MealType::Lunch);
        assert_eq!(MealType::from_hour(16), MealType::Snack);
        assert_eq!(MealType::from_hour(20), MealType::Dinner);
        assert_eq!(MealType::from_hour(23), MealType::LateNight);
        assert_eq!(MealType::from_hour(3), MealType::LateNight);
    }

    #[test]
    fn batch_status_parses_its_own_names() {
        for s in [
            BatchStatus::Collecting,
            BatchStatus::AwaitingConfirm,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Error,
            BatchStatus::Cancelled,
            BatchStatus::Stuck,
        ] {
            assert_eq!(s.as_str().parse::<BatchStatus>().unwrap(), s);
        }
        assert!("expired".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn terminal_statuses_close_the_batch() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Stuck.is_terminal());
        assert!(!BatchStatus::Error.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
    }

    #[test]
    fn phase_tracks_edit_flag() {
        let now = datetime!(2026-03-10 12:00 UTC);
        let mut s = PendingNutrition {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            phone: "5511999990000".into(),
            meal_type: MealType::Lunch,
            detected_foods: vec![],
            totals: NutritionTotals::default(),
            linked_record_id: None,
            image_url: None,
            waiting_confirmation: true,
            waiting_edit: false,
            confirmed: None,
            is_processed: false,
            outcome: None,
            created_at: now,
            expires_at: now + time::Duration::hours(2),
        };
        assert_eq!(s.phase(), NutritionPhase::AwaitingConfirmation);
        s.enter_edit();
        assert_eq!(s.phase(), NutritionPhase::Editing);
        assert!(!s.waiting_confirmation);
        s.leave_edit();
        assert!(s.waiting_confirmation && !s.waiting_edit);
        assert!(s.is_active_at(now));
        assert!(!s.is_active_at(now + time::Duration::hours(3)));
    }
}
