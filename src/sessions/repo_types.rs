use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{
    BatchImage, DetectedFood, NutritionTotals, PendingMedicalBatch, PendingNutrition,
};
use crate::error::StoreError;

#[derive(Debug, FromRow)]
pub struct PendingNutritionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    pub meal_type: String,
    pub detected_foods: Json<Vec<DetectedFood>>,
    pub total_kcal: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub total_fiber: f64,
    pub linked_record_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub waiting_confirmation: bool,
    pub waiting_edit: bool,
    pub confirmed: Option<bool>,
    pub is_processed: bool,
    pub outcome: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl TryFrom<PendingNutritionRow> for PendingNutrition {
    type Error = StoreError;

    fn try_from(r: PendingNutritionRow) -> Result<Self, Self::Error> {
        let id = r.id;
        let corrupt = move |reason: String| StoreError::Corrupt { id, reason };
        let meal_type = r.meal_type.parse().map_err(corrupt)?;
        let outcome = match r.outcome.as_deref() {
            Some(o) => Some(o.parse().map_err(corrupt)?),
            None => None,
        };
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            phone: r.phone,
            meal_type,
            detected_foods: r.detected_foods.0,
            totals: NutritionTotals {
                kcal: r.total_kcal,
                protein: r.total_protein,
                carbs: r.total_carbs,
                fat: r.total_fat,
                fiber: r.total_fiber,
            },
            linked_record_id: r.linked_record_id,
            image_url: r.image_url,
            waiting_confirmation: r.waiting_confirmation,
            waiting_edit: r.waiting_edit,
            confirmed: r.confirmed,
            is_processed: r.is_processed,
            outcome,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PendingMedicalBatchRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    pub images: Json<Vec<BatchImage>>,
    pub images_count: i32,
    pub status: String,
    pub confirmed: Option<bool>,
    pub is_processed: bool,
    pub created_at: OffsetDateTime,
    pub last_image_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub processing_started_at: Option<OffsetDateTime>,
    pub analysis_result: Option<Json<serde_json::Value>>,
    pub report_token: Option<String>,
}

impl TryFrom<PendingMedicalBatchRow> for PendingMedicalBatch {
    type Error = StoreError;

    fn try_from(r: PendingMedicalBatchRow) -> Result<Self, Self::Error> {
        let status = r
            .status
            .parse()
            .map_err(|reason| StoreError::Corrupt { id: r.id, reason })?;
        if r.images_count as usize != r.images.0.len() {
            return Err(StoreError::Corrupt {
                id: r.id,
                reason: format!(
                    "images_count {} != {} stored images",
                    r.images_count,
                    r.images.0.len()
                ),
            });
        }
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            phone: r.phone,
            images: r.images.0,
            images_count: r.images_count,
            status,
            confirmed: r.confirmed,
            is_processed: r.is_processed,
            created_at: r.created_at,
            last_image_at: r.last_image_at,
            expires_at: r.expires_at,
            processing_started_at: r.processing_started_at,
            analysis_result: r.analysis_result.map(|j| j.0),
            report_token: r.report_token,
        })
    }
}

#[cfg(test)]
mod row_tests {
    use super::*;
    use time::macros::datetime;

    fn batch_row(count: i32, status: &str) -> PendingMedicalBatchRow {
        let now = datetime!(2026-03-10 12:00 UTC);
        PendingMedicalBatchRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            phone: "5511999990000".into(),
            images: Json(vec![BatchImage {
                url: "https://img/1.jpg".into(),
                received_at: now,
            }]),
            images_count: count,
            status: status.into(),
            confirmed: None,
            is_processed: false,
            created_at: now,
            last_image_at: now,
            expires_at: now,
            processing_started_at: None,
            analysis_result: None,
            report_token: None,
        }
    }

    #[test]
    fn count_mismatch_is_reported_as_corrupt() {
        let err = PendingMedicalBatch::try_from(batch_row(2, "collecting")).unwrap_err();
        assert!(err.to_string().contains("images_count 2"));
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        assert!(PendingMedicalBatch::try_from(batch_row(1, "weird")).is_err());
        assert!(PendingMedicalBatch::try_from(batch_row(1, "awaiting_confirm")).is_ok());
    }
}
