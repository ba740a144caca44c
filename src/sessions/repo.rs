use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{
    BatchImage, BatchStatus, NutritionOutcome, PendingMedicalBatch, PendingNutrition,
};
use super::repo_types::{PendingMedicalBatchRow, PendingNutritionRow};
use crate::error::StoreError;

/// What a batch sweep closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub stuck: u64,
    pub expired: u64,
    pub failed: u64,
}

/// Single source of truth for pending conversational state.
///
/// Every "active" lookup filters on `is_processed = false` and
/// `expires_at > now`; finalizing updates are conditional on
/// `is_processed = false` and report whether they won.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn active_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError>;

    /// Closes every unprocessed nutrition session of the user as superseded.
    async fn supersede_nutrition(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn insert_nutrition(&self, session: &PendingNutrition) -> Result<(), StoreError>;

    /// Last-write-wins save of foods, totals and phase flags.
    async fn save_nutrition(&self, session: &PendingNutrition) -> Result<bool, StoreError>;

    async fn finalize_nutrition(
        &self,
        id: Uuid,
        outcome: NutritionOutcome,
    ) -> Result<bool, StoreError>;

    /// Closes the newest unprocessed-but-expired session and returns it.
    async fn close_expired_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<PendingMedicalBatch>, StoreError>;

    /// Newest unprocessed, unexpired batch whose status is one of `statuses`.
    async fn find_batch(
        &self,
        user_id: Uuid,
        statuses: &[BatchStatus],
        now: OffsetDateTime,
    ) -> Result<Option<PendingMedicalBatch>, StoreError>;

    /// Returns `false` when another appendable batch already exists for the user.
    async fn insert_batch(&self, batch: &PendingMedicalBatch) -> Result<bool, StoreError>;

    /// Compare-and-swap on `images_count`; the batch returns to `collecting`.
    async fn swap_images(
        &self,
        id: Uuid,
        expected_count: i32,
        images: &[BatchImage],
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    /// `collecting → awaiting_confirm` only while the count is still `expected_count`.
    async fn mark_awaiting_if_idle(
        &self,
        id: Uuid,
        expected_count: i32,
    ) -> Result<bool, StoreError>;

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    async fn complete_batch(
        &self,
        id: Uuid,
        analysis: &serde_json::Value,
        report_token: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Force-closes what blocks a fresh batch: stuck processing, expired collecting, failed.
    async fn sweep_batches(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
        stuck_cutoff: OffsetDateTime,
    ) -> Result<SweepReport, StoreError>;
}

fn status_names(statuses: &[BatchStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

const NUTRITION_COLUMNS: &str = r#"id, user_id, phone, meal_type, detected_foods,
    total_kcal, total_protein, total_carbs, total_fat, total_fiber,
    linked_record_id, image_url, waiting_confirmation, waiting_edit,
    confirmed, is_processed, outcome, created_at, expires_at"#;

const BATCH_COLUMNS: &str = r#"id, user_id, phone, images, images_count, status,
    confirmed, is_processed, created_at, last_image_at, expires_at,
    processing_started_at, analysis_result, report_token"#;

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn active_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError> {
        let row = sqlx::query_as::<_, PendingNutritionRow>(&format!(
            r#"
            SELECT {NUTRITION_COLUMNS}
              FROM pending_nutrition
             WHERE user_id = $1
               AND is_processed = false
               AND expires_at > $2
             ORDER BY created_at DESC
             LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        row.map(PendingNutrition::try_from).transpose()
    }

    async fn supersede_nutrition(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE pending_nutrition
               SET is_processed = true,
                   waiting_confirmation = false,
                   waiting_edit = false,
                   outcome = 'superseded'
             WHERE user_id = $1 AND is_processed = false
            "#,
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }

    async fn insert_nutrition(&self, s: &PendingNutrition) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO pending_nutrition ({NUTRITION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#
        ))
        .bind(s.id)
        .bind(s.user_id)
        .bind(&s.phone)
        .bind(s.meal_type.as_str())
        .bind(Json(&s.detected_foods))
        .bind(s.totals.kcal)
        .bind(s.totals.protein)
        .bind(s.totals.carbs)
        .bind(s.totals.fat)
        .bind(s.totals.fiber)
        .bind(s.linked_record_id)
        .bind(&s.image_url)
        .bind(s.waiting_confirmation)
        .bind(s.waiting_edit)
        .bind(s.confirmed)
        .bind(s.is_processed)
        .bind(s.outcome.map(|o| o.as_str()))
        .bind(s.created_at)
        .bind(s.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn save_nutrition(&self, s: &PendingNutrition) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE pending_nutrition
               SET detected_foods = $2,
                   total_kcal = $3, total_protein = $4, total_carbs = $5,
                   total_fat = $6, total_fiber = $7,
                   waiting_confirmation = $8,
                   waiting_edit = $9
             WHERE id = $1 AND is_processed = false
            "#,
        )
        .bind(s.id)
        .bind(Json(&s.detected_foods))
        .bind(s.totals.kcal)
        .bind(s.totals.protein)
        .bind(s.totals.carbs)
        .bind(s.totals.fat)
        .bind(s.totals.fiber)
        .bind(s.waiting_confirmation)
        .bind(s.waiting_edit)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn finalize_nutrition(
        &self,
        id: Uuid,
        outcome: NutritionOutcome,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE pending_nutrition
               SET is_processed = true,
                   waiting_confirmation = false,
                   waiting_edit = false,
                   confirmed = $2,
                   outcome = $3
             WHERE id = $1 AND is_processed = false
            "#,
        )
        .bind(id)
        .bind(outcome.confirmed_flag())
        .bind(outcome.as_str())
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn close_expired_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError> {
        let row = sqlx::query_as::<_, PendingNutritionRow>(&format!(
            r#"
            UPDATE pending_nutrition
               SET is_processed = true,
                   waiting_confirmation = false,
                   waiting_edit = false,
                   outcome = 'expired'
             WHERE id = (
                   SELECT id FROM pending_nutrition
                    WHERE user_id = $1 AND is_processed = false AND expires_at <= $2
                    ORDER BY created_at DESC
                    LIMIT 1)
               AND is_processed = false
            RETURNING {NUTRITION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        row.map(PendingNutrition::try_from).transpose()
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<PendingMedicalBatch>, StoreError> {
        let row = sqlx::query_as::<_, PendingMedicalBatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM pending_medical_batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(PendingMedicalBatch::try_from).transpose()
    }

    async fn find_batch(
        &self,
        user_id: Uuid,
        statuses: &[BatchStatus],
        now: OffsetDateTime,
    ) -> Result<Option<PendingMedicalBatch>, StoreError> {
        let row = sqlx::query_as::<_, PendingMedicalBatchRow>(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
              FROM pending_medical_batches
             WHERE user_id = $1
               AND is_processed = false
               AND status = ANY($2)
               AND expires_at > $3
             ORDER BY created_at DESC
             LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(status_names(statuses))
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        row.map(PendingMedicalBatch::try_from).transpose()
    }

    async fn insert_batch(&self, b: &PendingMedicalBatch) -> Result<bool, StoreError> {
        // The partial unique index on open batches turns a lost creation race into zero rows.
        let res = sqlx::query(&format!(
            r#"
            INSERT INTO pending_medical_batches ({BATCH_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT DO NOTHING
            "#
        ))
        .bind(b.id)
        .bind(b.user_id)
        .bind(&b.phone)
        .bind(Json(&b.images))
        .bind(b.images_count)
        .bind(b.status.as_str())
        .bind(b.confirmed)
        .bind(b.is_processed)
        .bind(b.created_at)
        .bind(b.last_image_at)
        .bind(b.expires_at)
        .bind(b.processing_started_at)
        .bind(b.analysis_result.as_ref().map(Json))
        .bind(&b.report_token)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn swap_images(
        &self,
        id: Uuid,
        expected_count: i32,
        images: &[BatchImage],
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let Some(last) = images.last() else {
            return Ok(false);
        };
        let res = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET images = $3,
                   images_count = $4,
                   last_image_at = $5,
                   expires_at = $6,
                   status = 'collecting'
             WHERE id = $1
               AND images_count = $2
               AND is_processed = false
               AND status IN ('collecting', 'awaiting_confirm')
            "#,
        )
        .bind(id)
        .bind(expected_count)
        .bind(Json(images))
        .bind(images.len() as i32)
        .bind(last.received_at)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn mark_awaiting_if_idle(
        &self,
        id: Uuid,
        expected_count: i32,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET status = 'awaiting_confirm'
             WHERE id = $1
               AND images_count = $2
               AND status = 'collecting'
               AND is_processed = false
            "#,
        )
        .bind(id)
        .bind(expected_count)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let confirmed = match to {
            BatchStatus::Processing => Some(true),
            BatchStatus::Cancelled => Some(false),
            _ => None,
        };
        let started = (to == BatchStatus::Processing).then_some(now);
        let res = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET status = $3,
                   is_processed = $4,
                   confirmed = COALESCE($5, confirmed),
                   processing_started_at = COALESCE($6, processing_started_at)
             WHERE id = $1
               AND status = ANY($2)
               AND is_processed = false
            "#,
        )
        .bind(id)
        .bind(status_names(from))
        .bind(to.as_str())
        .bind(to.is_terminal())
        .bind(confirmed)
        .bind(started)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn complete_batch(
        &self,
        id: Uuid,
        analysis: &serde_json::Value,
        report_token: Option<&str>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET status = 'completed',
                   is_processed = true,
                   confirmed = true,
                   analysis_result = $2,
                   report_token = $3
             WHERE id = $1 AND status = 'processing' AND is_processed = false
            "#,
        )
        .bind(id)
        .bind(Json(analysis))
        .bind(report_token)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn sweep_batches(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
        stuck_cutoff: OffsetDateTime,
    ) -> Result<SweepReport, StoreError> {
        let mut tx = self.db.begin().await?;
        let stuck = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET status = 'stuck', is_processed = true
             WHERE user_id = $1 AND is_processed = false
               AND status = 'processing'
               AND COALESCE(processing_started_at, last_image_at) < $2
            "#,
        )
        .bind(user_id)
        .bind(stuck_cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let expired = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET status = 'cancelled', is_processed = true
             WHERE user_id = $1 AND is_processed = false
               AND status IN ('collecting', 'awaiting_confirm')
               AND expires_at <= $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let failed = sqlx::query(
            r#"
            UPDATE pending_medical_batches
               SET is_processed = true
             WHERE user_id = $1 AND is_processed = false AND status = 'error'
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(SweepReport {
            stuck,
            expired,
            failed,
        })
    }
}
