use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{
    BatchImage, BatchStatus, NutritionOutcome, PendingMedicalBatch, PendingNutrition,
};
use super::repo::{SessionStore, SweepReport};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    nutrition: HashMap<Uuid, PendingNutrition>,
    batches: HashMap<Uuid, PendingMedicalBatch>,
}

/// Process-local store; every conditional update runs under one lock.
#[derive(Default)]
pub struct MemorySessionStore {
    tables: Mutex<Tables>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn all_batches(&self, user_id: Uuid) -> Vec<PendingMedicalBatch> {
        let t = self.tables.lock();
        let mut out: Vec<_> = t
            .batches
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.created_at);
        out
    }

    #[cfg(test)]
    pub fn all_nutrition(&self, user_id: Uuid) -> Vec<PendingNutrition> {
        let t = self.tables.lock();
        let mut out: Vec<_> = t
            .nutrition
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|n| n.created_at);
        out
    }
}

fn close(n: &mut PendingNutrition, outcome: NutritionOutcome) {
    n.is_processed = true;
    n.waiting_confirmation = false;
    n.waiting_edit = false;
    n.confirmed = outcome.confirmed_flag().or(n.confirmed);
    n.outcome = Some(outcome);
}

fn newest<'a, T: 'a>(
    items: impl Iterator<Item = &'a T>,
    key: impl Fn(&T) -> OffsetDateTime,
) -> Option<&'a T> {
    items.max_by_key(|i| key(i))
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn active_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError> {
        let t = self.tables.lock();
        Ok(newest(
            t.nutrition
                .values()
                .filter(|n| n.user_id == user_id && n.is_active_at(now)),
            |n| n.created_at,
        )
        .cloned())
    }

    async fn supersede_nutrition(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut t = self.tables.lock();
        let mut n = 0;
        for s in t
            .nutrition
            .values_mut()
            .filter(|s| s.user_id == user_id && !s.is_processed)
        {
            close(s, NutritionOutcome::Superseded);
            n += 1;
        }
        Ok(n)
    }

    async fn insert_nutrition(&self, session: &PendingNutrition) -> Result<(), StoreError> {
        self.tables
            .lock()
            .nutrition
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn save_nutrition(&self, session: &PendingNutrition) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        match t.nutrition.get_mut(&session.id) {
            Some(stored) if !stored.is_processed => {
                stored.detected_foods = session.detected_foods.clone();
                stored.totals = session.totals;
                stored.waiting_confirmation = session.waiting_confirmation;
                stored.waiting_edit = session.waiting_edit;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_nutrition(
        &self,
        id: Uuid,
        outcome: NutritionOutcome,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        match t.nutrition.get_mut(&id) {
            Some(s) if !s.is_processed => {
                close(s, outcome);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close_expired_nutrition(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PendingNutrition>, StoreError> {
        let mut t = self.tables.lock();
        let id = newest(
            t.nutrition
                .values()
                .filter(|n| n.user_id == user_id && !n.is_processed && n.expires_at <= now),
            |n| n.created_at,
        )
        .map(|n| n.id);
        Ok(id.and_then(|id| {
            t.nutrition.get_mut(&id).map(|s| {
                close(s, NutritionOutcome::Expired);
                s.clone()
            })
        }))
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<PendingMedicalBatch>, StoreError> {
        Ok(self.tables.lock().batches.get(&id).cloned())
    }

    async fn find_batch(
        &self,
        user_id: Uuid,
        statuses: &[BatchStatus],
        now: OffsetDateTime,
    ) -> Result<Option<PendingMedicalBatch>, StoreError> {
        let t = self.tables.lock();
        Ok(newest(
            t.batches.values().filter(|b| {
                b.user_id == user_id
                    && !b.is_processed
                    && statuses.contains(&b.status)
                    && b.expires_at > now
            }),
            |b| b.created_at,
        )
        .cloned())
    }

    async fn insert_batch(&self, batch: &PendingMedicalBatch) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        let taken = t.batches.values().any(|b| {
            b.user_id == batch.user_id
                && !b.is_processed
                && BatchStatus::APPENDABLE.contains(&b.status)
        });
        if taken {
            return Ok(false);
        }
        t.batches.insert(batch.id, batch.clone());
        Ok(true)
    }

    async fn swap_images(
        &self,
        id: Uuid,
        expected_count: i32,
        images: &[BatchImage],
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        let Some(b) = t.batches.get_mut(&id) else {
            return Ok(false);
        };
        let Some(last) = images.last() else {
            return Ok(false);
        };
        if b.images_count != expected_count
            || b.is_processed
            || !BatchStatus::APPENDABLE.contains(&b.status)
        {
            return Ok(false);
        }
        b.images = images.to_vec();
        b.images_count = images.len() as i32;
        b.last_image_at = last.received_at;
        b.expires_at = expires_at;
        b.status = BatchStatus::Collecting;
        Ok(true)
    }

    async fn mark_awaiting_if_idle(
        &self,
        id: Uuid,
        expected_count: i32,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        match t.batches.get_mut(&id) {
            Some(b)
                if b.images_count == expected_count
                    && b.status == BatchStatus::Collecting
                    && !b.is_processed =>
            {
                b.status = BatchStatus::AwaitingConfirm;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_batch(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        let Some(b) = t.batches.get_mut(&id) else {
            return Ok(false);
        };
        if b.is_processed || !from.contains(&b.status) {
            return Ok(false);
        }
        b.status = to;
        b.is_processed = to.is_terminal();
        match to {
            BatchStatus::Processing => {
                b.confirmed = Some(true);
                b.processing_started_at = Some(now);
            }
            BatchStatus::Cancelled => b.confirmed = Some(false),
            _ => {}
        }
        Ok(true)
    }

    async fn complete_batch(
        &self,
        id: Uuid,
        analysis: &serde_json::Value,
        report_token: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        match t.batches.get_mut(&id) {
            Some(b) if b.status == BatchStatus::Processing && !b.is_processed => {
                b.status = BatchStatus::Completed;
                b.is_processed = true;
                b.confirmed = Some(true);
                b.analysis_result = Some(analysis.clone());
                b.report_token = report_token.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_batches(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
        stuck_cutoff: OffsetDateTime,
    ) -> Result<SweepReport, StoreError> {
        let mut t = self.tables.lock();
        let mut report = SweepReport::default();
        for b in t
            .batches
            .values_mut()
            .filter(|b| b.user_id == user_id && !b.is_processed)
        {
            match b.status {
                BatchStatus::Processing
                    if b.processing_started_at.unwrap_or(b.last_image_at) < stuck_cutoff =>
                {
                    b.status = BatchStatus::Stuck;
                    b.is_processed = true;
                    report.stuck += 1;
                }
                BatchStatus::Collecting | BatchStatus::AwaitingConfirm if b.expires_at <= now => {
                    b.status = BatchStatus::Cancelled;
                    b.is_processed = true;
                    report.expired += 1;
                }
                BatchStatus::Error => {
                    b.is_processed = true;
                    report.failed += 1;
                }
                _ => {}
            }
        }
        Ok(report)
    }
}
