//! Medical exam batch accumulator.
//!
//! Appends are optimistic: read the batch, compute the new image list and
//! swap it in only if `images_count` is unchanged. Losers back off and
//! retry against the fresh row.

use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::copy;
use crate::engine::{Engine, TurnContext};
use crate::error::{EngineError, EngineResult};
use crate::intent::vocabulary::MedicalReply;
use crate::scheduler::IdleCheck;
use crate::sessions::{BatchImage, BatchStatus, PendingMedicalBatch};

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub batch_id: Uuid,
    pub images_count: i32,
    pub created: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedicalAction {
    Analyze,
    More,
    Cancel,
    Wait,
    Retry,
}

impl From<MedicalReply> for MedicalAction {
    fn from(r: MedicalReply) -> Self {
        match r {
            MedicalReply::Ready => MedicalAction::Analyze,
            MedicalReply::More => MedicalAction::More,
            MedicalReply::Cancel => MedicalAction::Cancel,
        }
    }
}

/// New expiry after an accepted image: renewed, never shortened, capped.
pub fn renewed_expiry(
    batch: &PendingMedicalBatch,
    now: OffsetDateTime,
    renewal: time::Duration,
    max_lifetime: time::Duration,
) -> OffsetDateTime {
    let renewed = (now + renewal).min(batch.created_at + max_lifetime);
    batch.expires_at.max(renewed)
}

impl Engine {
    fn append_backoff(&self, attempt: u32) -> Duration {
        let base = self.cfg.append_backoff_base * attempt;
        let jitter_ms = self.cfg.append_backoff_base.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        base + jitter
    }

    /// Appends one image to the user's open batch, creating it if needed.
    #[instrument(skip(self, ctx, url), fields(user_id = %ctx.user.id))]
    pub async fn append_image(&self, ctx: &TurnContext, url: &str) -> EngineResult<Appended> {
        let max = self.cfg.append_max_attempts.max(1);
        let mut last_batch = None;

        for attempt in 1..=max {
            let now = ctx.now;
            match self
                .store
                .find_batch(ctx.user.id, &BatchStatus::APPENDABLE, now)
                .await?
            {
                Some(batch) => {
                    last_batch = Some(batch.id);
                    let mut images = batch.images.clone();
                    images.push(BatchImage {
                        url: url.to_owned(),
                        received_at: now,
                    });
                    let expires_at = renewed_expiry(
                        &batch,
                        now,
                        self.cfg.batch_renewal,
                        self.cfg.batch_max_lifetime,
                    );
                    if self
                        .store
                        .swap_images(batch.id, batch.images_count, &images, expires_at)
                        .await?
                    {
                        return Ok(Appended {
                            batch_id: batch.id,
                            images_count: images.len() as i32,
                            created: false,
                            attempts: attempt,
                        });
                    }
                    debug!(attempt, batch_id = %batch.id, seen = batch.images_count, "append lost the race");
                }
                None => {
                    let batch = PendingMedicalBatch::first_image(
                        ctx.user.id,
                        &ctx.phone,
                        url,
                        now,
                        self.cfg.batch_initial_ttl,
                    );
                    if self.store.insert_batch(&batch).await? {
                        return Ok(Appended {
                            batch_id: batch.id,
                            images_count: 1,
                            created: true,
                            attempts: attempt,
                        });
                    }
                    debug!(attempt, "batch creation lost the race");
                }
            }
            if attempt < max {
                tokio::time::sleep(self.append_backoff(attempt)).await;
            }
        }

        warn!(attempts = max, "append retries exhausted");
        Err(EngineError::Conflict {
            batch_id: last_batch,
            attempts: max,
        })
    }

    /// Image routed to the medical flow: sweep, append, acknowledge, schedule.
    #[instrument(skip(self, ctx, url), fields(user_id = %ctx.user.id))]
    pub(crate) async fn medical_image(&self, ctx: &TurnContext, url: &str) -> EngineResult<()> {
        let report = self
            .store
            .sweep_batches(ctx.user.id, ctx.now, ctx.now - self.cfg.stuck_after)
            .await?;
        if report.stuck + report.expired + report.failed > 0 {
            info!(stuck = report.stuck, expired = report.expired, failed = report.failed, "batches swept");
        }

        let appended = self.append_image(ctx, url).await?;
        info!(
            batch_id = %appended.batch_id,
            images_count = appended.images_count,
            attempt = appended.attempts,
            "exam image accepted"
        );

        self.scheduler.schedule_idle_check(
            IdleCheck {
                batch_id: appended.batch_id,
                expected_count: appended.images_count,
            },
            self.cfg.idle_quiet_period,
        );

        if appended.images_count == 1 {
            self.messenger.text(&ctx.phone, copy::MEDICAL_FIRST).await?;
        } else if self.cfg.progress_every > 0 && appended.images_count % self.cfg.progress_every == 0 {
            self.messenger
                .text(&ctx.phone, &copy::medical_progress(appended.images_count))
                .await?;
        }
        Ok(())
    }

    /// Fired after the quiet period. Only the check that still matches the
    /// current count wins the transition, so one burst gets one prompt.
    pub(crate) async fn prompt_if_idle(&self, check: IdleCheck) -> EngineResult<()> {
        if !self
            .store
            .mark_awaiting_if_idle(check.batch_id, check.expected_count)
            .await?
        {
            debug!("batch moved on; no prompt");
            return Ok(());
        }
        let Some(batch) = self.store.get_batch(check.batch_id).await? else {
            return Ok(());
        };
        info!(images_count = batch.images_count, "asking to analyze");
        self.messenger
            .interactive(&batch.phone, &copy::medical_prompt(batch.images_count))
            .await
    }

    #[instrument(skip(self, ctx, batch), fields(user_id = %ctx.user.id, batch_id = %batch.id, status = %batch.status))]
    pub(crate) async fn medical_action(
        &self,
        ctx: &TurnContext,
        batch: PendingMedicalBatch,
        action: MedicalAction,
    ) -> EngineResult<()> {
        match action {
            MedicalAction::Analyze => {
                let moved = self
                    .store
                    .transition_batch(
                        batch.id,
                        &BatchStatus::APPENDABLE,
                        BatchStatus::Processing,
                        ctx.now,
                    )
                    .await?;
                if !moved {
                    return self.medical_not_ready(ctx, &batch).await;
                }
                self.run_analysis(ctx, batch).await
            }
            MedicalAction::Retry => {
                let moved = self
                    .store
                    .transition_batch(batch.id, &[BatchStatus::Error], BatchStatus::Processing, ctx.now)
                    .await?;
                if !moved {
                    return self.medical_not_ready(ctx, &batch).await;
                }
                self.run_analysis(ctx, batch).await
            }
            MedicalAction::More => {
                self.store
                    .transition_batch(
                        batch.id,
                        &[BatchStatus::AwaitingConfirm],
                        BatchStatus::Collecting,
                        ctx.now,
                    )
                    .await?;
                self.messenger.text(&ctx.phone, copy::MEDICAL_MORE).await
            }
            MedicalAction::Cancel => {
                let moved = self
                    .store
                    .transition_batch(
                        batch.id,
                        &[
                            BatchStatus::Collecting,
                            BatchStatus::AwaitingConfirm,
                            BatchStatus::Error,
                        ],
                        BatchStatus::Cancelled,
                        ctx.now,
                    )
                    .await?;
                if moved {
                    self.messenger.text(&ctx.phone, copy::MEDICAL_CANCELLED).await
                } else {
                    self.medical_not_ready(ctx, &batch).await
                }
            }
            MedicalAction::Wait => {
                let text = if batch.status == BatchStatus::Processing {
                    copy::MEDICAL_IN_PROGRESS
                } else {
                    copy::MEDICAL_WAITING
                };
                self.messenger.text(&ctx.phone, text).await
            }
        }
    }

    async fn medical_not_ready(
        &self,
        ctx: &TurnContext,
        batch: &PendingMedicalBatch,
    ) -> EngineResult<()> {
        let current = self.store.get_batch(batch.id).await?;
        match current.map(|b| b.status) {
            Some(BatchStatus::Processing) => {
                self.messenger.text(&ctx.phone, copy::MEDICAL_IN_PROGRESS).await
            }
            _ => {
                self.messenger
                    .interactive(&ctx.phone, &copy::safe_menu(copy::MEDICAL_NOTHING))
                    .await
            }
        }
    }

    /// The batch is already `processing`. Ends in `completed` or `error`.
    async fn run_analysis(&self, ctx: &TurnContext, batch: PendingMedicalBatch) -> EngineResult<()> {
        let urls = batch.image_urls();
        self.messenger
            .text(&ctx.phone, &copy::medical_started(urls.len()))
            .await?;

        let outcome = self
            .bounded(
                "exam-analyzer",
                self.cfg.analysis_timeout,
                self.analyzer.analyze(ctx.user.id, &urls),
            )
            .await;

        let analysis = match outcome {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "analysis failed");
                self.store
                    .transition_batch(batch.id, &[BatchStatus::Processing], BatchStatus::Error, ctx.now)
                    .await?;
                return self
                    .messenger
                    .interactive(&ctx.phone, &copy::medical_failed())
                    .await;
            }
        };

        let link = match self.reports.create(ctx.user.id, batch.id).await {
            Ok(l) => Some(l),
            Err(e) => {
                warn!(error = %e, "report link not created");
                None
            }
        };
        let completed = self
            .store
            .complete_batch(batch.id, &analysis, link.as_ref().map(|l| l.token.as_str()))
            .await?;
        if !completed {
            warn!("batch left processing before analysis finished");
            return Ok(());
        }
        info!(images = urls.len(), "analysis completed");

        let summary = analysis.get("summary").and_then(|s| s.as_str());
        self.messenger
            .text(
                &ctx.phone,
                &copy::medical_done(summary, link.as_ref().map(|l| l.url.as_str())),
            )
            .await
    }
}
