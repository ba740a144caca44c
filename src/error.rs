use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Everything a conversational turn can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Inbound payload could not be understood.
    #[error("invalid webhook payload: {0}")]
    Validation(String),
    /// No active session matched what the caller expected.
    #[error("not found: {0}")]
    NotFound(String),
    /// Optimistic-lock retries were exhausted.
    #[error("conflict on batch {batch_id:?} after {attempts} attempts")]
    Conflict { batch_id: Option<Uuid>, attempts: u32 },
    /// Classifier, detector, analyzer or assistant failed or timed out.
    #[error("external service `{service}` failed: {reason}")]
    ExternalService { service: &'static str, reason: String },
    /// Session is past its `expires_at`.
    #[error("session {0} expired")]
    Expired(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("delivery to {phone} failed: {reason}")]
    Delivery { phone: String, reason: String },
}

impl EngineError {
    pub fn external(service: &'static str, reason: impl ToString) -> Self {
        EngineError::ExternalService {
            service,
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is worth a local bounded retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. } | EngineError::ExternalService { .. }
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(StoreError::Database(e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn conflict_and_external_are_retryable() {
        assert!(EngineError::Conflict { batch_id: None, attempts: 5 }.is_retryable());
        assert!(EngineError::external("intent", "timeout").is_retryable());
        assert!(!EngineError::Validation("x".into()).is_retryable());
        assert!(!EngineError::Expired(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn messages_name_the_service() {
        let msg = EngineError::external("exam-analyzer", "502").to_string();
        assert!(msg.contains("exam-analyzer"));
        assert!(msg.contains("502"));
    }

    #[test]
    fn conflict_message_shows_the_batch_when_known() {
        let id = Uuid::new_v4();
        let known = EngineError::Conflict { batch_id: Some(id), attempts: 5 }.to_string();
        assert!(known.contains(&id.to_string()));
        assert!(known.contains("after 5 attempts"));
        let unknown = EngineError::Conflict { batch_id: None, attempts: 1 }.to_string();
        assert!(unknown.contains("None"));
    }
}
