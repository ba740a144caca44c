use async_trait::async_trait;
use sqlx::PgPool;

use super::phone::variants;
use super::repo_types::User;
use crate::error::StoreError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolves a sender phone, trying the 9th-digit and country-code variants.
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    db: PgPool,
}

impl PgUserDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let candidates = variants(phone);
        if candidates.is_empty() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, full_name, created_at
            FROM users
            WHERE regexp_replace(phone, '\D', '', 'g') = ANY($1)
            ORDER BY array_position($1, regexp_replace(phone, '\D', '', 'g'))
            LIMIT 1
            "#,
        )
        .bind(&candidates)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}
