use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::StoreError;

const TOKEN_LEN: usize = 24;
const LINK_TTL: Duration = Duration::days(30);

/// Shareable link for a finished medical analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLink {
    pub token: String,
    pub url: String,
}

#[async_trait]
pub trait ReportLinks: Send + Sync {
    async fn create(&self, user_id: Uuid, batch_id: Uuid) -> Result<ReportLink, StoreError>;
}

fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn link_for(site_url: &str, token: String) -> ReportLink {
    ReportLink {
        url: format!("{}/relatorio/{}", site_url.trim_end_matches('/'), token),
        token,
    }
}

#[derive(Clone)]
pub struct PgReportLinks {
    db: PgPool,
    site_url: String,
}

impl PgReportLinks {
    pub fn new(db: PgPool, site_url: impl Into<String>) -> Self {
        Self {
            db,
            site_url: site_url.into(),
        }
    }
}

#[async_trait]
impl ReportLinks for PgReportLinks {
    async fn create(&self, user_id: Uuid, batch_id: Uuid) -> Result<ReportLink, StoreError> {
        let token = new_token();
        sqlx::query(
            r#"
            INSERT INTO public_report_links (token, user_id, batch_id, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token)
        .bind(user_id)
        .bind(batch_id)
        .bind(OffsetDateTime::now_utc() + LINK_TTL)
        .execute(&self.db)
        .await?;
        Ok(link_for(&self.site_url, token))
    }
}

#[derive(Default)]
pub struct MemoryReportLinks {
    site_url: String,
    links: Mutex<HashMap<String, (Uuid, Uuid)>>,
}

impl MemoryReportLinks {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            links: Mutex::default(),
        }
    }

    #[cfg(test)]
    pub fn batch_for(&self, token: &str) -> Option<Uuid> {
        self.links.lock().get(token).map(|(_, batch)| *batch)
    }
}

#[async_trait]
impl ReportLinks for MemoryReportLinks {
    async fn create(&self, user_id: Uuid, batch_id: Uuid) -> Result<ReportLink, StoreError> {
        let token = new_token();
        self.links
            .lock()
            .insert(token.clone(), (user_id, batch_id));
        Ok(link_for(&self.site_url, token))
    }
}

#[cfg(test)]
mod report_tests {
    use super::*;

    #[tokio::test]
    async fn link_points_at_site_and_resolves() {
        let links = MemoryReportLinks::new("https://app.example.com/");
        let batch = Uuid::new_v4();
        let link = links.create(Uuid::new_v4(), batch).await.unwrap();
        assert_eq!(link.token.len(), TOKEN_LEN);
        assert_eq!(
            link.url,
            format!("https://app.example.com/relatorio/{}", link.token)
        );
        assert_eq!(links.batch_for(&link.token), Some(batch));
    }
}
