use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

use super::phone::{digits, variants};
use super::repo::UserDirectory;
use super::repo_types::User;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryUserDirectory {
    by_phone: RwLock<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, phone: &str, full_name: Option<&str>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            phone: digits(phone),
            full_name: full_name.map(str::to_owned),
            created_at: OffsetDateTime::now_utc(),
        };
        self.by_phone
            .write()
            .insert(user.phone.clone(), user.clone());
        user
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let map = self.by_phone.read();
        Ok(variants(phone).iter().find_map(|p| map.get(p).cloned()))
    }
}

#[cfg(test)]
mod memory_user_tests {
    use super::*;

    #[tokio::test]
    async fn finds_user_registered_without_ninth_digit() {
        let dir = MemoryUserDirectory::new();
        let u = dir.register("551187654321", Some("Ana Souza"));
        let found = dir.find_by_phone("+55 11 98765-4321").await.unwrap().unwrap();
        assert_eq!(found.id, u.id);
        assert_eq!(found.first_name(), Some("Ana"));
    }

    #[tokio::test]
    async fn unknown_phone_is_none() {
        let dir = MemoryUserDirectory::new();
        assert!(dir.find_by_phone("5521999990000").await.unwrap().is_none());
    }
}
