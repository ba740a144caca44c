use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::Date;
use uuid::Uuid;

use super::repo::MealLog;
use super::repo_types::{MealNutrition, MealRecord, NewMealEntry};
use crate::error::StoreError;
use crate::sessions::{DetectedFood, NutritionTotals};

#[derive(Default)]
pub struct MemoryMealLog {
    rows: Mutex<HashMap<Uuid, MealRecord>>,
}

impl MemoryMealLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MealLog for MemoryMealLog {
    async fn create_unconfirmed(&self, e: &NewMealEntry) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.rows.lock().insert(
            id,
            MealRecord {
                id,
                user_id: e.user_id,
                meal_type: e.meal_type.as_str().to_owned(),
                meal_date: e.meal_date,
                confirmed: false,
                notes: None,
                nutrition: Some(MealNutrition {
                    totals: e.totals,
                    food_items: e.foods.clone(),
                }),
            },
        );
        Ok(id)
    }

    async fn update_items(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().get_mut(&id) {
            row.nutrition = Some(MealNutrition {
                totals: *totals,
                food_items: foods.to_vec(),
            });
        }
        Ok(())
    }

    async fn confirm(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        row.confirmed = true;
        row.notes = Some("confirmed via whatsapp".into());
        row.nutrition = Some(MealNutrition {
            totals: *totals,
            food_items: foods.to_vec(),
        });
        Ok(true)
    }

    async fn discard(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rows.lock().remove(&id).is_some())
    }

    async fn annotate(&self, id: Uuid, note: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().get_mut(&id) {
            if !row.confirmed {
                row.notes = Some(note.to_owned());
            }
        }
        Ok(())
    }

    async fn daily_total_kcal(&self, user_id: Uuid, day: Date) -> Result<f64, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.user_id == user_id && r.meal_date == day && r.confirmed)
            .filter_map(|r| r.nutrition.as_ref())
            .map(|n| n.totals.kcal)
            .sum())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError> {
        Ok(self.rows.lock().get(&id).cloned())
    }
}

#[cfg(test)]
mod memory_meal_tests {
    use super::*;
    use crate::sessions::MealType;
    use time::macros::date;

    fn entry(user_id: Uuid, kcal: f64) -> NewMealEntry {
        NewMealEntry {
            user_id,
            meal_type: MealType::Lunch,
            meal_date: date!(2024 - 05 - 10),
            image_url: Some("https://img/1.jpg".into()),
            source: "image",
            foods: vec![DetectedFood::new("arroz", 150.0)],
            totals: NutritionTotals {
                kcal,
                ..Default::default()
            },
            ai_raw: None,
        }
    }

    #[tokio::test]
    async fn only_confirmed_rows_count_towards_daily_total() {
        let log = MemoryMealLog::new();
        let user = Uuid::new_v4();
        let a = log.create_unconfirmed(&entry(user, 300.0)).await.unwrap();
        let _b = log.create_unconfirmed(&entry(user, 500.0)).await.unwrap();

        let totals = NutritionTotals {
            kcal: 320.0,
            ..Default::default()
        };
        assert!(log.confirm(a, &[], &totals).await.unwrap());
        let day = date!(2024 - 05 - 10);
        assert_eq!(log.daily_total_kcal(user, day).await.unwrap(), 320.0);
    }

    #[tokio::test]
    async fn discard_removes_once() {
        let log = MemoryMealLog::new();
        let id = log
            .create_unconfirmed(&entry(Uuid::new_v4(), 100.0))
            .await
            .unwrap();
        assert!(log.discard(id).await.unwrap());
        assert!(!log.discard(id).await.unwrap());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn annotate_leaves_confirmed_rows_alone() {
        let log = MemoryMealLog::new();
        let id = log
            .create_unconfirmed(&entry(Uuid::new_v4(), 100.0))
            .await
            .unwrap();
        log.confirm(id, &[], &NutritionTotals::default()).await.unwrap();
        log.annotate(id, "cleared").await.unwrap();
        let row = log.get(id).await.unwrap().unwrap();
        assert_eq!(row.notes.as_deref(), Some("confirmed via whatsapp"));
    }
}
