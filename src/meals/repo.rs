use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::Date;
use uuid::Uuid;

use super::repo_types::{MealNutritionRow, MealRecord, MealRow, NewMealEntry};
use crate::error::StoreError;
use crate::sessions::{DetectedFood, NutritionTotals};

/// The durable meal log a nutrition session confirms or cancels.
#[async_trait]
pub trait MealLog: Send + Sync {
    async fn create_unconfirmed(&self, entry: &NewMealEntry) -> Result<Uuid, StoreError>;

    async fn update_items(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<(), StoreError>;

    /// Flips the row to confirmed with final numbers. Repeating it is harmless.
    async fn confirm(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<bool, StoreError>;

    /// Deletes the row. Returns `false` when it was already gone.
    async fn discard(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Keeps the row unconfirmed and annotates it.
    async fn annotate(&self, id: Uuid, note: &str) -> Result<(), StoreError>;

    async fn daily_total_kcal(&self, user_id: Uuid, day: Date) -> Result<f64, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError>;
}

#[derive(Clone)]
pub struct PgMealLog {
    db: PgPool,
}

impl PgMealLog {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

async fn write_nutrition(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    foods: &[DetectedFood],
    totals: &NutritionTotals,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE meal_nutrition
           SET total_calories_kcal = $2, protein_g = $3, carbs_g = $4,
               fat_g = $5, fiber_g = $6, food_items = $7
         WHERE meal_id = $1
        "#,
    )
    .bind(id)
    .bind(totals.kcal)
    .bind(totals.protein)
    .bind(totals.carbs)
    .bind(totals.fat)
    .bind(totals.fiber)
    .bind(Json(foods))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl MealLog for PgMealLog {
    async fn create_unconfirmed(&self, e: &NewMealEntry) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO meals (id, user_id, meal_type, meal_date, image_url, source, confirmed)
            VALUES ($1, $2, $3, $4, $5, $6, false)
            "#,
        )
        .bind(id)
        .bind(e.user_id)
        .bind(e.meal_type.as_str())
        .bind(e.meal_date)
        .bind(&e.image_url)
        .bind(e.source)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO meal_nutrition
                (meal_id, total_calories_kcal, protein_g, carbs_g, fat_g, fiber_g, food_items, ai_raw)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(e.totals.kcal)
        .bind(e.totals.protein)
        .bind(e.totals.carbs)
        .bind(e.totals.fat)
        .bind(e.totals.fiber)
        .bind(Json(&e.foods))
        .bind(e.ai_raw.as_ref().map(Json))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn update_items(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        write_nutrition(&mut tx, id, foods, totals).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn confirm(
        &self,
        id: Uuid,
        foods: &[DetectedFood],
        totals: &NutritionTotals,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        let res = sqlx::query(
            "UPDATE meals SET confirmed = true, notes = 'confirmed via whatsapp' WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        write_nutrition(&mut tx, id, foods, totals).await?;
        tx.commit().await?;
        Ok(res.rows_affected() == 1)
    }

    async fn discard(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM meals WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn annotate(&self, id: Uuid, note: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE meals SET notes = $2 WHERE id = $1 AND confirmed = false")
            .bind(id)
            .bind(note)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn daily_total_kcal(&self, user_id: Uuid, day: Date) -> Result<f64, StoreError> {
        let total: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(n.total_calories_kcal), 0)::float8
              FROM meals m
              JOIN meal_nutrition n ON n.meal_id = m.id
             WHERE m.user_id = $1 AND m.meal_date = $2 AND m.confirmed = true
            "#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError> {
        let Some(meal) = sqlx::query_as::<_, MealRow>(
            r#"
            SELECT id, user_id, meal_type, meal_date, confirmed, notes
              FROM meals
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let nutrition = sqlx::query_as::<_, MealNutritionRow>(
            r#"
            SELECT meal_id, total_calories_kcal, protein_g, fat_g, carbs_g, fiber_g, food_items
              FROM meal_nutrition
             WHERE meal_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(Some(MealRecord {
            id: meal.id,
            user_id: meal.user_id,
            meal_type: meal.meal_type,
            meal_date: meal.meal_date,
            confirmed: meal.confirmed,
            notes: meal.notes,
            nutrition: nutrition.map(Into::into),
        }))
    }
}
