use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use time::Date;
use uuid::Uuid;

use crate::sessions::{DetectedFood, MealType, NutritionTotals};

/// Unconfirmed meal-log row created at detection time.
#[derive(Debug, Clone)]
pub struct NewMealEntry {
    pub user_id: Uuid,
    pub meal_type: MealType,
    pub meal_date: Date,
    pub image_url: Option<String>,
    pub source: &'static str,
    pub foods: Vec<DetectedFood>,
    pub totals: NutritionTotals,
    pub ai_raw: Option<serde_json::Value>,
}

#[derive(Debug, FromRow)]
pub struct MealRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub meal_type: String,
    pub meal_date: Date,
    pub confirmed: bool,
    pub notes: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct MealNutritionRow {
    pub meal_id: Uuid,
    pub total_calories_kcal: f64,
    pub protein_g: f64,
    pub fat_g: f64,
    pub carbs_g: f64,
    pub fiber_g: f64,
    pub food_items: Json<Vec<DetectedFood>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealNutrition {
    pub totals: NutritionTotals,
    pub food_items: Vec<DetectedFood>,
}

impl From<MealNutritionRow> for MealNutrition {
    fn from(r: MealNutritionRow) -> Self {
        Self {
            totals: NutritionTotals {
                kcal: r.total_calories_kcal,
                protein: r.protein_g,
                carbs: r.carbs_g,
                fat: r.fat_g,
                fiber: r.fiber_g,
            },
            food_items: r.food_items.0,
        }
    }
}

/// Durable meal as seen by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct MealRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub meal_type: String,
    pub meal_date: Date,
    pub confirmed: bool,
    pub notes: Option<String>,
    pub nutrition: Option<MealNutrition>,
}
