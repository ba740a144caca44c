pub mod memory;
pub mod model;
pub mod repo;
mod repo_types;

pub use memory::MemorySessionStore;
pub use model::{
    BatchImage, BatchStatus, DetectedFood, MealType, NutritionOutcome, NutritionPhase,
    NutritionTotals, PendingMedicalBatch, PendingNutrition,
};
pub use repo::{PgSessionStore, SessionStore};
