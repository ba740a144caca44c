pub mod memory;
pub mod nutrition;
pub mod repo;
mod repo_types;

pub use memory::MemoryMealLog;
pub use repo::{MealLog, PgMealLog};
pub use repo_types::NewMealEntry;
