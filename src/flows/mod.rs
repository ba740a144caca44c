pub mod copy;
pub mod medical;
pub mod nutrition;

pub use medical::{Appended, MedicalAction};
pub use nutrition::{apply_edit, NutritionAction};
