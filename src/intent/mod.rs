pub mod classifier;
pub mod model;
pub mod parser;
pub mod vocabulary;

pub use classifier::{ClassifyContext, IntentClassifier, IntentQuery, IntentService};
pub use model::{Classified, FoodRef, Intent, IntentName, IntentSource};
