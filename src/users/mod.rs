pub mod memory;
pub mod phone;
pub mod repo;
mod repo_types;

pub use memory::MemoryUserDirectory;
pub use repo::{PgUserDirectory, UserDirectory};
pub use repo_types::User;
