pub mod mock;
pub mod observability;
pub mod persistence;

pub use persistence::Database;
pub use persistence::repositories::SqliteScoreRepository;
