pub mod qdrant;
pub mod sqlite;

pub use qdrant::QdrantStore;
pub use sqlite::{FirstTurn, SqliteStore};
