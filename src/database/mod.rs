// Database module
// SQLite holds document metadata and QA history, LanceDB holds element embeddings

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
