// Sink plugin implementations
pub mod jsonl;
pub mod sqlite;

pub use jsonl::JsonLinesSink;
pub use sqlite::SqliteSink;
