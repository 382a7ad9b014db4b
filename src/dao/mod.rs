/// Read-only access to the tables owned by the game process.
pub mod game_tables;
/// Row definitions shared by every store.
pub mod models;
/// Snapshot Store holding the last known profile of every player.
pub mod player_store;
/// SQLite plumbing shared by the store implementations.
pub mod sqlite;
/// Storage abstraction layer for database operations.
pub mod storage;
