/// Database model definitions.
pub mod models;
/// Repository trait and its backends.
pub mod party_store;
/// Storage abstraction layer for database operations.
pub mod storage;
