pub mod models;
pub mod store;

pub use models::{KeyRecord, KeyStatus, StatusDecodeError, StoredStatus, UpdateSource};
