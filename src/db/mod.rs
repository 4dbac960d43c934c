//! SQLite persistence for recordings and their analysis jobs.

mod init;
pub mod recordings;
pub mod store;

pub use init::{init_db_at, migrate};
pub use recordings::{NewRecording, RecordingRecord, RecordingRepository};
pub use store::SqliteStore;
