pub mod database;
pub mod error_recorder;
pub mod models;

pub use database::Database;
pub use error_recorder::ErrorRecorder;
