pub mod errors;
pub mod merge;
pub mod models;
pub mod protocol;
pub mod schedule;
pub mod stats;
pub mod views;

pub use errors::*;
pub use models::*;

pub type SyncResult<T> = Result<T, ClientError>;
