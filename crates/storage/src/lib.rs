mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresStorage};
pub use record::{
    now_rfc3339, CalcResultRecord, CalcRunRecord, InputVersionRecord, RunFailure, RunStatus,
};
pub use traits::CalcStorage;
