pub mod error;
pub mod types;

pub use error::{ErrorCode, PlanError, PlanResult};
pub use types::{CollationId, DataType, TableSet};
