pub mod config;
pub mod error;
pub mod home;
pub mod json_bridge;
pub mod schema;
pub mod store;

pub use config::CohortConfig;
pub use error::{Result, StoreError};
pub use home::{CohortHome, DATA_DIR_ENV, default_base_dir, resolve_base_dir};
pub use store::{Store, WorkspaceSummary, decode_vector, encode_vector};
