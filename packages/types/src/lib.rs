pub use anyhow::{Error, Ok, Result, anyhow, bail};
pub use async_trait::async_trait;

pub mod utils;

/// Opaque identifier for new rows.
pub fn create_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
