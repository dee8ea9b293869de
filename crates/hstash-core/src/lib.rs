//! hstash-core: configuration, error taxonomy, and the records shared by the
//! vault crates.

pub mod config;
pub mod error;
pub mod types;

pub use error::{HstashError, HstashResult};
pub use types::{EncryptedObjectRecord, KeyMode, RotationState, UserKeyMaterial};
