//! hstash-storage: opaque byte store for encrypted objects
//!
//! The vault only ever hands this crate ciphertext. Timeouts and retries for
//! transient failures live here, at the adapter boundary.

pub mod health;
pub mod operator;
pub mod store;

pub use health::check_health;
pub use operator::{build_operator, S3Credentials};
pub use store::{ObjectStore, OpendalStore};
