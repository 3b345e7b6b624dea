pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{gcs_in_memory, seeded_bytes, sha256_hex};
