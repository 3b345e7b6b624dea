//! Core domain types and shared configuration for Splitstore.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Bundle identities, revisions and stored records
//! - Device specs and registrations
//! - Split sets, generation requests and cache keys
//! - Application configuration

pub mod bundle;
pub mod config;
pub mod device;
pub mod error;
pub mod hash;
pub mod split;

pub use bundle::{BundleId, BundleRecord, BundleSummary, Revision, SigningConfig};
pub use device::{DeviceId, DeviceRegistration, DeviceSpec};
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use split::{CacheKey, SplitApk, SplitRequest, SplitSet, is_language_tag};
