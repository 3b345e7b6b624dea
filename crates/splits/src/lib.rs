//! Split generation coordination.
//!
//! Resolves device requests to signed split sets:
//! - [`engine`]: pluggable split generation engines
//! - [`cache`]: memory LRU plus persisted archive tier
//! - [`coordinator`]: singleflight generation, signing and publishing
//! - [`archive`]: deterministic tar encoding of split sets

pub mod archive;
pub mod cache;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod metrics;

pub use cache::{CachedSplits, SplitCache};
pub use coordinator::{ResolveSource, Resolved, SplitCoordinator};
pub use engine::{BundleSource, CommandEngine, LayoutEngine, SplitEngine};
pub use error::{SplitError, SplitResult};
