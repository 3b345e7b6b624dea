//! HTTP request handlers.

pub mod bundles;
pub mod devices;
pub mod download;
pub mod health;

pub use bundles::*;
pub use devices::*;
pub use download::*;
pub use health::*;
