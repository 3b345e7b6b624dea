//! Bundle store and device registry.
//!
//! Both live on top of an [`ObjectStore`](splitstore_storage::ObjectStore):
//! - bundle records and their blobs under `bundles/`
//! - device registrations under `devices/`

pub mod bundles;
pub mod devices;
pub mod error;

pub use bundles::{BundleStore, BundleUpload, RevisionListener, UploadAck};
pub use devices::DeviceRegistry;
pub use error::{CatalogError, CatalogResult};
