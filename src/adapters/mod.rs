//! Source and destination capabilities plus the bundled implementations.
//!
//! The engine only ever sees [`SourceAdapter`] and [`DestinationAdapter`];
//! platform specifics (auth, wire protocols) stay behind these traits and
//! are reduced to a [`FailureClass`](crate::model::FailureClass) at the
//! boundary.

pub mod directory;
pub mod http;
pub mod registry;
pub mod storage;
mod traits;

pub use directory::DirectorySource;
pub use http::{HttpConfig, HttpItem, HttpSource};
pub use registry::{AdapterRegistry, RegistryError};
pub use storage::{ObjectStoreDestination, S3Options};
pub use traits::{DestinationAdapter, PublishError, PublishMetadata, SourceAdapter, SourceError};
