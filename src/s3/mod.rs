//! S3 backends module
//!
//! This module provides the three independent S3 client backends:
//! - [`sdk::SdkBackend`] - official AWS SDK
//! - [`sigv4::SigV4Backend`] - plain HTTP with hand-signed requests
//! - [`store::StoreBackend`] - Apache Arrow `object_store`
//!
//! and the shared [`backend::Backend`] interface and [`types`] they report in.

pub mod backend;
pub mod error;
pub mod sdk;
pub mod signer;
pub mod sigv4;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod memory;

// Re-export commonly used types
pub use backend::{Backend, BackendKind, ByteStream, PageStream};
pub use error::BackendError;
pub use types::{classify, is_downloadable, Classification, IdentityInfo, ObjectEntry, RawEntry};
