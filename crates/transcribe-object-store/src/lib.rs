//! S3-compatible object store adapter (component B).
//!
//! Talks to any S3-compatible bucket (Cloudflare R2, MinIO, AWS S3 itself)
//! through `aws-sdk-s3`. This adapter models only the surface the worker and
//! submitter actually depend on: streaming download to a local path,
//! existence/metadata checks, and presigned URL issuance for the
//! out-of-scope upload/download HTTP surface to hand to clients.

mod key;
mod store;

pub use key::generate_object_key;
pub use store::{S3ObjectStore, S3ObjectStoreConfig};
