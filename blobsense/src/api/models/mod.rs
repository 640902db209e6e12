//! Request and response shapes of the HTTP API.

pub mod analyze;
pub mod blob_upload;
pub mod blobs;
