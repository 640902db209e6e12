//! HTTP request handlers.
//!
//! - [`analyze`]: file upload and streamed analysis
//! - [`blob_upload`]: client upload authorization and the upload-completed hook
//! - [`blobs`]: client uploads and serving of stored files
//!
//! Handlers return [`crate::errors::Error`], which converts to a status code and a JSON
//! `{message}` body. The upload-authorization endpoint answers with `{error}` instead.

pub mod analyze;
pub mod blob_upload;
pub mod blobs;
