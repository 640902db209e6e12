//! HTTP surface of the service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - `POST /api/analyze?filename=` stores an upload; `POST /api/analyze?url=` streams an analysis
//! - `POST /api/blob/upload` issues client upload tokens and receives upload-completed notifications
//! - `PUT /blobs/{pathname}` accepts a client upload authorized by such a token
//! - `GET /blobs/{pathname}` serves stored files

pub mod handlers;
pub mod models;
