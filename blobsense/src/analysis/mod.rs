//! The file-analysis pipeline.
//!
//! A request flows through these components strictly in sequence:
//!
//! 1. [`ContentTypeResolver`] turns a file reference into a [`RemoteFileRef`] (download URL plus
//!    declared content type)
//! 2. [`AnalysisDispatcher`] picks an [`AnalysisMode`] and submits the matching prompt, including the
//!    one-shot inline fallback for images and the length cap for text
//! 3. [`relay()`] forwards the provider's fragments to the caller as they arrive
//!
//! Once a dispatch has produced a stream, a [`CleanupTask`] is handed to the [`CleanupScheduler`],
//! which deletes the source file after a delay independently of the request.

pub mod cleanup;
pub mod dispatch;
pub mod mode;
pub mod prompt;
pub mod relay;
pub mod resolver;
pub mod source;

pub use cleanup::{CleanupError, CleanupHandle, CleanupScheduler, CleanupTask, TokioCleanupScheduler};
pub use dispatch::{AnalysisDispatcher, AnalysisStream, DispatchOutcome, ImageSubmission};
pub use mode::AnalysisMode;
pub use relay::relay;
pub use resolver::{ContentTypeResolver, RemoteFileRef};
pub use source::FileSource;
