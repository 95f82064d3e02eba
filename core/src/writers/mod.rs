// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Result-stream writers: the dispatcher's only output surface.
//!
//! Every writer is append-only and must be closed exactly once; appending
//! after close is an error, and closing twice is a no-op, not an error.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::model::EvaluationResult;

pub mod json;
pub mod jsonl;
pub mod junit;
pub mod multiplex;
pub mod yaml;

pub use json::JsonWriter;
pub use jsonl::JsonlWriter;
pub use junit::JunitWriter;
pub use multiplex::MultiplexWriter;
pub use yaml::YamlWriter;

/// Errors a [`ResultWriter`] can fail with.
#[derive(Debug, Error)]
pub enum WriterError {
    /// `append` or `close` was called on a writer already closed.
    #[error("writer already closed")]
    AlreadyClosed,
    /// An I/O failure while writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization failure (JSON).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A serialization failure (YAML).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The destination path had no recognized extension.
    #[error("unrecognized output format for path: {0}")]
    UnrecognizedFormat(String),
}

/// Consumes one [`EvaluationResult`] at a time, append-only, until closed.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// Appends one result.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::AlreadyClosed`] if called after [`ResultWriter::close`].
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError>;

    /// Flushes and finalizes the writer. Idempotent: a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates any I/O or serialization failure from the final flush.
    async fn close(&mut self) -> Result<(), WriterError>;
}

/// Builds the appropriate writer for a destination path, dispatching on its
/// extension (`.jsonl`, `.json`, `.yaml`/`.yml`, `.xml` for JUnit).
///
/// # Errors
///
/// Returns [`WriterError::UnrecognizedFormat`] for an unknown extension, and
/// propagates I/O errors from opening the destination file.
pub async fn build_writer_for_path(path: &Path) -> Result<Box<dyn ResultWriter>, WriterError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => Ok(Box::new(JsonlWriter::create(path).await?)),
        Some("json") => Ok(Box::new(JsonWriter::new(path.to_path_buf()))),
        Some("yaml" | "yml") => Ok(Box::new(YamlWriter::new(path.to_path_buf()))),
        Some("xml") => Ok(Box::new(JunitWriter::new(path.to_path_buf()))),
        _ => Err(WriterError::UnrecognizedFormat(path.display().to_string())),
    }
}
