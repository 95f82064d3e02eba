// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # AgentV Suite Loader
//!
//! Reads declarative test-suite files into the core crate's `EvalCase`
//! records. A thin reference implementation (§10): it resolves the
//! author-facing suite schema (aliases, `rubrics` sugar, `file` message
//! references) but does no rigor beyond `serde_valid` shape validation.
//!
//! ## Modules
//!
//! - `schema`: the on-disk suite schema (`RawCase`, `RawMessage`, rubric sugar)
//! - `loader`: suite loading (JSON/YAML/JSONL), with file-reference resolution
//!
//! ## Example
//!
//! ```no_run
//! use agentv_datasets::loader::SuiteLoader;
//! use std::path::Path;
//!
//! let loader = SuiteLoader::new();
//! let cases = loader.load(Path::new("suites/smoke.yaml")).unwrap();
//! println!("loaded {} cases", cases.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::correctness)]

pub mod loader;
pub mod schema;


pub use schema::{RawCase, RawRubric, Suite};

use thiserror::Error;

/// Suite-loading errors.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// No case or file reference was found at the expected location.
    #[error("not found: {0}")]
    NotFound(String),

    /// The suite file's extension or envelope shape wasn't recognized.
    #[error("invalid suite format: {0}")]
    InvalidFormat(String),

    /// An I/O failure while reading the suite file or a referenced file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The suite file's JSON failed to parse.
    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The suite file's YAML failed to parse.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The parsed suite or case failed `serde_valid` schema validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}
