// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors the dispatcher itself can fail with.
//!
//! Per-work-item failures (a provider timeout, a bad evaluator response, a
//! broken workspace script) are never surfaced here — they're recorded on
//! the emitted [`crate::model::EvaluationResult`] instead. A
//! [`DispatcherError`] means the run as a whole could not complete.

use thiserror::Error;

use crate::writers::WriterError;

/// Errors that abort an entire dispatcher run.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// The dispatcher was given a configuration it cannot run with (e.g. a
    /// zero-worker pool that isn't coerced from a provider requirement).
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    /// The result writer failed to append or close. Per the error table,
    /// the dispatcher aborts rather than silently losing results.
    #[error("result writer failed: {0}")]
    Writer(#[from] WriterError),

    /// A worker or writer task itself panicked.
    #[error("internal dispatcher task failure: {0}")]
    Internal(String),
}
