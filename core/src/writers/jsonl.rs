// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One JSON object per line, flushed after every append — the format best
//! suited to tailing a long-running run in progress.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{ResultWriter, WriterError};
use crate::model::EvaluationResult;

/// Appends one JSON object per line to a file.
pub struct JsonlWriter {
    writer: Option<BufWriter<File>>,
}

impl JsonlWriter {
    /// Creates (or truncates) the destination file.
    ///
    /// # Errors
    ///
    /// Propagates the underlying file-open failure.
    pub async fn create(path: &Path) -> Result<Self, WriterError> {
        let file = File::create(path).await?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl ResultWriter for JsonlWriter {
    async fn append(&mut self, result: &EvaluationResult) -> Result<(), WriterError> {
        let writer = self.writer.as_mut().ok_or(WriterError::AlreadyClosed)?;
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }
}
