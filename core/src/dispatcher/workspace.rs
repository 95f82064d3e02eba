// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-case workspace materialization: clones a seed template into a fresh
//! temporary directory and runs the declared setup/teardown scripts.
//!
//! A workspace is never shared between work items — each gets its own
//! [`tempfile::TempDir`], dropped (and deleted) once the work item's
//! teardown step completes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::WorkspaceDescriptor;

/// Errors materializing or tearing down a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Failed to create the temporary directory or clone the seed template.
    #[error("failed to materialize workspace: {0}")]
    Materialize(#[source] std::io::Error),

    /// The setup or teardown script exited non-zero.
    #[error("workspace script exited with {0}")]
    ScriptFailed(std::process::ExitStatus),

    /// Failed to spawn the setup or teardown script.
    #[error("failed to run workspace script: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A workspace materialized for exactly one work item.
pub struct MaterializedWorkspace {
    /// The workspace's filesystem path.
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

/// Clones `descriptor`'s seed template (if any) into a fresh temp directory
/// and runs its setup script, if declared.
///
/// # Errors
///
/// Returns [`WorkspaceError::Materialize`] if the directory clone fails, or
/// [`WorkspaceError::ScriptFailed`]/[`WorkspaceError::Spawn`] if the setup
/// script fails.
pub async fn materialize(descriptor: &WorkspaceDescriptor) -> Result<MaterializedWorkspace, WorkspaceError> {
    let temp_dir = tempfile::tempdir().map_err(WorkspaceError::Materialize)?;
    let path = temp_dir.path().to_path_buf();

    if let Some(template) = descriptor.template_path.clone() {
        let dest = path.clone();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&template, &dest))
            .await
            .map_err(|e| WorkspaceError::Materialize(std::io::Error::other(e.to_string())))?
            .map_err(WorkspaceError::Materialize)?;
    }

    if let Some(script) = &descriptor.setup_script {
        run_script(script, &path, &descriptor.env).await?;
    }

    Ok(MaterializedWorkspace { path, _temp_dir: temp_dir })
}

/// Runs `descriptor`'s teardown script, if declared. Best-effort: a failure
/// is logged by the caller and never fails the work item, since the
/// provider's own results have already been captured.
///
/// # Errors
///
/// Returns [`WorkspaceError::ScriptFailed`] or [`WorkspaceError::Spawn`] if
/// the script itself fails to run; the caller decides whether that matters.
pub async fn teardown(descriptor: &WorkspaceDescriptor, path: &Path) -> Result<(), WorkspaceError> {
    let Some(script) = &descriptor.teardown_script else {
        return Ok(());
    };
    run_script(script, path, &descriptor.env).await
}

async fn run_script(script: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Result<(), WorkspaceError> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .envs(env)
        .status()
        .await
        .map_err(WorkspaceError::Spawn)?;
    if !status.success() {
        return Err(WorkspaceError::ScriptFailed(status));
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}
