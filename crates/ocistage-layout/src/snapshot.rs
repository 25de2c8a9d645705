use std::path::{Path, PathBuf};
use std::process::Command;

use ocistage_core::{ToolConfig, EMPTY_TAG};
use tracing::{info, warn};

use crate::{describe_command, CommandRunner, OutputMode, Result, SnapshotOperation, StageError};

/// `lpack` copy-on-write backend over a btrfs mount.
///
/// Commands run in `work_dir`, which is where lpack finds its own
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBackend {
    lpack: PathBuf,
    btrfs: PathBuf,
    mount_point: PathBuf,
    work_dir: PathBuf,
}

impl SnapshotBackend {
    pub fn new(
        mount_point: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        tools: &ToolConfig,
    ) -> Self {
        Self {
            lpack: tools.lpack.clone(),
            btrfs: tools.btrfs.clone(),
            mount_point: mount_point.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Creates the baseline `empty` subvolume under the mount point.
    pub fn create_baseline_volume(&self, runner: &impl CommandRunner) -> Result<()> {
        let volume = self.mount_point.join(EMPTY_TAG);
        info!(volume = %volume.display(), "creating baseline subvolume");
        let mut command = Command::new(&self.btrfs);
        command.arg("subvolume").arg("create").arg(&volume);
        let output = runner
            .run(&mut command, OutputMode::Captured)
            .map_err(|err| StageError::BackendCommand {
                operation: SnapshotOperation::CreateVolume,
                tag: EMPTY_TAG.to_string(),
                detail: format!("failed to start {}: {err}", describe_command(&command)),
            })?;
        if output.success() {
            return Ok(());
        }
        Err(StageError::BackendCommand {
            operation: SnapshotOperation::CreateVolume,
            tag: EMPTY_TAG.to_string(),
            detail: output.detail(),
        })
    }

    /// `lpack unpack`. Failures are logged and ignored.
    pub fn bootstrap(&self, runner: &impl CommandRunner) {
        let mut command = self.lpack_command();
        command.arg("unpack");
        match runner.run(&mut command, OutputMode::Captured) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                warn!(detail = %output.detail(), "lpack unpack failed; continuing");
            }
            Err(err) => {
                warn!(error = %err, "lpack unpack could not be started; continuing");
            }
        }
    }

    pub fn checkout(&self, runner: &impl CommandRunner, tag: &str) -> Result<()> {
        self.run_tag_operation(runner, SnapshotOperation::Checkout, tag)
    }

    pub fn checkin(&self, runner: &impl CommandRunner, tag: &str) -> Result<()> {
        self.run_tag_operation(runner, SnapshotOperation::Checkin, tag)
    }

    fn run_tag_operation(
        &self,
        runner: &impl CommandRunner,
        operation: SnapshotOperation,
        tag: &str,
    ) -> Result<()> {
        info!(operation = operation.as_str(), tag = %tag, "snapshot backend");
        let mut command = self.lpack_command();
        command.arg(operation.as_str()).arg(tag);
        let output = runner
            .run(&mut command, OutputMode::Captured)
            .map_err(|err| StageError::BackendCommand {
                operation,
                tag: tag.to_string(),
                detail: format!("failed to start lpack: {err}"),
            })?;
        if output.success() {
            return Ok(());
        }
        Err(StageError::BackendCommand {
            operation,
            tag: tag.to_string(),
            detail: output.detail(),
        })
    }

    fn lpack_command(&self) -> Command {
        let mut command = Command::new(&self.lpack);
        command.current_dir(&self.work_dir);
        command
    }
}
