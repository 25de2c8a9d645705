use std::path::{Path, PathBuf};
use std::process::Command;

use ocistage_core::{parse_tag_list, PendingConfig, ToolConfig};
use tracing::info;

use crate::{describe_command, CommandRunner, ImageLayout, OutputMode, Result, StageError};

/// Image store primitives, each one `umoci` invocation run from the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Umoci {
    binary: PathBuf,
    layout: ImageLayout,
    rootless: bool,
}

impl Umoci {
    pub fn new(layout: &ImageLayout, tools: &ToolConfig) -> Self {
        Self {
            binary: tools.umoci.clone(),
            layout: layout.clone(),
            rootless: tools.rootless,
        }
    }

    pub fn init_layout(&self, runner: &impl CommandRunner) -> Result<()> {
        let mut command = self.command();
        command
            .arg("init")
            .arg(format!("--layout={}", self.layout.name()));
        self.run_checked(runner, &mut command, "init")
    }

    pub fn new_image(&self, runner: &impl CommandRunner, tag: &str) -> Result<()> {
        info!(layout = %self.layout.name(), tag = %tag, "creating empty image");
        let mut command = self.command();
        command.arg("new").arg("--image").arg(self.layout.image_ref(tag));
        self.run_checked(runner, &mut command, "new")
    }

    /// Tag names in the layout. A listing that writes anything to stderr is
    /// treated as failed even when it exits zero.
    pub fn list_tags(&self, runner: &impl CommandRunner) -> Result<Vec<String>> {
        let mut command = self.command();
        command.arg("ls").arg("--layout").arg(self.layout.name());
        let output = runner
            .run(&mut command, OutputMode::Captured)
            .map_err(|err| StageError::ListTagsUnavailable {
                detail: format!("failed to start {}: {err}", describe_command(&command)),
            })?;
        if !output.success() || !output.stderr.is_empty() {
            return Err(StageError::ListTagsUnavailable {
                detail: output.detail(),
            });
        }
        Ok(parse_tag_list(&output.stdout_text()))
    }

    pub fn unpack(&self, runner: &impl CommandRunner, tag: &str, dest: &Path) -> Result<()> {
        info!(tag = %tag, dest = %dest.display(), "unpacking image");
        let mut command = self.command();
        command.arg("unpack");
        if self.rootless {
            command.arg("--rootless");
        }
        command
            .arg("--image")
            .arg(self.layout.image_ref(tag))
            .arg(dest);
        self.run_checked(runner, &mut command, "unpack")
    }

    pub fn repack(&self, runner: &impl CommandRunner, tag: &str, src: &Path) -> Result<()> {
        info!(tag = %tag, src = %src.display(), "repacking image");
        let mut command = self.command();
        command
            .arg("repack")
            .arg("--image")
            .arg(self.layout.image_ref(tag))
            .arg(src);
        self.run_checked(runner, &mut command, "repack")
    }

    pub fn remove(&self, runner: &impl CommandRunner, tag: &str) -> Result<()> {
        info!(tag = %tag, "removing tag");
        let mut command = self.command();
        command.arg("rm").arg("--image").arg(self.layout.image_ref(tag));
        self.run_checked(runner, &mut command, "rm")
    }

    pub fn gc(&self, runner: &impl CommandRunner) -> Result<()> {
        let mut command = self.command();
        command.arg("gc").arg("--layout").arg(self.layout.name());
        self.run_checked(runner, &mut command, "gc")
    }

    pub fn tag_alias(
        &self,
        runner: &impl CommandRunner,
        existing: &str,
        new_tag: &str,
    ) -> Result<()> {
        info!(existing = %existing, new_tag = %new_tag, "adding tag alias");
        let mut command = self.command();
        command
            .arg("tag")
            .arg("--image")
            .arg(self.layout.image_ref(existing))
            .arg(new_tag);
        self.run_checked(runner, &mut command, "tag")
    }

    /// Writes all pending entrypoint arguments into the image config of `tag`
    /// in a single invocation.
    pub fn set_config_cmd(
        &self,
        runner: &impl CommandRunner,
        tag: &str,
        pending: &PendingConfig,
    ) -> Result<()> {
        info!(tag = %tag, args = ?pending.entrypoint_args, "setting image entrypoint");
        let mut command = self.command();
        command
            .arg("config")
            .arg("--image")
            .arg(self.layout.absolute_image_ref(tag))
            .args(pending.config_cmd_flags());
        self.run_checked(runner, &mut command, "config")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.current_dir(self.layout.store_root());
        command
    }

    fn run_checked(
        &self,
        runner: &impl CommandRunner,
        command: &mut Command,
        primitive: &str,
    ) -> Result<()> {
        let output = runner
            .run(command, OutputMode::Captured)
            .map_err(|err| StageError::StoreCommand {
                command: describe_command(command),
                detail: format!("umoci {primitive} failed to start: {err}"),
            })?;
        if output.success() {
            return Ok(());
        }
        Err(StageError::StoreCommand {
            command: describe_command(command),
            detail: output.detail(),
        })
    }
}
