use std::path::Path;

use ocistage_core::{BackendConfig, ToolConfig, EMPTY_TAG};
use tracing::{info, warn};

use crate::fs_utils::remove_dir_all_if_exists;
use crate::{CommandRunner, ImageLayout, Result, SnapshotBackend, StageError, Umoci};

/// How filesystem trees move between the image store and the working root.
///
/// Chosen once when the controller is built; everything else goes through
/// [`Backend::unpack`], [`Backend::commit`] and [`Backend::bootstrap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// `umoci unpack` / `umoci repack` into `<store_root>/unpacked`.
    Default,
    /// `lpack checkout` / `lpack checkin` on a btrfs mount.
    Snapshot(SnapshotBackend),
}

impl Backend {
    pub fn select(config: &BackendConfig, work_dir: &Path, tools: &ToolConfig) -> Self {
        match &config.snapshot_mount_point {
            Some(mount_point) => {
                Self::Snapshot(SnapshotBackend::new(mount_point, work_dir, tools))
            }
            None => Self::Default,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Snapshot(_) => "snapshot",
        }
    }

    /// One-time setup after the layout exists. `needs_empty` is set when the
    /// `empty` tag was just created and still has to be committed once.
    ///
    /// Store failures are fatal in both modes. The snapshot backend's own
    /// steps (baseline subvolume, `lpack unpack`) are logged and skipped.
    pub fn bootstrap(
        &self,
        runner: &impl CommandRunner,
        umoci: &Umoci,
        layout: &ImageLayout,
        needs_empty: bool,
    ) -> Result<()> {
        match self {
            Self::Default => {
                if needs_empty {
                    commit_empty_baseline(runner, umoci, layout)?;
                }
                Ok(())
            }
            Self::Snapshot(snapshot) => {
                if needs_empty {
                    commit_empty_baseline(runner, umoci, layout)?;
                    if let Err(err) = snapshot.create_baseline_volume(runner) {
                        warn!(error = %err, "creating baseline subvolume failed; continuing");
                    }
                }
                snapshot.bootstrap(runner);
                Ok(())
            }
        }
    }

    /// Replaces the working root with the contents of `tag`.
    pub fn unpack(
        &self,
        runner: &impl CommandRunner,
        umoci: &Umoci,
        layout: &ImageLayout,
        tag: &str,
    ) -> Result<()> {
        match self {
            Self::Default => {
                clear_working_dir(layout)?;
                umoci.unpack(runner, tag, layout.working_dir())
            }
            Self::Snapshot(snapshot) => snapshot.checkout(runner, tag),
        }
    }

    /// Commits the working root as `tag`.
    pub fn commit(
        &self,
        runner: &impl CommandRunner,
        umoci: &Umoci,
        layout: &ImageLayout,
        tag: &str,
    ) -> Result<()> {
        match self {
            Self::Default => umoci.repack(runner, tag, layout.working_dir()),
            Self::Snapshot(snapshot) => snapshot.checkin(runner, tag),
        }
    }
}

/// Round-trips a freshly created `empty` image through unpack and repack so
/// the store holds a complete minimal image, then drops the scratch tree.
fn commit_empty_baseline(
    runner: &impl CommandRunner,
    umoci: &Umoci,
    layout: &ImageLayout,
) -> Result<()> {
    info!(layout = %layout.name(), "committing empty baseline");
    clear_working_dir(layout)?;
    umoci.unpack(runner, EMPTY_TAG, layout.working_dir())?;
    umoci.repack(runner, EMPTY_TAG, layout.working_dir())?;
    clear_working_dir(layout)
}

fn clear_working_dir(layout: &ImageLayout) -> Result<()> {
    let working_dir = layout.working_dir();
    remove_dir_all_if_exists(working_dir).map_err(|err| {
        StageError::io(
            format!("failed to remove working directory {}", working_dir.display()),
            err,
        )
    })
}
