use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use ocistage_core::{
    contains_tag, next_version_tag, PendingConfig, StageConfig, ToolConfig, EMPTY_TAG,
};
use tracing::{debug, info, warn};

use crate::{Backend, Chroot, CommandRunner, ImageLayout, Result, StageError, SystemRunner, Umoci};

/// Controller for one image layout.
///
/// Construction ([`ImageState::init`]) creates or reuses the layout and
/// guarantees an `empty` tag exists. Afterwards the caller cycles through
/// [`unpack`](Self::unpack), mutation of [`rootfs_dir`](Self::rootfs_dir), and
/// [`tag`](Self::tag).
///
/// Nothing here locks the layout. Two controllers (or two processes) working
/// on the same store root must be serialized by the caller.
#[derive(Debug)]
pub struct ImageState<R: CommandRunner = SystemRunner> {
    layout: ImageLayout,
    umoci: Umoci,
    backend: Backend,
    tools: ToolConfig,
    pending: PendingConfig,
    runner: R,
}

impl ImageState<SystemRunner> {
    pub fn init(config: &StageConfig) -> Result<Self> {
        Self::init_with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> ImageState<R> {
    pub fn init_with_runner(config: &StageConfig, runner: R) -> Result<Self> {
        config.validate()?;
        let store_root = prepare_store_root(&config.store_root)?;
        let work_dir = env::current_dir()
            .map_err(|err| StageError::io("failed to read current directory", err))?;

        let layout = ImageLayout::new(store_root, config.layout.clone(), &config.backend);
        let umoci = Umoci::new(&layout, &config.tools);
        let backend = Backend::select(&config.backend, &work_dir, &config.tools);
        info!(
            layout = %layout.name(),
            store_root = %layout.store_root().display(),
            backend = backend.name(),
            "opening image layout"
        );

        let state = Self {
            layout,
            umoci,
            backend,
            tools: config.tools.clone(),
            pending: PendingConfig::default(),
            runner,
        };

        if let Err(err) = state.umoci.init_layout(&state.runner) {
            debug!(error = %err, "layout init failed; assuming it already exists");
        }

        let needs_empty = !state.has_tag(EMPTY_TAG);
        if needs_empty {
            state.umoci.new_image(&state.runner, EMPTY_TAG)?;
        }
        state
            .backend
            .bootstrap(&state.runner, &state.umoci, &state.layout, needs_empty)?;

        Ok(state)
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn rootfs_dir(&self) -> &Path {
        self.layout.rootfs_dir()
    }

    pub fn pending(&self) -> &PendingConfig {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingConfig {
        &mut self.pending
    }

    /// Entrypoint baked into the next tag.
    pub fn set_entrypoint<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.entrypoint_args = args.into_iter().map(Into::into).collect();
    }

    /// Tags in the layout, or an empty list when the store cannot be listed.
    pub fn list_tags(&self) -> Vec<String> {
        match self.try_list_tags() {
            Ok(tags) => tags,
            Err(err) => {
                warn!(
                    layout = %self.layout.name(),
                    error = %err,
                    "treating unavailable tag list as empty"
                );
                Vec::new()
            }
        }
    }

    pub fn try_list_tags(&self) -> Result<Vec<String>> {
        self.umoci.list_tags(&self.runner)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        contains_tag(&self.list_tags(), name)
    }

    /// Next `<prefix>-<today>_<n>` tag not yet present in the layout.
    pub fn next_version_tag(&self, prefix: &str) -> String {
        self.next_version_tag_on(prefix, Local::now().date_naive())
    }

    pub fn next_version_tag_on(&self, prefix: &str, date: NaiveDate) -> String {
        next_version_tag(&self.list_tags(), prefix, date)
    }

    /// Removes `name` and garbage-collects the layout. With `force` unset both
    /// steps are best-effort.
    pub fn delete_tag(&self, name: &str, force: bool) -> Result<()> {
        let removed = self.umoci.remove(&self.runner, name);
        if force {
            removed?;
        } else if let Err(err) = removed {
            warn!(tag = %name, error = %err, "ignoring failed tag removal");
        }

        let collected = self.umoci.gc(&self.runner);
        if force {
            collected?;
        } else if let Err(err) = collected {
            warn!(
                layout = %self.layout.name(),
                error = %err,
                "ignoring failed garbage collection"
            );
        }
        Ok(())
    }

    /// Materializes `tag` as the working root filesystem.
    pub fn unpack(&self, tag: &str) -> Result<()> {
        self.backend
            .unpack(&self.runner, &self.umoci, &self.layout, tag)
    }

    /// Commits the working root as `name`, then applies and clears any pending
    /// entrypoint. The pending config survives a failed commit.
    pub fn tag(&mut self, name: &str) -> Result<()> {
        self.backend
            .commit(&self.runner, &self.umoci, &self.layout, name)?;

        if !self.pending.is_empty() {
            self.umoci
                .set_config_cmd(&self.runner, name, &self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }

    pub fn add_tag_alias(&self, existing: &str, new_tag: &str) -> Result<()> {
        self.umoci.tag_alias(&self.runner, existing, new_tag)
    }

    pub fn chroot(&self) -> Chroot<'_, R> {
        Chroot::new(self.layout.rootfs_dir(), &self.tools, &self.runner)
    }

    pub fn run_file(&self, host_file: &Path) -> Result<bool> {
        self.chroot().run_file(host_file)
    }

    pub fn run_script(&self, script: &str) -> Result<bool> {
        self.chroot().run_script(script)
    }

    pub fn copy_into(&self, host_file: &Path, dest: &str) -> Result<PathBuf> {
        self.chroot().copy_into(host_file, dest)
    }
}

fn prepare_store_root(store_root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(store_root).map_err(|err| {
        StageError::io(
            format!("failed to create store root {}", store_root.display()),
            err,
        )
    })?;
    fs::canonicalize(store_root).map_err(|err| {
        StageError::io(
            format!("failed to resolve store root {}", store_root.display()),
            err,
        )
    })
}
