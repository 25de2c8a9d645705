use std::path::{Path, PathBuf};

use ocistage_core::BackendConfig;

/// Paths of one OCI image layout and its working tree.
///
/// `rootfs_dir` is fixed at construction: inside the unpacked working
/// directory for the default backend, or under the snapshot mount point when
/// the snapshot backend is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    store_root: PathBuf,
    name: String,
    working_dir: PathBuf,
    rootfs_dir: PathBuf,
}

impl ImageLayout {
    pub fn new(
        store_root: impl Into<PathBuf>,
        name: impl Into<String>,
        backend: &BackendConfig,
    ) -> Self {
        let store_root = store_root.into();
        let working_dir = store_root.join("unpacked");
        let rootfs_dir = match &backend.snapshot_mount_point {
            Some(mount_point) => mount_point.join("mounted"),
            None => working_dir.join("rootfs"),
        };
        Self {
            store_root,
            name: name.into(),
            working_dir,
            rootfs_dir,
        }
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout_dir(&self) -> PathBuf {
        self.store_root.join(&self.name)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    /// `<layout>:<tag>`, resolved relative to the store root.
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}:{tag}", self.name)
    }

    /// `<store_root>/<layout>:<tag>`, usable from any working directory.
    pub fn absolute_image_ref(&self, tag: &str) -> String {
        format!("{}:{tag}", self.layout_dir().display())
    }
}
