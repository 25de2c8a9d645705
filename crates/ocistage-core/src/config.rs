use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Everything needed to open one image layout: where it lives, which backend
/// commits filesystem trees, and which external tools to invoke.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    pub store_root: PathBuf,
    pub layout: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub tools: ToolConfig,
}

/// Options controlling delegation to the snapshot backend. A mount point
/// switches the controller into snapshot mode; without it the image store is
/// used directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    #[serde(default)]
    pub snapshot_mount_point: Option<PathBuf>,
}

impl BackendConfig {
    pub fn snapshot(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_mount_point: Some(mount_point.into()),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot_mount_point.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default = "default_umoci")]
    pub umoci: PathBuf,
    #[serde(default = "default_lpack")]
    pub lpack: PathBuf,
    #[serde(default = "default_btrfs")]
    pub btrfs: PathBuf,
    #[serde(default = "default_chroot")]
    pub chroot: PathBuf,
    /// Statically linked shell copied into roots that lack `/bin/sh`.
    #[serde(default = "default_static_shell")]
    pub static_shell: PathBuf,
    #[serde(default)]
    pub rootless: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            umoci: default_umoci(),
            lpack: default_lpack(),
            btrfs: default_btrfs(),
            chroot: default_chroot(),
            static_shell: default_static_shell(),
            rootless: false,
        }
    }
}

impl StageConfig {
    pub fn new(store_root: impl Into<PathBuf>, layout: impl Into<String>) -> Self {
        Self {
            store_root: store_root.into(),
            layout: layout.into(),
            backend: BackendConfig::default(),
            tools: ToolConfig::default(),
        }
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse ocistage config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed loading config: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store_root.as_os_str().is_empty() {
            return Err(anyhow!("store_root must not be empty"));
        }
        validate_layout_name(&self.layout)
    }
}

fn validate_layout_name(name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("layout name must not be empty"));
    }
    if name.contains('/') || name.contains(':') {
        return Err(anyhow!(
            "layout name must not contain '/' or ':': '{name}'"
        ));
    }
    Ok(())
}

fn default_umoci() -> PathBuf {
    PathBuf::from("umoci")
}

fn default_lpack() -> PathBuf {
    PathBuf::from("lpack")
}

fn default_btrfs() -> PathBuf {
    PathBuf::from("btrfs")
}

fn default_chroot() -> PathBuf {
    PathBuf::from("chroot")
}

fn default_static_shell() -> PathBuf {
    PathBuf::from("/bin/busybox")
}
