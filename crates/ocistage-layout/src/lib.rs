//! On-disk OCI image layout lifecycle: init, unpack, mutate, tag.
//!
//! [`ImageState`] drives `umoci` (or the `lpack` snapshot backend) against a
//! layout directory and exposes a [`Chroot`] facade for running provisioning
//! commands inside the unpacked root filesystem.

mod backend;
mod chroot;
mod dir_guard;
mod error;
mod fs_utils;
mod layout;
mod runner;
mod snapshot;
mod state;
mod umoci;

pub use backend::Backend;
pub use chroot::{Chroot, RUN_FILE_NAME};
pub use dir_guard::ScopedDir;
pub use error::{Result, SnapshotOperation, StageError};
pub use layout::ImageLayout;
pub use runner::{describe_command, CommandOutput, CommandRunner, OutputMode, SystemRunner};
pub use snapshot::SnapshotBackend;
pub use state::ImageState;
pub use umoci::Umoci;
