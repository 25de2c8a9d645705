use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use ocistage_core::ToolConfig;
use tracing::info;

use crate::fs_utils::{entry_exists, make_executable, remove_file_if_exists};
use crate::{describe_command, CommandRunner, OutputMode, Result, StageError};

/// Name of the scratch executable placed at the top of the root filesystem.
pub const RUN_FILE_NAME: &str = "ocirun";

const SHEBANG: &str = "#!/bin/sh\n";

/// Runs commands confined to a root filesystem with `chroot`.
pub struct Chroot<'a, R: ?Sized> {
    rootfs: &'a Path,
    tools: &'a ToolConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> Chroot<'a, R> {
    pub fn new(rootfs: &'a Path, tools: &'a ToolConfig, runner: &'a R) -> Self {
        Self {
            rootfs,
            tools,
            runner,
        }
    }

    /// Copies `host_file` into the root, runs it there and removes it again.
    /// Returns whether it exited zero.
    pub fn run_file(&self, host_file: &Path) -> Result<bool> {
        let run_path = self.run_file_path();
        let _ = remove_file_if_exists(&run_path);
        reject_symlinks(self.rootfs, Path::new(RUN_FILE_NAME))?;
        fs::copy(host_file, &run_path).map_err(|err| {
            StageError::io(
                format!(
                    "failed to copy {} to {}",
                    host_file.display(),
                    run_path.display()
                ),
                err,
            )
        })?;
        self.run_staged_file()
    }

    /// Runs `script` inside the root. A single line is executed directly as
    /// an argument vector; anything with a newline is written out as a shell
    /// script, provisioning `/bin/sh` first when the root has none.
    pub fn run_script(&self, script: &str) -> Result<bool> {
        if !script.contains('\n') {
            let argv = shell_words::split(script)
                .map_err(|err| StageError::InvalidCommand(format!("{script}: {err}")))?;
            if argv.is_empty() {
                return Err(StageError::InvalidCommand("empty command".to_string()));
            }
            return self.exec_confined(argv.into_iter().map(OsString::from));
        }

        self.ensure_shell()?;
        let run_path = self.run_file_path();
        remove_file_if_exists(&run_path).map_err(|err| {
            StageError::io(format!("failed to remove stale {}", run_path.display()), err)
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&run_path)
            .map_err(|err| {
                StageError::io(format!("failed to create {}", run_path.display()), err)
            })?;
        file.write_all(format!("{SHEBANG}{script}").as_bytes())
            .map_err(|err| StageError::io(format!("failed to write {}", run_path.display()), err))?;
        drop(file);
        self.run_staged_file()
    }

    /// Plain copy of a host file to `dest`, interpreted relative to the root.
    /// Symlinks along `dest` are refused.
    pub fn copy_into(&self, host_file: &Path, dest: &str) -> Result<PathBuf> {
        let relative = root_relative(dest)?;
        reject_symlinks(self.rootfs, &relative)?;
        let target = self.rootfs.join(relative);
        fs::copy(host_file, &target).map_err(|err| {
            StageError::io(
                format!(
                    "failed to copy {} to {}",
                    host_file.display(),
                    target.display()
                ),
                err,
            )
        })?;
        Ok(target)
    }

    fn run_file_path(&self) -> PathBuf {
        self.rootfs.join(RUN_FILE_NAME)
    }

    /// Executes the staged run file and removes it whatever the outcome.
    fn run_staged_file(&self) -> Result<bool> {
        let run_path = self.run_file_path();
        let outcome = make_executable(&run_path)
            .map_err(|err| {
                StageError::io(format!("failed to chmod {}", run_path.display()), err)
            })
            .and_then(|()| {
                self.exec_confined([OsString::from(format!("/{RUN_FILE_NAME}"))])
            });
        let cleanup = fs::remove_file(&run_path).map_err(|err| {
            StageError::io(format!("failed to remove {}", run_path.display()), err)
        });
        let succeeded = outcome?;
        cleanup?;
        Ok(succeeded)
    }

    fn ensure_shell(&self) -> Result<()> {
        let shell = self.rootfs.join("bin").join("sh");
        if entry_exists(&shell) {
            return Ok(());
        }

        info!(
            shell = %self.tools.static_shell.display(),
            rootfs = %self.rootfs.display(),
            "provisioning /bin/sh"
        );
        reject_symlinks(self.rootfs, Path::new("bin/sh"))?;
        let bin_dir = self.rootfs.join("bin");
        fs::create_dir_all(&bin_dir).map_err(|err| {
            StageError::io(format!("failed to create {}", bin_dir.display()), err)
        })?;
        fs::copy(&self.tools.static_shell, &shell).map_err(|err| {
            StageError::io(
                format!(
                    "failed to copy {} to {}",
                    self.tools.static_shell.display(),
                    shell.display()
                ),
                err,
            )
        })?;
        Ok(())
    }

    fn exec_confined(&self, argv: impl IntoIterator<Item = OsString>) -> Result<bool> {
        let mut command = Command::new(&self.tools.chroot);
        command.arg(self.rootfs).args(argv);
        info!(command = %describe_command(&command), "running in chroot");
        let output = self
            .runner
            .run(&mut command, OutputMode::Inherited)
            .map_err(|err| {
                StageError::io(format!("failed to start {}", describe_command(&command)), err)
            })?;
        Ok(output.success())
    }
}

fn root_relative(dest: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(dest).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(StageError::InvalidRootPath(dest.to_string()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(StageError::InvalidRootPath(dest.to_string()));
    }
    Ok(relative)
}

/// Symlinks inside the root resolve against the host when followed from
/// outside the chroot, so any existing link along `relative` is an error.
fn reject_symlinks(rootfs: &Path, relative: &Path) -> Result<()> {
    let mut current = rootfs.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(StageError::InvalidRootPath(format!(
                    "{} is a symlink",
                    relative.display()
                )));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}
