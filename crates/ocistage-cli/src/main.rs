use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use ocistage_core::StageConfig;
use ocistage_layout::{ImageState, ScopedDir, StageError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod completion;
mod render;

use completion::write_completions_script;
use render::{current_output_style, print_status, OutputStyle};

#[derive(Parser, Debug)]
#[command(name = "ocistage")]
#[command(about = "Build OCI images by unpacking, mutating and re-tagging a local layout", long_about = None)]
struct Cli {
    /// TOML config naming the store root, layout and tools.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,
    #[arg(long, global = true)]
    layout: Option<String>,
    /// btrfs mount used by lpack; selects the snapshot backend.
    #[arg(long, global = true)]
    snapshot_mount: Option<PathBuf>,
    /// Run as if started in this directory.
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(flatten)]
    Stage(StageCommand),
}

/// Operations that open the image layout.
#[derive(Subcommand, Debug)]
enum StageCommand {
    /// Create the layout and its `empty` baseline when missing.
    Init,
    /// List tags, one per line.
    Tags {
        #[arg(long)]
        json: bool,
    },
    /// Exit zero when the tag exists.
    HasTag { tag: String },
    /// Print the next `<prefix>-<date>_<n>` tag.
    NextTag { prefix: String },
    /// Replace the working root filesystem with a tag's contents.
    Unpack { tag: String },
    /// Commit the working root filesystem as a new tag.
    Tag {
        name: String,
        /// Entrypoint argument for the new image; repeat for each argument.
        #[arg(long = "entrypoint", allow_hyphen_values = true)]
        entrypoint: Vec<String>,
    },
    /// Give an existing tag another name.
    Alias { existing: String, new_tag: String },
    /// Remove a tag and garbage-collect the layout.
    RmTag {
        name: String,
        #[arg(long)]
        best_effort: bool,
    },
    /// Copy an executable into the root filesystem and run it there.
    RunFile { path: PathBuf },
    /// Run a command line, or a multi-line shell script, inside the root filesystem.
    Script {
        #[arg(required_unless_present = "file")]
        text: Option<String>,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
    /// Copy a host file into the root filesystem.
    Copy { src: PathBuf, dest: String },
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match run_cli(cli) {
        Err(err) => match err.downcast_ref::<StageError>() {
            Some(stage_err) if stage_err.is_backend_command() => {
                eprintln!("{stage_err}");
                Ok(ExitCode::FAILURE)
            }
            _ => Err(err),
        },
        outcome => outcome,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ocistage=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let command = match cli.command {
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut io::stdout())?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Stage(command) => command,
    };

    let _directory = match &cli.directory {
        Some(dir) => Some(ScopedDir::enter(dir)?),
        None => None,
    };
    let style = current_output_style(cli.plain);
    let config = resolve_config(
        cli.config.as_deref(),
        cli.store_root.as_deref(),
        cli.layout.as_deref(),
        cli.snapshot_mount.as_deref(),
    )?;
    debug!(?config, "resolved config");
    let mut state = ImageState::init(&config)?;

    match command {
        StageCommand::Init => {
            print_status(
                style,
                "ok",
                &format!(
                    "layout {} ready at {} (backend={})",
                    state.layout().name(),
                    state.layout().store_root().display(),
                    state.backend().name()
                ),
            );
        }
        StageCommand::Tags { json } => {
            let tags = state.try_list_tags()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tags)?);
            } else {
                for tag in tags {
                    println!("{tag}");
                }
            }
        }
        StageCommand::HasTag { tag } => {
            if !state.has_tag(&tag) {
                return Ok(ExitCode::FAILURE);
            }
        }
        StageCommand::NextTag { prefix } => {
            println!("{}", state.next_version_tag(&prefix));
        }
        StageCommand::Unpack { tag } => {
            state.unpack(&tag)?;
            print_status(
                style,
                "ok",
                &format!("unpacked {tag} into {}", state.rootfs_dir().display()),
            );
        }
        StageCommand::Tag { name, entrypoint } => {
            state.set_entrypoint(entrypoint);
            state.tag(&name)?;
            print_status(style, "ok", &format!("tagged {name}"));
        }
        StageCommand::Alias { existing, new_tag } => {
            state.add_tag_alias(&existing, &new_tag)?;
            print_status(style, "ok", &format!("tagged {existing} as {new_tag}"));
        }
        StageCommand::RmTag { name, best_effort } => {
            state.delete_tag(&name, !best_effort)?;
            print_status(style, "ok", &format!("removed {name}"));
        }
        StageCommand::RunFile { path } => {
            let succeeded = state.run_file(&path)?;
            return Ok(report_confined_run(style, &path.display().to_string(), succeeded));
        }
        StageCommand::Script { text, file } => {
            let (label, script) = script_source(text, file.as_deref())?;
            let succeeded = state.run_script(&script)?;
            return Ok(report_confined_run(style, &label, succeeded));
        }
        StageCommand::Copy { src, dest } => {
            let target = state.copy_into(&src, &dest)?;
            print_status(
                style,
                "ok",
                &format!("copied {} to {}", src.display(), target.display()),
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_config(
    config_path: Option<&Path>,
    store_root: Option<&Path>,
    layout: Option<&str>,
    snapshot_mount: Option<&Path>,
) -> Result<StageConfig> {
    let mut config = match config_path {
        Some(path) => StageConfig::load(path)?,
        None => {
            let store_root = store_root.context("--store-root is required without --config")?;
            let layout = layout.context("--layout is required without --config")?;
            StageConfig::new(store_root, layout)
        }
    };

    if let Some(store_root) = store_root {
        config.store_root = store_root.to_path_buf();
    }
    if let Some(layout) = layout {
        config.layout = layout.to_string();
    }
    if let Some(mount) = snapshot_mount {
        config.backend.snapshot_mount_point = Some(mount.to_path_buf());
    }
    config.validate()?;
    Ok(config)
}

fn script_source(text: Option<String>, file: Option<&Path>) -> Result<(String, String)> {
    match (text, file) {
        (Some(text), None) => Ok(("script".to_string(), text)),
        (None, Some(path)) => {
            let script = fs::read_to_string(path)
                .with_context(|| format!("failed reading script: {}", path.display()))?;
            Ok((path.display().to_string(), script))
        }
        _ => anyhow::bail!("pass either a script or --file"),
    }
}

fn report_confined_run(style: OutputStyle, label: &str, succeeded: bool) -> ExitCode {
    if succeeded {
        print_status(style, "ok", &format!("{label} succeeded"));
        ExitCode::SUCCESS
    } else {
        print_status(style, "err", &format!("{label} failed inside the root filesystem"));
        ExitCode::FAILURE
    }
}
