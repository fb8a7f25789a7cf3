// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    crate::build_dir::{Layout, CONFIG_FILE},
    clap::Parser,
    std::path::{Path, PathBuf},
};

mod cli;
mod config;

pub use config::Error as ConfigError;

/// Program arguments loaded from the CLI and config file.
#[derive(Debug, Clone)]
pub enum Args {
    /// Generate metadata files from a build directory.
    Generate { outputs: Outputs, layout: Layout },
    /// Print and verify the update metadata in an Intel HEX file.
    Dump { input: PathBuf },
}

/// Which metadata files to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outputs {
    Flash,
    Update,
    All,
}

impl Outputs {
    pub fn flash(&self) -> bool {
        matches!(self, Outputs::Flash | Outputs::All)
    }

    pub fn update(&self) -> bool {
        matches!(self, Outputs::Update | Outputs::All)
    }
}

/// Whether debug logging was requested. Arguments that fail to parse are
/// reported later by [`args`].
pub fn verbose<I, T>(args: I) -> bool
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    cli::Args::try_parse_from(args).is_ok_and(|cli| cli.verbose)
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    let (outputs, build) = match cli.command {
        cli::Command::Dump { input } => return Ok(Args::Dump { input }),
        cli::Command::Flash(build) => (Outputs::Flash, build),
        cli::Command::Update(build) => (Outputs::Update, build),
        cli::Command::All(build) => (Outputs::All, build),
    };

    let build_dir = build.build_dir;
    if !build_dir.is_dir() {
        return Err(Error::BuildDirMissing(build_dir));
    }

    // Load the config, either the one given or the one in the build directory.
    let config_path = cli.config.or_else(|| {
        let default = build_dir.join(CONFIG_FILE);
        default.is_file().then_some(default)
    });
    let config = config_path
        .map(|path| {
            tracing::debug!("loading config {}", path.display());
            config::Config::load(&path)
        })
        .transpose()?
        .unwrap_or_default();

    // Reconcile the CLI and config arguments. Error if anything is specified both
    // on the CLI and in the config file.
    let in_build_dir = |path: PathBuf| build_dir.join(path);
    let hardware_description = match (
        build.hardware_description,
        config.hardware_description.map(in_build_dir),
    ) {
        (None, None) => None,
        (None, Some(path)) | (Some(path), None) => Some(path),
        (Some(_), Some(_)) => return Err(Error::InConfigAndCli("hardware description")),
    };
    let softdevice_image = match (
        build.softdevice_image,
        config.softdevice_image.map(in_build_dir),
    ) {
        (None, None) => None,
        (None, Some(path)) | (Some(path), None) => Some(path),
        (Some(_), Some(_)) => return Err(Error::InConfigAndCli("SoftDevice image")),
    };
    let installer_dir = match (build.installer_dir, config.installer_dir.map(in_build_dir)) {
        (None, None) => None,
        (None, Some(path)) | (Some(path), None) => Some(path),
        (Some(_), Some(_)) => return Err(Error::InConfigAndCli("installer directory")),
    };

    let mut layout = Layout::new(&build_dir);
    layout.hardware_description = hardware_description;
    if let Some(path) = softdevice_image {
        layout.softdevice_image = path;
    }
    if let Some(path) = installer_dir {
        layout.installer_dir = path;
    }
    if let Some(path) = config.flash_metadata_output {
        layout.flash_metadata_output = build_dir.join(path);
    }
    if let Some(path) = config.metadata_output {
        layout.metadata_output = build_dir.join(path);
    }
    if let Some(path) = config.combined_output {
        layout.combined_output = build_dir.join(path);
    }
    check_distinct_outputs(&layout)?;

    Ok(Args::Generate { outputs, layout })
}

fn check_distinct_outputs(layout: &Layout) -> Result<(), Error> {
    let outputs: [&Path; 3] = [
        &layout.flash_metadata_output,
        &layout.metadata_output,
        &layout.combined_output,
    ];
    for (i, a) in outputs.iter().enumerate() {
        if outputs[i + 1..].contains(a) {
            return Err(Error::DuplicateOutput(a.to_path_buf()));
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum Error {
    BuildDirMissing(PathBuf),
    Cli(clap::Error),
    Config(ConfigError),
    DuplicateOutput(PathBuf),
    InConfigAndCli(&'static str),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BuildDirMissing(path) => {
                write!(f, "build directory does not exist: {}", path.display())
            }
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::DuplicateOutput(path) => {
                write!(f, "output file used more than once: {}", path.display())
            }
            Error::InConfigAndCli(what) => write!(f, "{what} specified in both config and cli"),
        }
    }
}

impl std::error::Error for Error {}
